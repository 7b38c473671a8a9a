//! Route table capability
//!
//! The server never matches paths itself. It registers routes on, and
//! dispatches requests to, a [`Router`]. [`AxumRouter`] is the production
//! implementation; tests can substitute anything that matches paths.

use std::collections::{BTreeMap, HashSet};
use std::convert::Infallible;

use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any_service, MethodFilter, MethodRouter};
use ferrule_core::{Error, Logger, Result};
use futures::future::BoxFuture;
use tower::util::BoxCloneService;
use tower::ServiceExt;

use crate::{Request, Response};

/// Type-erased service registered for a route
pub type RouteService = BoxCloneService<Request, Response, Infallible>;

/// Registers routes and dispatches requests to them
pub trait Router: Clone + Send + Sync + 'static {
    /// Register `service` for the exact `path`; `None` matches any method
    fn register_route(&mut self, method: Option<Method>, path: &str, service: RouteService);

    /// Run the route matching `req`, or report why none matched
    fn dispatch(&self, req: Request) -> BoxFuture<'static, Result<Response>>;
}

/// Marker left on responses produced when no route matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteMiss {
    NotFound,
    MethodNotAllowed,
}

#[derive(Clone, Default)]
struct PathRoutes {
    any: bool,
    methods: HashSet<Method>,
    router: Option<MethodRouter>,
}

/// [`Router`] backed by `axum::Router`
#[derive(Clone)]
pub struct AxumRouter {
    routes: BTreeMap<String, PathRoutes>,
    inner: axum::Router,
    log: Logger,
}

impl Default for AxumRouter {
    fn default() -> Self {
        Self::new(Logger::current())
    }
}

impl AxumRouter {
    pub fn new(logger: Logger) -> Self {
        Self {
            routes: BTreeMap::new(),
            inner: axum::Router::new().fallback(route_not_found),
            log: logger.with_module("http.router"),
        }
    }

    /// Registered paths in lexical order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    fn rebuild(&mut self) {
        self.inner = self
            .routes
            .iter()
            .filter_map(|(path, routes)| routes.router.clone().map(|r| (path, r)))
            .fold(axum::Router::new(), |router, (path, method_router)| {
                router.route(path, method_router)
            })
            .fallback(route_not_found);
    }
}

impl Router for AxumRouter {
    fn register_route(&mut self, method: Option<Method>, path: &str, service: RouteService) {
        let label = method.as_ref().map_or("ANY", Method::as_str);

        // axum would treat these segments as captures, not literal paths.
        if let Some(segment) = path.split('/').find(|s| s.contains(':') || s.contains('*')) {
            self.log.warn(format_args!(
                "route {label} {path} skipped, segment {segment:?} is not an exact path"
            ));
            return;
        }

        let filter = match &method {
            None => None,
            Some(m) => match MethodFilter::try_from(m.clone()) {
                Ok(filter) => Some(filter),
                Err(_) => {
                    self.log
                        .warn(format_args!("method {m} cannot be routed, skipping {path}"));
                    return;
                }
            },
        };

        let entry = self.routes.entry(path.to_string()).or_default();
        let conflict = match &method {
            None => entry.any || !entry.methods.is_empty(),
            Some(m) => entry.any || entry.methods.contains(m),
        };
        if conflict {
            self.log.warn(format_args!(
                "route {label} {path} already registered, keeping the first"
            ));
            return;
        }

        let method_router = match (method, filter) {
            (Some(m), Some(filter)) => {
                entry.methods.insert(m);
                entry
                    .router
                    .take()
                    .unwrap_or_else(|| MethodRouter::new().fallback(method_not_allowed))
                    .on_service(filter, service)
            }
            _ => {
                entry.any = true;
                any_service(service)
            }
        };
        entry.router = Some(method_router);
        self.rebuild();
    }

    fn dispatch(&self, req: Request) -> BoxFuture<'static, Result<Response>> {
        let router = self.inner.clone();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        Box::pin(async move {
            let response = match router.oneshot(req).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            match response.extensions().get::<RouteMiss>() {
                Some(RouteMiss::NotFound) => Err(Error::NotFound { path }),
                Some(RouteMiss::MethodNotAllowed) => Err(Error::MethodNotAllowed {
                    method: method.to_string(),
                    path,
                }),
                None => Ok(response),
            }
        })
    }
}

async fn route_not_found() -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    response.extensions_mut().insert(RouteMiss::NotFound);
    response
}

async fn method_not_allowed() -> Response {
    let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
    response.extensions_mut().insert(RouteMiss::MethodNotAllowed);
    response
}

/// Join route segments into a normalised absolute path
pub(crate) fn join_path(root: &str, path: &str) -> String {
    let segments: Vec<&str> = root
        .split('/')
        .chain(path.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}
