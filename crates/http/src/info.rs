//! Request-scoped server information
//!
//! Every request dispatched by a [`Server`](crate::Server) carries a
//! [`ServerInfo`] in its [`Context`]: a snapshot of the inbound request
//! head and a [`ResponseWriter`] whose headers are merged into whatever
//! response the route produces.

use std::sync::{Arc, Mutex, PoisonError};

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};
use ferrule_core::Context;

use crate::{Request, Response};

/// Method, URI, version and headers of an inbound request
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn from_request(req: &Request) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            headers: req.headers().clone(),
        }
    }

    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

/// Shared handle to headers destined for the outgoing response
#[derive(Debug, Clone, Default)]
pub struct ResponseWriter {
    headers: Arc<Mutex<HeaderMap>>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any value queued earlier
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().insert(name, value);
    }

    /// Queue an additional value for a header
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().append(name, value);
    }

    /// Headers queued so far
    pub fn headers(&self) -> HeaderMap {
        self.lock().clone()
    }

    /// Whether both handles point at the same response
    pub fn ptr_eq(&self, other: &ResponseWriter) -> bool {
        Arc::ptr_eq(&self.headers, &other.headers)
    }

    /// Merge queued headers into `response`; queued values win
    pub fn apply(&self, mut response: Response) -> Response {
        let queued = std::mem::take(&mut *self.lock());
        response.headers_mut().extend(queued);
        response
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeaderMap> {
        self.headers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Request and response handles of the request being served
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub request: Arc<RequestHead>,
    pub response: ResponseWriter,
}

impl ServerInfo {
    pub fn new(request: RequestHead, response: ResponseWriter) -> Self {
        Self {
            request: Arc::new(request),
            response,
        }
    }

    /// Attach this info to a child of `ctx`
    pub fn new_context(&self, ctx: &Context) -> Context {
        ctx.with_value(self.clone())
    }

    /// The info attached by the dispatching server, if any
    pub fn from_context(ctx: &Context) -> Option<ServerInfo> {
        ctx.value::<ServerInfo>().cloned()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ServerInfo
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Context>()
            .and_then(ServerInfo::from_context)
            .ok_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                "request was not dispatched through a ferrule server",
            ))
    }
}
