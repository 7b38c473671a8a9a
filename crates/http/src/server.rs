//! HTTP server
//!
//! [`Server`] is configured once from a list of [`ServerOption`]s, has
//! routes registered on it, and is then started. Every inbound request goes
//! through [`Server::serve_http`], which derives a timeout-bound [`Context`]
//! tagged with the HTTP transport and the request's [`ServerInfo`] before
//! handing the request to the router.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::async_trait;
use axum::handler::Handler as AxumHandler;
use axum::http::Method;
use axum::response::IntoResponse;
use ferrule_core::transport::{self, Kind, Transport};
use ferrule_core::{Context, Error, Handler, Logger, Middleware, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tower::make::Shared;
use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};

use crate::codec::{self, Codec, DecodeRequestFn, EncodeErrorFn, EncodeResponseFn};
use crate::info::{RequestHead, ResponseWriter, ServerInfo};
use crate::route::RouteGroup;
use crate::router::{join_path, AxumRouter, RouteService, Router};
use crate::{listener, Request, Response};

const DEFAULT_NETWORK: &str = "tcp";
const DEFAULT_ADDRESS: &str = ":8000";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings a server was built with; read-only once the server exists
#[derive(Clone)]
pub struct ServerOptions {
    network: String,
    address: String,
    timeout: Duration,
    middleware: Option<Middleware>,
    codec: Codec,
    logger: Logger,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            timeout: DEFAULT_TIMEOUT,
            middleware: None,
            codec: Codec::default(),
            logger: Logger::current(),
        }
    }
}

impl ServerOptions {
    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn middleware(&self) -> Option<&Middleware> {
        self.middleware.as_ref()
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("network", &self.network)
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .field("middleware", &self.middleware.is_some())
            .finish_non_exhaustive()
    }
}

/// A single server setting, applied while the server is built
pub struct ServerOption(Box<dyn FnOnce(&mut ServerOptions) + Send>);

impl ServerOption {
    fn new(f: impl FnOnce(&mut ServerOptions) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    fn apply(self, options: &mut ServerOptions) {
        (self.0)(options)
    }
}

/// Listener network: `tcp`, `tcp4` or `tcp6`
pub fn network(network: impl Into<String>) -> ServerOption {
    let network = network.into();
    ServerOption::new(move |o| o.network = network)
}

/// Listen address, e.g. `":8000"` or `"127.0.0.1:0"`
pub fn address(address: impl Into<String>) -> ServerOption {
    let address = address.into();
    ServerOption::new(move |o| o.address = address)
}

/// Deadline applied to every request context
pub fn timeout(timeout: Duration) -> ServerOption {
    ServerOption::new(move |o| o.timeout = timeout)
}

/// The middleware wrapping handlers run through [`Server::invoke`]
pub fn middleware(middleware: Middleware) -> ServerOption {
    ServerOption::new(move |o| o.middleware = Some(middleware))
}

pub fn request_decoder(decoder: DecodeRequestFn) -> ServerOption {
    ServerOption::new(move |o| o.codec.decoder = decoder)
}

pub fn response_encoder(encoder: EncodeResponseFn) -> ServerOption {
    ServerOption::new(move |o| o.codec.encoder = encoder)
}

pub fn error_encoder(encoder: EncodeErrorFn) -> ServerOption {
    ServerOption::new(move |o| o.codec.error_encoder = encoder)
}

pub fn logger(logger: Logger) -> ServerOption {
    ServerOption::new(move |o| o.logger = logger)
}

/// File/CLI friendly subset of the server options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: String,
    pub address: String,
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    pub fn into_options(self) -> Vec<ServerOption> {
        vec![
            network(self.network),
            address(self.address),
            timeout(Duration::from_millis(self.timeout_ms)),
        ]
    }
}

/// Lifecycle of a server; `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unstarted,
    Starting,
    Serving(SocketAddr),
    Stopping,
    Stopped,
}

impl State {
    fn is_shutting_down(&self) -> bool {
        matches!(self, State::Stopping | State::Stopped)
    }
}

/// HTTP server wrapping a [`Router`]
pub struct Server<R: Router = AxumRouter> {
    opts: Arc<ServerOptions>,
    router: R,
    state: Arc<watch::Sender<State>>,
    log: Logger,
}

impl<R: Router> Clone for Server<R> {
    fn clone(&self) -> Self {
        Self {
            opts: Arc::clone(&self.opts),
            router: self.router.clone(),
            state: Arc::clone(&self.state),
            log: self.log.clone(),
        }
    }
}

impl Server<AxumRouter> {
    /// Build a server backed by axum
    pub fn new(opts: impl IntoIterator<Item = ServerOption>) -> Self {
        let options = build_options(opts);
        let router = AxumRouter::new(options.logger.clone());
        Self::from_parts(options, router)
    }

    /// Build a server from a config, then apply `opts` on top
    pub fn from_config(config: ServerConfig, opts: impl IntoIterator<Item = ServerOption>) -> Self {
        Self::new(config.into_options().into_iter().chain(opts))
    }
}

impl<R: Router> Server<R> {
    /// Build a server on top of a custom router
    pub fn with_router(router: R, opts: impl IntoIterator<Item = ServerOption>) -> Self {
        Self::from_parts(build_options(opts), router)
    }

    fn from_parts(options: ServerOptions, router: R) -> Self {
        let (state, _) = watch::channel(State::Unstarted);
        Self {
            log: options.logger.with_module("http"),
            opts: Arc::new(options),
            router,
            state: Arc::new(state),
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.opts
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    /// The configured codecs, cheap to clone into handlers
    pub fn codec(&self) -> Codec {
        self.opts.codec.clone()
    }

    /// Start a group of routes under `prefix`
    pub fn route(&mut self, prefix: &str) -> RouteGroup<'_, R> {
        RouteGroup::new(self, prefix)
    }

    /// Register a tower service for every method on `path`
    pub fn handle<S>(&mut self, path: &str, service: S)
    where
        S: Service<Request, Error = Infallible> + Clone + Send + 'static,
        S::Response: IntoResponse + 'static,
        S::Future: Send + 'static,
    {
        let service = BoxCloneService::new(service.map_response(IntoResponse::into_response));
        self.register(None, path, service);
    }

    /// Register an axum handler function for every method on `path`
    pub fn handle_fn<H, T>(&mut self, path: &str, handler: H)
    where
        H: AxumHandler<T, ()>,
        T: 'static,
    {
        self.register_handler(None, path, handler);
    }

    /// Register a route that decodes the body, runs `handler` through the
    /// middleware, and encodes the reply or error
    pub fn handle_unary(&mut self, path: &str, handler: Handler) {
        let codec = self.codec();
        let middleware = self.opts.middleware.clone();
        let service = tower::service_fn(move |req: Request| {
            let codec = codec.clone();
            let middleware = middleware.clone();
            let handler = Arc::clone(&handler);
            async move { Ok::<_, Infallible>(serve_unary(codec, middleware, handler, req).await) }
        });
        self.register(None, path, BoxCloneService::new(service));
    }

    pub(crate) fn register_handler<H, T>(&mut self, method: Option<Method>, path: &str, handler: H)
    where
        H: AxumHandler<T, ()>,
        T: 'static,
    {
        self.register(method, path, BoxCloneService::new(handler.with_state(())));
    }

    fn register(&mut self, method: Option<Method>, path: &str, service: RouteService) {
        let path = join_path("", path);
        self.log.debug(format_args!(
            "[HTTP] route {} {}",
            method.as_ref().map_or("ANY", Method::as_str),
            path
        ));
        self.router.register_route(method, &path, service);
    }

    /// Decode the body of `req` with the configured request decoder
    pub async fn decode<T: DeserializeOwned>(&self, req: Request) -> Result<T> {
        self.opts.codec.decode(req).await
    }

    /// Encode `value`; encoder failures go to the error encoder instead
    pub fn encode<T: Serialize + ?Sized>(&self, head: &RequestHead, value: &T) -> Response {
        self.opts.codec.encode(head, value)
    }

    /// Encode `err` with the configured error encoder
    pub fn error(&self, head: &RequestHead, err: Error) -> Response {
        self.opts.codec.error(head, err)
    }

    /// Run `handler` wrapped by the configured middleware, if any
    pub async fn invoke(&self, ctx: Context, req: Value, handler: Handler) -> Result<Value> {
        invoke(self.opts.middleware.as_ref(), ctx, req, handler).await
    }

    /// Serve one request: derive its context, then dispatch it
    pub async fn serve_http(&self, mut req: Request) -> Response {
        let parent = req.extensions().get::<Context>().cloned().unwrap_or_default();
        let (ctx, _cancel) = parent.with_timeout(self.opts.timeout);
        let ctx = transport::new_context(&ctx, Transport::new(Kind::Http));

        let info = ServerInfo::new(RequestHead::from_request(&req), ResponseWriter::new());
        let ctx = info.new_context(&ctx);
        req.extensions_mut().insert(ctx);

        let response = match self.router.dispatch(req).await {
            Ok(response) => response,
            Err(err) => self.error(&info.request, err),
        };
        info.response.apply(response)
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Address the listener is bound to while serving
    pub fn endpoint(&self) -> Option<SocketAddr> {
        match self.state() {
            State::Serving(addr) => Some(addr),
            _ => None,
        }
    }

    /// Wait until the server is serving and return its address
    pub async fn ready(&self) -> Result<SocketAddr> {
        let mut rx = self.state.subscribe();
        let state = match rx
            .wait_for(|s| matches!(s, State::Serving(_)) || s.is_shutting_down())
            .await
        {
            Ok(state) => *state,
            Err(_) => State::Stopped,
        };
        match state {
            State::Serving(addr) => Ok(addr),
            _ => Err(Error::ServerClosed),
        }
    }

    /// Bind the listener and serve until stopped or `ctx` is done
    pub async fn start(&self, ctx: &Context) -> Result<()> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == State::Unstarted {
                *state = State::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(match self.state() {
                State::Stopping | State::Stopped => Error::ServerClosed,
                _ => Error::AlreadyStarted,
            });
        }
        // Every exit from here on, including this future being dropped,
        // leaves the server stopped.
        let stopped = StopOnDrop(&self.state);

        let listener = listener::bind(&self.opts.network, &self.opts.address).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| Error::Serve { source })?;
        self.state.send_if_modified(|state| {
            if *state == State::Starting {
                *state = State::Serving(local_addr);
                true
            } else {
                false
            }
        });
        self.log.info(format_args!(
            "[HTTP] server listening on: {} ({})",
            self.opts.address, local_addr
        ));

        let server = Arc::new(self.clone());
        let service = tower::service_fn(move |req: Request| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.serve_http(req).await) }
        });
        let shutdown = shutdown_signal(self.state.subscribe(), ctx.clone());

        let served = axum::serve(listener, Shared::new(service))
            .with_graceful_shutdown(shutdown)
            .await;
        drop(stopped);
        self.log.info("[HTTP] server stopped");
        served.map_err(|source| Error::Serve { source })
    }

    /// Stop accepting connections and wait for in-flight requests, giving
    /// up once `ctx` is done
    pub async fn stop(&self, ctx: &Context) -> Result<()> {
        self.log.info("[HTTP] server stopping");
        self.state.send_modify(|state| {
            *state = match *state {
                State::Unstarted | State::Stopped => State::Stopped,
                State::Starting | State::Serving(_) | State::Stopping => State::Stopping,
            }
        });

        let mut rx = self.state.subscribe();
        tokio::select! {
            biased;
            _ = wait_stopped(&mut rx) => Ok(()),
            _ = ctx.done() => Err(ctx.err().unwrap_or(Error::DeadlineExceeded)),
        }
    }
}

#[async_trait]
impl<R: Router> transport::Server for Server<R> {
    fn kind(&self) -> Kind {
        Kind::Http
    }

    async fn start(&self, ctx: &Context) -> Result<()> {
        Server::start(self, ctx).await
    }

    async fn stop(&self, ctx: &Context) -> Result<()> {
        Server::stop(self, ctx).await
    }
}

impl<R: Router> fmt::Debug for Server<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("opts", &self.opts)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct StopOnDrop<'a>(&'a watch::Sender<State>);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(State::Stopped);
    }
}

fn build_options(opts: impl IntoIterator<Item = ServerOption>) -> ServerOptions {
    let mut options = ServerOptions::default();
    for opt in opts {
        opt.apply(&mut options);
    }
    options
}

async fn invoke(
    middleware: Option<&Middleware>,
    ctx: Context,
    req: Value,
    handler: Handler,
) -> Result<Value> {
    let handler = match middleware {
        Some(middleware) => middleware(handler),
        None => handler,
    };
    handler(ctx, req).await
}

async fn serve_unary(
    codec: Codec,
    middleware: Option<Middleware>,
    handler: Handler,
    req: Request,
) -> Response {
    let (parts, body) = req.into_parts();
    let head = RequestHead::from_parts(&parts);
    let ctx = parts.extensions.get::<Context>().cloned().unwrap_or_default();

    let input = codec::read_body(body)
        .await
        .and_then(|bytes| codec.decode_bytes::<Value>(&head, bytes));
    let input = match input {
        Ok(input) => input,
        Err(err) => return codec.error(&head, err),
    };
    match invoke(middleware.as_ref(), ctx, input, handler).await {
        Ok(reply) => codec.encode(&head, &reply),
        Err(err) => codec.error(&head, err),
    }
}

async fn wait_stopped(rx: &mut watch::Receiver<State>) {
    let _ = rx.wait_for(|s| *s == State::Stopped).await;
}

async fn shutdown_signal(mut rx: watch::Receiver<State>, ctx: Context) {
    tokio::select! {
        _ = wait_shutting_down(&mut rx) => {}
        _ = ctx.done() => {}
    }
}

async fn wait_shutting_down(rx: &mut watch::Receiver<State>) {
    let _ = rx.wait_for(State::is_shutting_down).await;
}
