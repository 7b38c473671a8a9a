//! Prefixed route registration

use std::convert::Infallible;

use axum::handler::Handler as AxumHandler;
use axum::http::Method;
use axum::response::IntoResponse;
use ferrule_core::Handler;
use tower::Service;

use crate::router::{join_path, Router};
use crate::{Request, Server};

/// Registers routes under a shared path prefix
pub struct RouteGroup<'a, R: Router> {
    root: String,
    server: &'a mut Server<R>,
}

impl<'a, R: Router> RouteGroup<'a, R> {
    pub(crate) fn new(server: &'a mut Server<R>, root: &str) -> Self {
        Self {
            root: join_path(root, ""),
            server,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Nested group below this one
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_, R> {
        let root = join_path(&self.root, prefix);
        RouteGroup::new(&mut *self.server, &root)
    }

    /// Register a handler for every method on `path`
    pub fn any<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: AxumHandler<T, ()>,
        T: 'static,
    {
        self.method(None, path, handler)
    }

    pub fn get<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: AxumHandler<T, ()>,
        T: 'static,
    {
        self.method(Some(Method::GET), path, handler)
    }

    pub fn post<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: AxumHandler<T, ()>,
        T: 'static,
    {
        self.method(Some(Method::POST), path, handler)
    }

    pub fn put<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: AxumHandler<T, ()>,
        T: 'static,
    {
        self.method(Some(Method::PUT), path, handler)
    }

    pub fn patch<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: AxumHandler<T, ()>,
        T: 'static,
    {
        self.method(Some(Method::PATCH), path, handler)
    }

    pub fn delete<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: AxumHandler<T, ()>,
        T: 'static,
    {
        self.method(Some(Method::DELETE), path, handler)
    }

    /// Same as [`RouteGroup::any`], mirroring [`Server::handle_fn`]
    pub fn handle_fn<H, T>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: AxumHandler<T, ()>,
        T: 'static,
    {
        self.any(path, handler)
    }

    /// Register a tower service for every method on `path`
    pub fn handle<S>(&mut self, path: &str, service: S) -> &mut Self
    where
        S: Service<Request, Error = Infallible> + Clone + Send + 'static,
        S::Response: IntoResponse + 'static,
        S::Future: Send + 'static,
    {
        let full = join_path(&self.root, path);
        self.server.handle(&full, service);
        self
    }

    /// Register a decode → invoke → encode route on `path`
    pub fn unary(&mut self, path: &str, handler: Handler) -> &mut Self {
        let full = join_path(&self.root, path);
        self.server.handle_unary(&full, handler);
        self
    }

    fn method<H, T>(&mut self, method: Option<Method>, path: &str, handler: H) -> &mut Self
    where
        H: AxumHandler<T, ()>,
        T: 'static,
    {
        let full = join_path(&self.root, path);
        self.server.register_handler(method, &full, handler);
        self
    }
}
