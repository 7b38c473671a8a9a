//! Handler and middleware model
//!
//! A [`Handler`] turns a decoded request payload into a reply within a
//! [`Context`]. A [`Middleware`] wraps one handler into another to add
//! cross-cutting behaviour. Servers hold exactly one middleware; use
//! [`chain`] to compose several into that slot.

mod logging;
mod recovery;

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::{Context, Result};

pub use logging::logging;
pub use recovery::recovery;

/// Transport-agnostic request handler
pub type Handler = Arc<dyn Fn(Context, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Function transforming one handler into another
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Build a [`Handler`] from an async function or closure
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |ctx: Context, req: Value| -> BoxFuture<'static, Result<Value>> {
        Box::pin(f(ctx, req))
    })
}

/// Build a [`Middleware`] from a closure
pub fn middleware_fn<F>(f: F) -> Middleware
where
    F: Fn(Handler) -> Handler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Compose middlewares into one; the first element is the outermost
pub fn chain<I>(middlewares: I) -> Middleware
where
    I: IntoIterator<Item = Middleware>,
{
    let middlewares: Vec<Middleware> = middlewares.into_iter().collect();
    Arc::new(move |handler: Handler| -> Handler {
        middlewares
            .iter()
            .rev()
            .fold(handler, |next, middleware| middleware(next))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn tagging(tag: &'static str, trace: Arc<Mutex<Vec<String>>>) -> Middleware {
        middleware_fn(move |next: Handler| {
            let trace = Arc::clone(&trace);
            handler_fn(move |ctx, req| {
                let next = Arc::clone(&next);
                let trace = Arc::clone(&trace);
                async move {
                    trace.lock().unwrap().push(format!("{tag}:before"));
                    let reply = next(ctx, req).await;
                    trace.lock().unwrap().push(format!("{tag}:after"));
                    reply
                }
            })
        })
    }

    #[tokio::test]
    async fn test_handler_fn_passes_payload() {
        let handler = handler_fn(|_ctx, req| async move { Ok(json!({ "got": req })) });
        let reply = handler(Context::background(), json!(1)).await.unwrap();
        assert_eq!(reply, json!({ "got": 1 }));
    }

    #[tokio::test]
    async fn test_chain_runs_first_middleware_outermost() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let composed = chain([
            tagging("outer", Arc::clone(&trace)),
            tagging("inner", Arc::clone(&trace)),
        ]);

        let handler = composed(handler_fn(|_ctx, req| async move { Ok(req) }));
        handler(Context::background(), json!(null)).await.unwrap();

        assert_eq!(
            *trace.lock().unwrap(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let handler = chain(Vec::new())(handler_fn(|_ctx, req| async move { Ok(req) }));
        let reply = handler(Context::background(), json!("same")).await.unwrap();
        assert_eq!(reply, json!("same"));
    }
}
