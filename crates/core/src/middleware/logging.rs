use std::sync::Arc;

use tokio::time::Instant;

use super::{handler_fn, middleware_fn, Handler, Middleware};
use crate::{transport, Logger};

/// Log the outcome and latency of every handled request
pub fn logging(logger: Logger) -> Middleware {
    middleware_fn(move |next: Handler| {
        let logger = logger.clone();
        handler_fn(move |ctx, req| {
            let next = Arc::clone(&next);
            let logger = logger.clone();
            async move {
                let kind = transport::from_context(&ctx)
                    .map(|t| t.kind.as_str())
                    .unwrap_or("UNKNOWN");
                let started = Instant::now();
                let reply = next(ctx, req).await;
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

                logger.in_scope(|| match &reply {
                    Ok(_) => tracing::info!(
                        module = %logger.module(),
                        kind,
                        latency_ms,
                        "request handled"
                    ),
                    Err(err) => tracing::warn!(
                        module = %logger.module(),
                        kind,
                        latency_ms,
                        reason = err.reason(),
                        error = %err,
                        "request failed"
                    ),
                });
                reply
            }
        })
    })
}
