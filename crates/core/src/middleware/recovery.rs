use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use super::{handler_fn, middleware_fn, Handler, Middleware};
use crate::{Error, Logger};

/// Turn a panicking handler into an [`Error::Internal`] reply
pub fn recovery(logger: Logger) -> Middleware {
    middleware_fn(move |next: Handler| {
        let logger = logger.clone();
        handler_fn(move |ctx, req| {
            let next = Arc::clone(&next);
            let logger = logger.clone();
            async move {
                match AssertUnwindSafe(async move { next(ctx, req).await })
                    .catch_unwind()
                    .await
                {
                    Ok(reply) => reply,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        logger.error(format_args!("handler panicked: {message}"));
                        Err(Error::internal(format!("handler panicked: {message}")))
                    }
                }
            }
        })
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
