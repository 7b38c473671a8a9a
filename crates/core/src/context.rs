//! Request-scoped execution context
//!
//! A [`Context`] carries cancellation, an optional deadline and typed
//! values through the lifetime of a request. Contexts form a tree: a
//! child is cancelled whenever its parent is, never outlives its parent's
//! deadline, and sees every value stored on its ancestors.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// Cheap-to-clone handle for cancellation, deadline and request values
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    parent: Option<Context>,
    token: CancellationToken,
    deadline: Option<Instant>,
    value: Option<(TypeId, Arc<dyn Any + Send + Sync>)>,
}

/// Cancels the context it was created with when dropped
#[must_use = "dropping the guard cancels the context immediately"]
pub struct CancelGuard {
    token: CancellationToken,
}

impl CancelGuard {
    /// Cancel the associated context now
    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// Root context: never cancelled, no deadline, no values
    pub fn background() -> Self {
        Self {
            inner: Arc::new(Inner {
                parent: None,
                token: CancellationToken::new(),
                deadline: None,
                value: None,
            }),
        }
    }

    /// Derive a child that is cancelled when the returned guard drops
    pub fn with_cancel(&self) -> (Context, CancelGuard) {
        self.derive(self.inner.deadline)
    }

    /// Derive a child whose deadline is `now + timeout`
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelGuard) {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child with the given deadline, capped by the parent's
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelGuard) {
        let deadline = match self.inner.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        self.derive(Some(deadline))
    }

    /// Derive a child carrying `value`, keyed by its type
    pub fn with_value<T>(&self, value: T) -> Context
    where
        T: Send + Sync + 'static,
    {
        Context {
            inner: Arc::new(Inner {
                parent: Some(self.clone()),
                token: self.inner.token.clone(),
                deadline: self.inner.deadline,
                value: Some((TypeId::of::<T>(), Arc::new(value))),
            }),
        }
    }

    /// Look up the nearest value of type `T`
    pub fn value<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some((id, value)) = &ctx.inner.value {
                if *id == TypeId::of::<T>() {
                    return value.downcast_ref::<T>();
                }
            }
            current = ctx.inner.parent.as_ref();
        }
        None
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the context was cancelled or its deadline has passed
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Why the context is done, or `None` while it is still live
    pub fn err(&self) -> Option<Error> {
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Some(Error::DeadlineExceeded);
            }
        }
        if self.inner.token.is_cancelled() {
            return Some(Error::Canceled);
        }
        None
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }
    }

    fn derive(&self, deadline: Option<Instant>) -> (Context, CancelGuard) {
        let token = self.inner.token.child_token();
        let ctx = Context {
            inner: Arc::new(Inner {
                parent: Some(self.clone()),
                token: token.clone(),
                deadline,
                value: None,
            }),
        };
        (ctx, CancelGuard { token })
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("cancelled", &self.inner.token.is_cancelled())
            .finish_non_exhaustive()
    }
}
