//! Transport abstraction
//!
//! [`Server`] is what an application runner starts and stops, whatever the
//! wire protocol. Requests dispatched by a server carry a [`Transport`] tag
//! in their context saying which kind of server received them.

use std::fmt;

use async_trait::async_trait;

use crate::{Context, Result};

/// Kind of transport that received a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Http,
    Grpc,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Http => "HTTP",
            Kind::Grpc => "GRPC",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport metadata attached to every dispatched request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub kind: Kind,
}

impl Transport {
    pub fn new(kind: Kind) -> Self {
        Self { kind }
    }
}

/// A transport server with a start/stop lifecycle
#[async_trait]
pub trait Server: Send + Sync {
    /// Kind of transport this server speaks
    fn kind(&self) -> Kind;

    /// Serve until stopped or `ctx` is done
    async fn start(&self, ctx: &Context) -> Result<()>;

    /// Shut down gracefully, giving up once `ctx` is done
    async fn stop(&self, ctx: &Context) -> Result<()>;
}

/// Attach `transport` to a child of `ctx`
pub fn new_context(ctx: &Context, transport: Transport) -> Context {
    ctx.with_value(transport)
}

/// Transport the request in `ctx` arrived on, if it was tagged
pub fn from_context(ctx: &Context) -> Option<Transport> {
    ctx.value::<Transport>().cloned()
}
