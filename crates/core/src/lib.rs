//! Ferrule core types
//!
//! This crate defines the pieces shared by every Ferrule transport: the
//! request-scoped execution [`Context`], the transport tag stored in it,
//! the handler/middleware model and the common [`Error`] type.

pub mod context;
pub mod errors;
pub mod log;
pub mod middleware;
pub mod transport;

pub use context::{CancelGuard, Context};
pub use errors::Error;
pub use log::Logger;
pub use middleware::{Handler, Middleware};
pub use transport::{Kind, Transport};

/// Result type for Ferrule operations
pub type Result<T> = std::result::Result<T, Error>;
