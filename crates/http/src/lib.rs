//! HTTP transport for Ferrule
//!
//! This crate wraps axum's router and server behind a small configurable
//! [`Server`]: functional options, a per-request timeout context, one
//! middleware slot, and pluggable request/response/error codecs. Route
//! matching, connection handling and HTTP parsing stay with axum and hyper.

pub mod codec;
pub mod info;
mod listener;
pub mod route;
pub mod router;
pub mod server;

pub use codec::{Codec, DecodeRequestFn, EncodeErrorFn, EncodeResponseFn};
pub use info::{RequestHead, ResponseWriter, ServerInfo};
pub use route::RouteGroup;
pub use router::{AxumRouter, RouteService, Router};
pub use server::{Server, ServerConfig, ServerOption, ServerOptions, State};

pub use ferrule_core::{Context, Error, Result};

/// Request type accepted by the server and by registered routes
pub type Request = axum::extract::Request;

/// Response type produced by the server and by registered routes
pub type Response = axum::response::Response;
