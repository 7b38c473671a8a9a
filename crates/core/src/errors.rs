//! Error types shared by Ferrule transports

use thiserror::Error;

/// Errors surfaced by servers, codecs, handlers and contexts
#[derive(Error, Debug)]
pub enum Error {
    #[error("Route not found: {path}")]
    NotFound { path: String },

    #[error("Method {method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("Bad request: {reason}")]
    BadRequest { reason: String },

    #[error("Unsupported media type: {content_type}")]
    UnsupportedMediaType { content_type: String },

    #[error("Decode error: {source}")]
    Decode { source: serde_json::Error },

    #[error("Encode error: {reason}")]
    Encode { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Context deadline exceeded")]
    DeadlineExceeded,

    #[error("Context canceled")]
    Canceled,

    #[error("Failed to listen on {network} {address}: {source}")]
    Bind {
        network: String,
        address: String,
        source: std::io::Error,
    },

    #[error("Server error: {source}")]
    Serve { source: std::io::Error },

    #[error("Unknown network: {network}")]
    UnknownNetwork { network: String },

    #[error("Server already started")]
    AlreadyStarted,

    #[error("Server closed")]
    ServerClosed,
}

impl Error {
    /// Shorthand for [`Error::BadRequest`]
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Error::BadRequest {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::Internal`]
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable reason, used by error encoders
    pub fn reason(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "NOT_FOUND",
            Error::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            Error::BadRequest { .. } => "BAD_REQUEST",
            Error::UnsupportedMediaType { .. } => "UNSUPPORTED_MEDIA_TYPE",
            Error::Decode { .. } => "DECODE_ERROR",
            Error::Encode { .. } => "ENCODE_ERROR",
            Error::Internal { .. } => "INTERNAL",
            Error::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Error::Canceled => "CANCELED",
            Error::Bind { .. } => "BIND_FAILED",
            Error::Serve { .. } => "SERVE_FAILED",
            Error::UnknownNetwork { .. } => "UNKNOWN_NETWORK",
            Error::AlreadyStarted => "ALREADY_STARTED",
            Error::ServerClosed => "SERVER_CLOSED",
        }
    }

    /// Whether the error came from an expired or cancelled context
    pub fn is_context_error(&self) -> bool {
        matches!(self, Error::DeadlineExceeded | Error::Canceled)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode { source: err }
    }
}
