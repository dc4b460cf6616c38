//! Error taxonomy for repository operations.
//!
//! # Design
//! `AuthorizationDenied` and `NotFound` get dedicated variants because callers
//! branch on them. Every other status outside an operation's success set
//! lands in `UnexpectedStatus`. Status-bearing variants keep the server's
//! message and optional error kind so the caller can decide on retries; the
//! repository itself never retries.

use serde_json::Value;

use crate::http::HttpResponse;

const GENERIC_MESSAGE: &str = "remote error";

/// Failure reported by a [`Transport`](crate::Transport) before any HTTP
/// status was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport failure: {0}")]
    Other(String),
}

/// Errors returned by `RemoteRepository` operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// 403 on an authorized operation.
    #[error("authorization denied: {message}")]
    AuthorizationDenied { message: String, kind: Option<String> },

    /// 404 when the caller did not opt into soft-miss semantics.
    #[error("not found: {message}")]
    NotFound { message: String, kind: Option<String> },

    /// Any status outside the operation's declared success set.
    #[error("{message} (status {status})")]
    UnexpectedStatus {
        status: u16,
        message: String,
        kind: Option<String>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server sent a type tag no local record type is registered for.
    #[error("unknown record type: {0}")]
    UnknownType(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("serialization failed: {0}")]
    SerializationError(String),

    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

impl RepositoryError {
    /// HTTP status attached to the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            RepositoryError::AuthorizationDenied { .. } => Some(403),
            RepositoryError::NotFound { .. } => Some(404),
            RepositoryError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-supplied error kind (the `type` field of a structured body).
    pub fn kind(&self) -> Option<&str> {
        match self {
            RepositoryError::AuthorizationDenied { kind, .. }
            | RepositoryError::NotFound { kind, .. }
            | RepositoryError::UnexpectedStatus { kind, .. } => kind.as_deref(),
            _ => None,
        }
    }
}

/// Convert a non-success response into a [`RepositoryError`].
///
/// The message is read from a JSON body's `message` field, then `error`,
/// falling back to a generic text when the body is absent or not JSON.
pub fn map_error(response: &HttpResponse) -> RepositoryError {
    let body: Option<Value> = serde_json::from_str(&response.body).ok();
    let field = |name: &str| {
        body.as_ref()
            .and_then(|b| b.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let message = field("message")
        .or_else(|| field("error"))
        .unwrap_or_else(|| GENERIC_MESSAGE.to_string());
    let kind = field("type");

    match response.status {
        403 => RepositoryError::AuthorizationDenied { message, kind },
        404 => RepositoryError::NotFound { message, kind },
        status => RepositoryError::UnexpectedStatus { status, message, kind },
    }
}
