//! Error types for the Ory MCP bridge

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token is inactive, expired, or bound to a client this proxy does not know
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token is valid but lacks a scope the endpoint requires
    #[error("Insufficient scope: missing {0}")]
    InsufficientScope(String),

    /// Client id is not registered with the authority
    #[error("Unknown client: {0}")]
    UnknownClient(String),

    /// Authority unreachable or answered with a non-success status
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// No live session under this id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Relay request carried no session id
    #[error("Missing sessionId parameter")]
    MissingSessionId,

    /// Registry stopped accepting sessions for shutdown
    #[error("Server is shutting down")]
    ShuttingDown,

    /// Session transport rejected a relayed message
    #[error("Relay failure: {0}")]
    RelayFailure(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status surfaced to callers for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope(_) => StatusCode::FORBIDDEN,
            Self::UnknownClient(_) | Self::MissingSessionId | Self::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to a caller.
    ///
    /// Upstream and internal failures collapse to a generic message so
    /// authority internals never leak into responses.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Upstream(_) | Self::Http(_) | Self::Io(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            Self::RelayFailure(_) | Self::Transport(_) => "Error handling message".to_string(),
            other => other.to_string(),
        }
    }

    /// OAuth error code (RFC 6749 / RFC 6750) for this error
    #[must_use]
    pub fn oauth_code(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "invalid_token",
            Self::InsufficientScope(_) => "insufficient_scope",
            Self::UnknownClient(_) => "invalid_client",
            Self::MissingSessionId | Self::Json(_) => "invalid_request",
            _ => "server_error",
        }
    }

    /// Whether this error comes from the authority side rather than the caller
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Http(_))
    }
}
