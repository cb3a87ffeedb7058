//! Error types for inhook

use std::io;
use thiserror::Error;

/// Result type for inhook operations
pub type Result<T> = std::result::Result<T, InhookError>;

/// Errors that can occur in inhook
#[derive(Debug, Error)]
pub enum InhookError {
    /// No session is registered under the given id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Reasons an event could not be pushed to an observer.
///
/// These never leave the registry: the event stays recorded and the failure
/// is swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    /// The receiving side of the link is gone
    #[error("observer link closed")]
    Closed,

    /// The link buffer is full
    #[error("observer link is backed up")]
    Backpressure,
}
