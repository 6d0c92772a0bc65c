//! Server error types.

use std::io;
use thiserror::Error;

use console_protocol::{ProtocolError, TransportError};

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Failure raised by a listener callback or a data service.
///
/// Anything displayable converts into it with `?` or `.into()`; the dispatch
/// boundary turns it into a `{ "message": .. }` wire error.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (socket bind, accept).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (framing, encoding).
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport error (connection closed, websocket failure).
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A data service is already registered under this key.
    #[error("Data service already registered: {key}")]
    DuplicateService { key: String },

    /// Shutdown requested.
    #[error("Server shutdown requested")]
    Shutdown,
}

impl ServerError {
    /// Creates a duplicate service error.
    pub fn duplicate_service(key: impl Into<String>) -> Self {
        Self::DuplicateService { key: key.into() }
    }
}
