//! Protocol and transport error types.

use thiserror::Error;

/// Result type for frame encoding and decoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("frame too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Frame is not valid JSON for the expected shape.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Empty frame received.
    #[error("empty frame")]
    EmptyMessage,

    /// A reserved frame type carried a body of the wrong shape.
    #[error("malformed '{kind}' frame: {reason}")]
    MalformedFrame { kind: String, reason: String },
}

impl ProtocolError {
    /// Creates a malformed frame error.
    pub fn malformed(kind: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedFrame {
            kind: kind.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport was closed and can no longer carry frames.
    #[error("transport closed")]
    Closed,

    /// WebSocket protocol or I/O failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
