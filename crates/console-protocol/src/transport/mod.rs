//! Message-oriented transport abstraction.
//!
//! The protocol only needs whole text frames in both directions and a close
//! signal, so the same hub and client logic runs over a WebSocket or over an
//! in-process channel pair.

use async_trait::async_trait;

use crate::error::TransportResult;

pub mod memory;
pub mod websocket;

pub use memory::{MemoryTransport, pair};
pub use websocket::WebSocketTransport;

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Sends one text frame.
    async fn send_text(&mut self, text: String) -> TransportResult<()>;

    /// Closes the transport. The peer's stream ends.
    async fn close(&mut self) -> TransportResult<()>;
}

/// Read half of a transport.
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Waits for the next text frame.
    ///
    /// Returns `None` once the transport is closed, whether cleanly or not.
    async fn next_text(&mut self) -> Option<TransportResult<String>>;
}

/// A bidirectional, message-oriented connection.
pub trait Transport: Send + 'static {
    /// Write half.
    type Sink: FrameSink;
    /// Read half.
    type Stream: FrameStream;

    /// Splits the transport so both halves can be driven concurrently.
    fn split(self) -> (Self::Sink, Self::Stream);
}
