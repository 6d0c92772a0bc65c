//! In-process transport for deployments where console and host share a
//! process, and for tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{FrameSink, FrameStream, Transport};
use crate::error::{TransportError, TransportResult};

/// Creates two connected in-process transports.
///
/// Frames sent on one end arrive on the other. Closing or dropping one end's
/// sink ends the other end's stream.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport { tx: a_tx, rx: b_rx },
        MemoryTransport { tx: b_tx, rx: a_rx },
    )
}

/// One end of an in-process transport pair.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Transport for MemoryTransport {
    type Sink = MemorySink;
    type Stream = MemoryStream;

    fn split(self) -> (MemorySink, MemoryStream) {
        (MemorySink { tx: Some(self.tx) }, MemoryStream { rx: self.rx })
    }
}

/// Write half of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> TransportResult<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.tx = None;
        Ok(())
    }
}

/// Read half of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn next_text(&mut self) -> Option<TransportResult<String>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_the_pair() {
        let (left, right) = pair();
        let (mut left_tx, mut left_rx) = left.split();
        let (mut right_tx, mut right_rx) = right.split();

        left_tx.send_text("hello".into()).await.unwrap();
        assert_eq!(right_rx.next_text().await.unwrap().unwrap(), "hello");

        right_tx.send_text("world".into()).await.unwrap();
        assert_eq!(left_rx.next_text().await.unwrap().unwrap(), "world");
    }

    #[tokio::test]
    async fn close_ends_peer_stream() {
        let (left, right) = pair();
        let (mut left_tx, _left_rx) = left.split();
        let (_right_tx, mut right_rx) = right.split();

        left_tx.send_text("last".into()).await.unwrap();
        left_tx.close().await.unwrap();

        assert_eq!(right_rx.next_text().await.unwrap().unwrap(), "last");
        assert!(right_rx.next_text().await.is_none());
        assert!(matches!(
            left_tx.send_text("late".into()).await,
            Err(TransportError::Closed)
        ));
    }
}
