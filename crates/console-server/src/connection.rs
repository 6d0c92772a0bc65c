//! Server-side connection: identity, outbound queue, and the session loop.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{Span, debug, trace, warn};

use console_core::random_id;
use console_protocol::{
    Envelope, FrameSink, FrameStream, ProtocolError, Request, ResponseBody, RpcError, Transport,
    TransportError, decode_frame, encode_frame, peek_request_id,
};

use crate::console::Console;
use crate::error::ServerResult;

/// Opaque, random identifier of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generates a fresh identifier.
    pub fn generate() -> Self {
        Self(random_id())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request metadata captured when the transport was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMeta {
    /// Remote socket address, if the transport is a network socket.
    pub peer_addr: Option<SocketAddr>,
    /// Request path of the WebSocket upgrade.
    pub path: Option<String>,
    /// `User-Agent` header of the upgrade request.
    pub user_agent: Option<String>,
}

impl ConnectionMeta {
    /// Metadata of an in-process (embedded) connection.
    pub fn in_process() -> Self {
        Self {
            path: Some("in-process".into()),
            ..Default::default()
        }
    }

    /// Builder: set the peer address.
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Builder: set the request path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Builder: set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(String),
    Close,
}

/// One live transport session.
///
/// Cheap to clone. Holds no provider state; collaborators that need
/// per-connection state key a side table by [`Connection::id`].
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: ConnectionId,
    meta: ConnectionMeta,
    outbound: mpsc::UnboundedSender<Outbound>,
    max_frame_size: usize,
}

impl Connection {
    pub(crate) fn new(
        meta: ConnectionMeta,
        max_frame_size: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::generate(),
                meta,
                outbound,
                max_frame_size,
            }),
        };
        (connection, rx)
    }

    /// Returns the connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    /// Returns the metadata captured at open.
    pub fn meta(&self) -> &ConnectionMeta {
        &self.inner.meta
    }

    /// Serializes and queues a frame. There is no backpressure: frames are
    /// written in queue order by the session's writer task.
    pub fn send(&self, envelope: &Envelope) -> ServerResult<()> {
        let text = match encode_frame(envelope, self.inner.max_frame_size) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    connection = %self.inner.id,
                    kind = %envelope.kind,
                    error = %e,
                    "Refusing to send frame"
                );
                return Err(e.into());
            }
        };
        self.inner
            .outbound
            .send(Outbound::Frame(text))
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    /// Asks the session to close the transport after flushing queued frames.
    pub fn close(&self) {
        let _ = self.inner.outbound.send(Outbound::Close);
    }

    /// Returns true once the writer side has shut down.
    pub fn is_closed(&self) -> bool {
        self.inner.outbound.is_closed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("meta", &self.inner.meta)
            .finish()
    }
}

/// Drives one transport until it closes.
pub(crate) async fn run_session<T: Transport>(
    console: Console,
    transport: T,
    meta: ConnectionMeta,
) {
    let (mut sink, mut stream) = transport.split();
    let max_frame_size = console.config().max_frame_size;
    let (connection, mut outbound) = Connection::new(meta, max_frame_size);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            match message {
                Outbound::Frame(text) => {
                    if let Err(e) = sink.send_text(text).await {
                        debug!(error = %e, "Failed to write frame");
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
        if let Err(e) = sink.close().await {
            trace!(error = %e, "Error closing transport");
        }
    });

    console.register_connection(connection.clone());

    let sweep = {
        let console = console.clone();
        let connection = connection.clone();
        tokio::spawn(async move { console.refresh_connection(&connection).await })
    };

    while let Some(frame) = stream.next_text().await {
        match frame {
            Ok(text) => handle_frame(&console, &connection, text),
            Err(e) => {
                debug!(connection = %connection.id(), error = %e, "Transport error");
                break;
            }
        }
    }

    sweep.abort();
    console.unregister_connection(connection.id());
    connection.close();
    drop(connection);
    let _ = writer.await;
}

fn handle_frame(console: &Console, connection: &Connection, text: String) {
    let max_frame_size = console.config().max_frame_size;
    match decode_frame::<Request>(&text, max_frame_size) {
        Ok(request) => {
            trace!(connection = %connection.id(), id = %request.id, "Request received");
            tokio::spawn(dispatch(console.clone(), connection.clone(), request));
        }
        Err(ProtocolError::MessageTooLarge { size, max }) => {
            warn!(connection = %connection.id(), size, max, "Dropping oversized frame");
        }
        Err(e) => match peek_request_id(&text) {
            Some(id) => {
                let reason = match &e {
                    ProtocolError::Serialization(inner) => inner.to_string(),
                    other => other.to_string(),
                };
                debug!(
                    connection = %connection.id(),
                    id = %id,
                    reason = %reason,
                    "Invalid request"
                );
                let body = ResponseBody::err(id, RpcError::InvalidRequest(reason));
                let _ = connection.send(&Envelope::response(body));
            }
            None => warn!(connection = %connection.id(), error = %e, "Dropping malformed frame"),
        },
    }
}

#[tracing::instrument(
    skip_all,
    fields(connection = %connection.id(), method = %request.method, duration_ms)
)]
async fn dispatch(console: Console, connection: Connection, request: Request) {
    let start = Instant::now();
    let body = console.handle_request(&connection, request).await;
    Span::current().record("duration_ms", start.elapsed().as_millis() as u64);
    if let Err(e) = connection.send(&Envelope::response(body)) {
        debug!(error = %e, "Failed to send response");
    }
}
