//! Ways of opening a transport to a console.

use async_trait::async_trait;
use console_protocol::{MemoryTransport, Transport, WebSocketTransport};
use console_server::Console;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, connect_async};
use tracing::debug;
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Opens a fresh transport each time the client (re)connects.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Transport produced by this connector.
    type Transport: Transport;

    /// Opens one transport.
    async fn connect(&self) -> ClientResult<Self::Transport>;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;
}

/// Connects over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    /// Parses and validates a `ws://` or `wss://` endpoint.
    pub fn new(url: &str) -> ClientResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| ClientError::Config(format!("invalid console url '{}': {}", url, e)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(ClientError::Config(format!(
                "unsupported console url scheme '{}' (expected ws or wss)",
                other
            ))),
        }
    }

    /// The endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport<MaybeTlsStream<TcpStream>>;

    async fn connect(&self) -> ClientResult<Self::Transport> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| {
                ClientError::Connection(format!("failed to connect to {}: {}", self.url, e))
            })?;
        debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");
        Ok(WebSocketTransport::new(stream))
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

/// Connects to a console hosted in the same process.
#[derive(Debug, Clone)]
pub struct EmbeddedConnector {
    console: Console,
}

impl EmbeddedConnector {
    /// Creates a connector for `console`.
    pub fn new(console: Console) -> Self {
        Self { console }
    }
}

#[async_trait]
impl Connector for EmbeddedConnector {
    type Transport = MemoryTransport;

    async fn connect(&self) -> ClientResult<MemoryTransport> {
        Ok(self.console.connect_in_process())
    }

    fn endpoint(&self) -> String {
        format!("in-process:{}", self.console.process_id())
    }
}
