//! WebSocket listener.
//!
//! Accepts TCP connections, performs the WebSocket upgrade, and hands each
//! socket to the hub as one connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};

use console_protocol::WebSocketTransport;

use crate::connection::ConnectionMeta;
use crate::console::Console;
use crate::error::{ServerError, ServerResult};

/// WebSocket server feeding connections into a [`Console`].
pub struct ConsoleServer {
    console: Console,
    listener: TcpListener,
    local_addr: SocketAddr,
    connection_semaphore: Arc<Semaphore>,
}

impl ConsoleServer {
    /// Binds to the listen address of the console's configuration.
    pub async fn bind(console: Console) -> ServerResult<Self> {
        let listen = console.config().listen;
        let listener = TcpListener::bind(listen).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Console server listening");

        let connection_semaphore = Arc::new(Semaphore::new(console.config().max_connections));
        Ok(Self {
            console,
            listener,
            local_addr,
            connection_semaphore,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the hub served by this server.
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Waits for a connection slot and the next TCP connection.
    async fn accept(&self) -> ServerResult<(TcpStream, SocketAddr, OwnedSemaphorePermit)> {
        let permit = self
            .connection_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;
        let (stream, addr) = self.listener.accept().await?;
        debug!(peer = %addr, "Accepted TCP connection");
        Ok((stream, addr, permit))
    }

    /// Runs the accept loop. Only returns if the connection limiter closes.
    pub async fn run(&self) -> ServerResult<()> {
        loop {
            match self.accept().await {
                Ok((stream, addr, permit)) => {
                    let console = self.console.clone();
                    tokio::spawn(async move {
                        serve_socket(console, stream, addr).await;
                        drop(permit);
                    });
                }
                Err(ServerError::Shutdown) => return Err(ServerError::Shutdown),
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Runs the accept loop until `shutdown` completes.
    pub async fn run_until_shutdown<S>(&self, shutdown: S) -> ServerResult<()>
    where
        S: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run() => result,
            _ = shutdown => {
                info!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

async fn serve_socket(console: Console, stream: TcpStream, addr: SocketAddr) {
    let mut meta = ConnectionMeta::default().with_peer_addr(addr);
    let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        meta.path = Some(request.uri().path().to_owned());
        meta.user_agent = request
            .headers()
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        Ok(response)
    };
    let handshake = tokio_tungstenite::accept_hdr_async(stream, capture).await;

    match handshake {
        Ok(socket) => console.accept(WebSocketTransport::new(socket), meta).await,
        Err(e) => warn!(peer = %addr, error = %e, "WebSocket handshake failed"),
    }
}
