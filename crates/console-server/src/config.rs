//! Server configuration.

use std::net::SocketAddr;

use console_protocol::MAX_MESSAGE_SIZE;

use crate::entry::DeploymentMode;

/// Default listen address of the WebSocket server.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5140";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket server binds to.
    pub listen: SocketAddr,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Maximum size of a single frame, in bytes.
    pub max_frame_size: usize,

    /// Selects the development or production assets of entries.
    pub mode: DeploymentMode,

    /// Fixed process identity. A random one is generated when unset.
    pub process_id: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
            max_connections: 100,
            max_frame_size: MAX_MESSAGE_SIZE,
            mode: DeploymentMode::Production,
            process_id: None,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration listening on `listen`.
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            ..Default::default()
        }
    }

    /// Builder: set max connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Builder: set max frame size.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Builder: set deployment mode.
    pub fn with_mode(mut self, mode: DeploymentMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder: pin the process identity.
    pub fn with_process_id(mut self, id: impl Into<String>) -> Self {
        self.process_id = Some(id.into());
        self
    }
}

/// Returns the default listen address.
pub fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5140))
}
