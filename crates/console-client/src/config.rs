//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/console/config.toml` by default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use console_server::{DEFAULT_LISTEN, DeploymentMode, ServerConfig};
use serde::{Deserialize, Serialize};

use crate::client::ClientOptions;
use crate::connector::WebSocketConnector;
use crate::error::{ClientError, ClientResult};

/// Endpoint used when neither the config nor the command line names one.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:5140";

/// Configuration for the console client and the `serve` command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug output, same as `--debug`.
    pub debug: bool,

    /// Connection settings.
    pub connection: ConnectionSettings,

    /// Settings for hosting a console.
    pub server: ServerSettings,
}

/// How the client reaches a console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,

    /// Seconds an RPC waits for its response.
    pub request_timeout_secs: u64,

    /// Pause between reconnect attempts, in milliseconds.
    pub reconnect_delay_ms: u64,

    /// Consecutive failed reconnects before giving up. Unset retries forever.
    pub max_reconnect_attempts: Option<u32>,

    /// Quiet seconds before a heartbeat ping.
    pub heartbeat_interval_secs: Option<u64>,

    /// Quiet seconds before the connection is dropped.
    pub heartbeat_timeout_secs: Option<u64>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            request_timeout_secs: 60,
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: None,
            heartbeat_interval_secs: None,
            heartbeat_timeout_secs: None,
        }
    }
}

impl ConnectionSettings {
    /// Client options described by these settings.
    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::default()
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_reconnect_delay(Duration::from_millis(self.reconnect_delay_ms));
        if let Some(attempts) = self.max_reconnect_attempts {
            options = options.with_max_reconnect_attempts(attempts);
        }
        if let (Some(interval), Some(timeout)) =
            (self.heartbeat_interval_secs, self.heartbeat_timeout_secs)
        {
            options = options.with_heartbeat(
                Duration::from_secs(interval),
                Duration::from_secs(timeout),
            );
        }
        options
    }
}

/// Settings for `console serve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind.
    pub listen: String,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Serve development assets of entries.
    pub dev_mode: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            max_connections: 100,
            dev_mode: false,
        }
    }
}

impl ServerSettings {
    /// Hub configuration described by these settings.
    pub fn server_config(&self) -> ClientResult<ServerConfig> {
        let listen: SocketAddr = self.listen.parse().map_err(|e| {
            ClientError::Config(format!("invalid listen address '{}': {}", self.listen, e))
        })?;
        let mode = if self.dev_mode {
            DeploymentMode::Development
        } else {
            DeploymentMode::Production
        };
        Ok(ServerConfig::new(listen)
            .with_max_connections(self.max_connections)
            .with_mode(mode))
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Checks values that deserialize fine but cannot be used.
    pub fn validate(&self) -> ClientResult<()> {
        WebSocketConnector::new(&self.connection.url)?;
        self.server.server_config()?;

        let connection = &self.connection;
        if connection.request_timeout_secs == 0 {
            return Err(ClientError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        match (
            connection.heartbeat_interval_secs,
            connection.heartbeat_timeout_secs,
        ) {
            (Some(interval), Some(timeout)) if timeout <= interval => {
                Err(ClientError::Config(
                    "heartbeat_timeout_secs must exceed heartbeat_interval_secs".to_string(),
                ))
            }
            (Some(_), None) | (None, Some(_)) => Err(ClientError::Config(
                "heartbeat_interval_secs and heartbeat_timeout_secs must be set together"
                    .to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("console")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.connection.url, DEFAULT_URL);
        let options = config.connection.client_options();
        assert_eq!(options.request_timeout, Duration::from_secs(60));
        assert_eq!(options.reconnect_delay, Duration::from_secs(1));
        assert!(options.heartbeat.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[connection]
url = "wss://console.example.com/ws"
heartbeat_interval_secs = 10
heartbeat_timeout_secs = 30

[server]
dev_mode = true
"#
        )
        .unwrap();

        let config = ClientConfig::load_from(file.path()).unwrap();
        assert_eq!(config.connection.url, "wss://console.example.com/ws");
        assert_eq!(config.connection.reconnect_delay_ms, 1000);
        assert_eq!(config.server.listen, DEFAULT_LISTEN);

        let options = config.connection.client_options();
        assert_eq!(options.heartbeat.map(|h| h.interval), Some(Duration::from_secs(10)));

        let server = config.server.server_config().unwrap();
        assert_eq!(server.mode, DeploymentMode::Development);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_flag_is_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "debug = true\n").unwrap();
        let config = ClientConfig::load_from(&path).unwrap();
        assert!(config.debug);
        assert_eq!(config.connection, ConnectionSettings::default());
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "connection = 5").unwrap();
        let err = ClientConfig::load_from(&path).unwrap_err();
        assert!(err.starts_with("failed to parse config"));

        let err = ClientConfig::load_from(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.starts_with("failed to read config"));
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let mut config = ClientConfig::default();
        config.connection.url = "http://localhost".to_string();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.connection.heartbeat_interval_secs = Some(10);
        assert!(config.validate().is_err());
        config.connection.heartbeat_timeout_secs = Some(5);
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.server.listen = "nowhere".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn dump_roundtrips_through_toml() {
        let config = ClientConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.connection, config.connection);
        assert_eq!(parsed.server, config.server);
    }
}
