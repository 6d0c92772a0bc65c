//! Client side of the console protocol and the `console` command-line tool.
//!
//! [`ConsoleClient`] mirrors the state a console publishes into a local
//! [`Store`] and issues RPCs with correlation ids and timeouts. It reconnects
//! on its own and reports everything through [`ClientEvent`]s.

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod connector;
pub mod error;
pub mod rpc;
pub mod store;

pub use cli::Cli;
pub use client::{ClientEvent, ClientOptions, ConnectionState, ConsoleClient, Heartbeat};
pub use config::ClientConfig;
pub use connector::{Connector, EmbeddedConnector, WebSocketConnector};
pub use error::{ClientError, ClientResult};
pub use rpc::PendingRequests;
pub use store::Store;
