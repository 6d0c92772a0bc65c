//! Console hub: connections, listeners, data services and entries.
//!
//! Providers register state and remote procedures on a shared [`Console`]:
//!
//! - [`Console::add_listener`] exposes an RPC method,
//! - [`Console::add_service`] publishes a keyed [`DataService`],
//! - [`Console::add_entry`] contributes a UI bundle to the `entry` key,
//! - [`Console::add_interceptor`] installs an authorization policy.
//!
//! Every registration returns a guard that unregisters on drop.
//!
//! # Example
//!
//! ```rust,no_run
//! use console_server::{AccessDescriptor, Console, ConsoleServer, HandlerError, ServerConfig};
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let console = Console::new(ServerConfig::default());
//!     let _echo = console.add_listener(
//!         "echo",
//!         |_, args: Vec<Value>| async move { Ok::<_, HandlerError>(json!(args)) },
//!         AccessDescriptor::OPEN,
//!     );
//!
//!     let server = ConsoleServer::bind(console).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

mod auth;
mod config;
mod connection;
mod console;
mod debounce;
mod entry;
mod error;
mod intercept;
mod registration;
mod server;
mod service;
mod signals;

#[cfg(test)]
mod test_support;

pub use auth::{AuthState, AuthorityTable, authority_vetoes};
pub use config::{DEFAULT_LISTEN, ServerConfig, default_listen_addr};
pub use connection::{Connection, ConnectionId, ConnectionMeta};
pub use console::{Console, ConnectionEvent, ListenerFn, ListenerFuture};
pub use debounce::DebouncedRefresh;
pub use entry::{
    AssetResolver, DefaultAssetResolver, DeploymentMode, Entry, EntryDataFn, EntryFiles,
    EntrySet, EntryView,
};
pub use error::{HandlerError, ServerError, ServerResult};
pub use intercept::{AccessDescriptor, Interceptor};
pub use registration::Registration;
pub use server::ConsoleServer;
pub use service::{DataService, ServiceHandle};
pub use signals::SignalHandler;
