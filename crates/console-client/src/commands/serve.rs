//! Serve command: hosts a console hub in the foreground.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use console_server::{
    AccessDescriptor, Connection, Console, ConsoleServer, DataService, DebouncedRefresh, Entry,
    EntryFiles, HandlerError, Registration, ServiceHandle, SignalHandler,
};

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// State key of the hub's own status.
pub const STATUS_KEY: &str = "console/status";

const STATUS_DEBOUNCE: Duration = Duration::from_millis(250);

/// Value published under [`STATUS_KEY`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub connections: usize,
    pub entries: usize,
    pub uptime_secs: u64,
}

struct StatusService {
    connections: Arc<AtomicUsize>,
    entries: usize,
    started: Instant,
}

#[async_trait]
impl DataService for StatusService {
    type Value = Status;

    async fn get(&self, _forced: bool, _connection: &Connection) -> Result<Status, HandlerError> {
        Ok(Status {
            connections: self.connections.load(Ordering::Relaxed),
            entries: self.entries,
            uptime_secs: self.started.elapsed().as_secs(),
        })
    }
}

/// Everything `serve` registers on the hub. Dropping it unregisters.
pub struct Published {
    _entries: Vec<Registration>,
    _status: ServiceHandle<StatusService>,
    watcher: JoinHandle<()>,
}

impl Drop for Published {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Publishes `entries` and the status service on `console`.
pub async fn publish(console: &Console, entries: Vec<EntryFiles>) -> ClientResult<Published> {
    let entry_count = entries.len();
    let registrations = entries
        .into_iter()
        .map(|files| {
            debug!(?files, "Publishing entry");
            console.add_entry(Entry::new(files))
        })
        .collect();

    let connections = Arc::new(AtomicUsize::new(console.connection_count()));
    let status = console
        .add_service(
            STATUS_KEY,
            StatusService {
                connections: connections.clone(),
                entries: entry_count,
                started: Instant::now(),
            },
            AccessDescriptor::OPEN,
        )
        .await?;

    let refresh = DebouncedRefresh::new(console, STATUS_KEY, STATUS_DEBOUNCE);
    let mut events = console.subscribe_connections();
    let hub = console.clone();
    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    connections.store(hub.connection_count(), Ordering::Relaxed);
                    refresh.trigger();
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    Ok(Published {
        _entries: registrations,
        _status: status,
        watcher,
    })
}

/// Runs the hub until SIGINT/SIGTERM.
pub async fn run(
    config: &ClientConfig,
    listen: Option<String>,
    dev: bool,
    entries: Vec<EntryFiles>,
) -> ClientResult<()> {
    let mut settings = config.server.clone();
    if let Some(listen) = listen {
        settings.listen = listen;
    }
    settings.dev_mode |= dev;

    let console = Console::new(settings.server_config()?);
    let _published = publish(&console, entries).await?;

    let server = ConsoleServer::bind(console.clone()).await?;
    info!(
        addr = %server.local_addr(),
        process = %console.process_id(),
        "Console listening"
    );

    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();
    server.run_until_shutdown(signal_handler.shutdown()).await?;

    info!("Console stopped");
    Ok(())
}
