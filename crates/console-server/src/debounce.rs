//! Trailing-edge debounced refresh.
//!
//! Upstream events (a file watcher, a config reload) often fire in bursts.
//! [`DebouncedRefresh`] swallows the burst and refreshes the data service
//! once, after the events have been quiet for the configured window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::console::Console;

/// Debounced `refresh(true)` of one data service key.
#[derive(Debug)]
pub struct DebouncedRefresh {
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl DebouncedRefresh {
    /// Spawns the debounce task for `key`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(console: &Console, key: impl Into<String>, window: Duration) -> Self {
        let notify = Arc::new(Notify::new());
        let key = key.into();
        let console = console.clone();
        let trigger = notify.clone();

        let task = tokio::spawn(async move {
            loop {
                trigger.notified().await;
                loop {
                    tokio::select! {
                        _ = trigger.notified() => trace!(key = %key, "Refresh postponed"),
                        _ = tokio::time::sleep(window) => break,
                    }
                }
                let reached = console.refresh_service(&key, true).await;
                debug!(key = %key, connections = reached, "Debounced refresh fired");
            }
        });

        Self { notify, task }
    }

    /// Requests a refresh. Calls within one window collapse into one.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

impl Drop for DebouncedRefresh {
    fn drop(&mut self) {
        self.task.abort();
    }
}
