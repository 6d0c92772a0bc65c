//! Per-connection authority side table.
//!
//! Authentication collaborators record what they learn about a connection
//! here instead of on the [`Connection`] itself. The table doubles as the
//! interceptor that enforces authority requirements.
//!
//! Policy, a single total order: a connection without an entry has
//! authority `0`, a descriptor without a requirement requires `0`, and
//! delivery is vetoed iff the requirement exceeds the connection's level.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionId};
use crate::console::{Console, ConnectionEvent};
use crate::intercept::{AccessDescriptor, Interceptor};
use crate::registration::Registration;

/// What the authentication collaborator knows about one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    /// Authenticated user, if any.
    pub user: Option<String>,
    /// Authority level of that user.
    pub authority: u32,
}

impl AuthState {
    /// An authenticated user with the given authority.
    pub fn user(user: impl Into<String>, authority: u32) -> Self {
        Self {
            user: Some(user.into()),
            authority,
        }
    }
}

/// Returns true if a connection at `current` must not receive something
/// that requires `required`.
pub fn authority_vetoes(required: Option<u32>, current: Option<u32>) -> bool {
    required.unwrap_or(0) > current.unwrap_or(0)
}

/// Map from connection id to [`AuthState`]. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct AuthorityTable {
    states: Arc<RwLock<HashMap<ConnectionId, AuthState>>>,
}

impl AuthorityTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the table as an interceptor on `console` and forgets
    /// connections as they close. If the watcher falls behind the event
    /// channel, the table is pruned to the connections still open.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn install(&self, console: &Console) -> Registration {
        let mut interceptor = console.add_interceptor(self.clone());

        let table = self.clone();
        let hub = console.downgrade();
        let mut events = console.subscribe_connections();
        let watcher = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ConnectionEvent::Closed(id)) => {
                        table.remove(&id);
                    }
                    Ok(ConnectionEvent::Opened(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        let Some(console) = hub.upgrade() else { break };
                        let live: HashSet<ConnectionId> = console
                            .connections()
                            .iter()
                            .map(|connection| connection.id().clone())
                            .collect();
                        let pruned = table.retain_live(&live);
                        warn!(skipped, pruned, "Authority table missed connection events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Registration::new("authority-table", move || {
            interceptor.dispose();
            watcher.abort();
        })
    }

    /// Records the state of a connection, replacing any previous one.
    pub fn set(&self, id: ConnectionId, state: AuthState) {
        debug!(connection = %id, authority = state.authority, "Authority set");
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, state);
    }

    /// Returns the state of a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<AuthState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Returns the authority of a connection, if it has authenticated.
    pub fn authority(&self, id: &ConnectionId) -> Option<u32> {
        self.get(id).map(|state| state.authority)
    }

    /// Forgets a connection.
    pub fn remove(&self, id: &ConnectionId) -> Option<AuthState> {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Drops every state whose connection is not in `live`. Returns how
    /// many were dropped.
    fn retain_live(&self, live: &HashSet<ConnectionId>) -> usize {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let before = states.len();
        states.retain(|id, _| live.contains(id));
        before - states.len()
    }

    /// Number of connections with a recorded state.
    pub fn len(&self) -> usize {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no connection has a recorded state.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Interceptor for AuthorityTable {
    async fn intercept(&self, connection: &Connection, access: &AccessDescriptor) -> bool {
        authority_vetoes(access.authority, self.authority(connection.id()))
    }
}
