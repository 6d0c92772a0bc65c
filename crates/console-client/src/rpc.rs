//! Correlation of outbound requests with their responses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use console_core::short_id;
use console_protocol::{RemoteError, ResponseBody};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{ClientError, ClientResult};

/// Default time an RPC waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type Reply = Result<Value, RemoteError>;

/// Requests sent but not yet answered, keyed by correlation id.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<Reply>>>>,
}

/// Receiving end of a registered request.
#[derive(Debug)]
pub struct PendingReply {
    id: String,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    /// Correlation id to send with the request.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl PendingRequests {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Reply>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates a fresh correlation id.
    pub fn register(&self) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock();
        let mut id = short_id();
        while pending.contains_key(&id) {
            id = short_id();
        }
        pending.insert(id.clone(), tx);
        PendingReply { id, rx }
    }

    /// Completes the request `body` answers.
    ///
    /// Returns false if no request with that id is pending, which happens
    /// for responses that arrive after their request timed out.
    pub fn resolve(&self, body: ResponseBody) -> bool {
        let Some(tx) = self.lock().remove(&body.id) else {
            trace!(id = %body.id, "Response for unknown request ignored");
            return false;
        };
        // the caller may have stopped waiting
        let _ = tx.send(body.into_result());
        true
    }

    /// Forgets a request without completing it.
    pub fn cancel(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Waits for the response to `reply`, giving up after `timeout`.
    ///
    /// On timeout the request is forgotten, so a late response is ignored.
    pub async fn wait(&self, reply: PendingReply, timeout: Duration) -> ClientResult<Value> {
        let PendingReply { id, rx } = reply;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(remote))) => Err(ClientError::Remote(remote)),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.cancel(&id);
                debug!(id = %id, "Request timed out");
                Err(ClientError::Timeout(format!(
                    "no response to request {} within {}s",
                    id,
                    timeout.as_secs()
                )))
            }
        }
    }

    /// Number of requests in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
