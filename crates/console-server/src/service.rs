//! Keyed data services.
//!
//! A [`DataService`] owns one state key and recomputes its value on demand.
//! The hub calls [`DataService::get`] once per connection for every initial
//! sweep and every refresh, so a service must always be able to rebuild the
//! current truth instead of relying on the deltas it has patched out.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::connection::Connection;
use crate::console::WeakConsole;
use crate::error::HandlerError;
use crate::intercept::AccessDescriptor;
use crate::registration::Registration;

/// Producer of one state key.
#[async_trait]
pub trait DataService: Send + Sync + 'static {
    /// Value published under the key.
    type Value: Serialize + Send;

    /// Computes the current value for `connection`.
    ///
    /// `forced` asks a caching service to bypass its cache.
    async fn get(&self, forced: bool, connection: &Connection) -> Result<Self::Value, HandlerError>;
}

#[async_trait]
pub(crate) trait ErasedService: Send + Sync {
    async fn get_value(&self, forced: bool, connection: &Connection) -> Result<Value, HandlerError>;
}

pub(crate) struct Erased<S>(pub(crate) Arc<S>);

#[async_trait]
impl<S: DataService> ErasedService for Erased<S> {
    async fn get_value(
        &self,
        forced: bool,
        connection: &Connection,
    ) -> Result<Value, HandlerError> {
        let value = self.0.get(forced, connection).await?;
        Ok(serde_json::to_value(value)?)
    }
}

#[derive(Clone)]
pub(crate) struct ServiceEntry {
    pub(crate) registration_id: u64,
    pub(crate) access: AccessDescriptor,
    pub(crate) service: Arc<dyn ErasedService>,
}

/// Handle to a registered data service.
///
/// Dropping the handle unregisters the service. After disposal `refresh`
/// and `patch` are no-ops.
#[derive(Debug)]
pub struct ServiceHandle<S> {
    key: String,
    service: Arc<S>,
    console: WeakConsole,
    registration: Registration,
}

impl<S: DataService> ServiceHandle<S> {
    pub(crate) fn new(
        key: String,
        service: Arc<S>,
        console: WeakConsole,
        registration: Registration,
    ) -> Self {
        Self {
            key,
            service,
            console,
            registration,
        }
    }

    /// Returns the state key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the service.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Returns true once the service has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.registration.is_disposed()
    }

    /// Recomputes the value for every authorized connection and sends it as
    /// a `data` frame. Returns the number of connections reached.
    pub async fn refresh(&self, forced: bool) -> usize {
        if self.is_disposed() {
            debug!(key = %self.key, "Refresh after dispose ignored");
            return 0;
        }
        match self.console.upgrade() {
            Some(console) => console.refresh_service(&self.key, forced).await,
            None => 0,
        }
    }

    /// Sends an incremental update to every authorized connection without
    /// recomputing the value.
    pub async fn patch<P: Serialize>(&self, value: &P) -> Result<usize, HandlerError> {
        if self.is_disposed() {
            debug!(key = %self.key, "Patch after dispose ignored");
            return Ok(0);
        }
        let value = serde_json::to_value(value)?;
        Ok(match self.console.upgrade() {
            Some(console) => console.patch_service(&self.key, value).await,
            None => 0,
        })
    }

    /// Unregisters the service. Calling it again is a no-op.
    pub fn dispose(&mut self) {
        self.registration.dispose();
    }
}
