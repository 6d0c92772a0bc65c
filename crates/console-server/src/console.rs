//! The console hub.
//!
//! One [`Console`] is built per host process and passed to every provider
//! that publishes state or remote procedures. It owns the listener registry,
//! the data services, the interceptors, the entry registry and the set of
//! live connections.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use futures_util::future::join_all;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use console_core::random_id;
use console_protocol::transport::{self, MemoryTransport};
use console_protocol::{
    DATA, ENTRY_KEY, Envelope, KeyedValue, PATCH, PING, PONG, Request, ResponseBody, RpcError,
    Transport,
};

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionId, ConnectionMeta, run_session};
use crate::entry::{
    AssetResolver, DefaultAssetResolver, Entry, EntryService, EntrySet, build_entry_set,
};
use crate::error::{HandlerError, ServerError, ServerResult};
use crate::intercept::{AccessDescriptor, Interceptor};
use crate::registration::Registration;
use crate::service::{DataService, Erased, ServiceEntry, ServiceHandle};

/// Future returned by a listener callback.
pub type ListenerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

/// Type-erased listener callback. The calling connection is passed first.
pub type ListenerFn = Arc<dyn Fn(Connection, Vec<Value>) -> ListenerFuture + Send + Sync>;

/// Connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened(ConnectionId),
    Closed(ConnectionId),
}

const EVENT_CAPACITY: usize = 64;

#[derive(Clone)]
struct ListenerEntry {
    registration_id: u64,
    access: AccessDescriptor,
    callback: ListenerFn,
}

struct ConsoleInner {
    config: ServerConfig,
    process_id: String,
    resolver: Arc<dyn AssetResolver>,
    listeners: RwLock<HashMap<String, ListenerEntry>>,
    services: RwLock<BTreeMap<String, ServiceEntry>>,
    interceptors: RwLock<Vec<(u64, Arc<dyn Interceptor>)>>,
    entries: RwLock<BTreeMap<String, Entry>>,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    events: broadcast::Sender<ConnectionEvent>,
    next_registration: AtomicU64,
}

/// Process-wide registry and fan-out point. Cheap to clone.
#[derive(Clone)]
pub struct Console {
    inner: Arc<ConsoleInner>,
}

/// Non-owning reference to a [`Console`], held by registration guards.
#[derive(Debug, Clone)]
pub(crate) struct WeakConsole {
    inner: Weak<ConsoleInner>,
}

impl WeakConsole {
    pub(crate) fn upgrade(&self) -> Option<Console> {
        self.inner.upgrade().map(|inner| Console { inner })
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Console {
    /// Creates a hub with the default asset resolver.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_resolver(config, DefaultAssetResolver::default())
    }

    /// Creates a hub that resolves entry assets with `resolver`.
    pub fn with_resolver(config: ServerConfig, resolver: impl AssetResolver + 'static) -> Self {
        let process_id = config.process_id.clone().unwrap_or_else(random_id);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let console = Self {
            inner: Arc::new(ConsoleInner {
                config,
                process_id,
                resolver: Arc::new(resolver),
                listeners: RwLock::new(HashMap::new()),
                services: RwLock::new(BTreeMap::new()),
                interceptors: RwLock::new(Vec::new()),
                entries: RwLock::new(BTreeMap::new()),
                connections: RwLock::new(HashMap::new()),
                events,
                next_registration: AtomicU64::new(1),
            }),
        };

        console
            .add_listener(
                PING,
                |_, _| async { Ok::<_, HandlerError>(json!(PONG)) },
                AccessDescriptor::OPEN,
            )
            .detach();

        let entries = EntryService {
            console: console.downgrade(),
        };
        match console.insert_service(
            ENTRY_KEY.to_owned(),
            Arc::new(entries),
            AccessDescriptor::OPEN,
        ) {
            Ok(registration) => registration.detach(),
            Err(e) => warn!(error = %e, "Failed to register entry service"),
        }

        info!(process_id = %console.inner.process_id, "Console initialized");
        console
    }

    pub(crate) fn downgrade(&self) -> WeakConsole {
        WeakConsole {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn next_registration(&self) -> u64 {
        self.inner.next_registration.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the configuration the hub was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Identity of this server process, published as the entry set's `_id`.
    pub fn process_id(&self) -> &str {
        &self.inner.process_id
    }

    // Listeners

    /// Registers an RPC method. A later registration under the same name
    /// replaces this one.
    pub fn add_listener<F, Fut>(
        &self,
        name: impl Into<String>,
        callback: F,
        access: AccessDescriptor,
    ) -> Registration
    where
        F: Fn(Connection, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let name = name.into();
        let callback: ListenerFn =
            Arc::new(move |connection, args| Box::pin(callback(connection, args)));
        let registration_id = self.next_registration();
        let previous = write(&self.inner.listeners).insert(
            name.clone(),
            ListenerEntry {
                registration_id,
                access,
                callback,
            },
        );
        if previous.is_some() {
            warn!(method = %name, "Listener replaced by a later registration");
        } else {
            debug!(method = %name, "Listener registered");
        }

        let console = self.downgrade();
        let method = name.clone();
        Registration::new(name, move || {
            if let Some(console) = console.upgrade() {
                console.remove_listener(&method, registration_id);
            }
        })
    }

    fn remove_listener(&self, name: &str, registration_id: u64) {
        let mut listeners = write(&self.inner.listeners);
        if listeners
            .get(name)
            .is_some_and(|l| l.registration_id == registration_id)
        {
            listeners.remove(name);
            debug!(method = %name, "Listener removed");
        }
    }

    /// Returns true if a listener is registered under `name`.
    pub fn has_listener(&self, name: &str) -> bool {
        read(&self.inner.listeners).contains_key(name)
    }

    // Interceptors

    /// Installs an interceptor after the existing ones.
    pub fn add_interceptor(&self, interceptor: impl Interceptor + 'static) -> Registration {
        let registration_id = self.next_registration();
        write(&self.inner.interceptors).push((registration_id, Arc::new(interceptor)));

        let console = self.downgrade();
        Registration::new(format!("interceptor-{registration_id}"), move || {
            if let Some(console) = console.upgrade() {
                write(&console.inner.interceptors).retain(|(id, _)| *id != registration_id);
            }
        })
    }

    /// Runs the interceptors in order. Returns true if one of them vetoes
    /// delivery to `connection`.
    pub async fn intercept(&self, connection: &Connection, access: &AccessDescriptor) -> bool {
        let interceptors: Vec<Arc<dyn Interceptor>> = read(&self.inner.interceptors)
            .iter()
            .map(|(_, interceptor)| interceptor.clone())
            .collect();
        for interceptor in interceptors {
            if interceptor.intercept(connection, access).await {
                return true;
            }
        }
        false
    }

    // Data services

    /// Registers a data service under `key` and sends its value to every
    /// authorized connection.
    pub async fn add_service<S: DataService>(
        &self,
        key: impl Into<String>,
        service: S,
        access: AccessDescriptor,
    ) -> ServerResult<ServiceHandle<S>> {
        let key = key.into();
        let service = Arc::new(service);
        let registration = self.insert_service(key.clone(), service.clone(), access)?;
        let handle = ServiceHandle::new(key, service, self.downgrade(), registration);
        handle.refresh(true).await;
        Ok(handle)
    }

    fn insert_service<S: DataService>(
        &self,
        key: String,
        service: Arc<S>,
        access: AccessDescriptor,
    ) -> ServerResult<Registration> {
        let registration_id = self.next_registration();
        {
            let mut services = write(&self.inner.services);
            if services.contains_key(&key) {
                return Err(ServerError::duplicate_service(key));
            }
            services.insert(
                key.clone(),
                ServiceEntry {
                    registration_id,
                    access,
                    service: Arc::new(Erased(service)),
                },
            );
        }
        debug!(key = %key, "Data service registered");

        let console = self.downgrade();
        let service_key = key.clone();
        Ok(Registration::new(key, move || {
            if let Some(console) = console.upgrade() {
                let mut services = write(&console.inner.services);
                if services
                    .get(&service_key)
                    .is_some_and(|s| s.registration_id == registration_id)
                {
                    services.remove(&service_key);
                    debug!(key = %service_key, "Data service removed");
                }
            }
        }))
    }

    fn service_entry(&self, key: &str) -> Option<ServiceEntry> {
        read(&self.inner.services).get(key).cloned()
    }

    /// Returns true if a data service is registered under `key`.
    pub fn has_service(&self, key: &str) -> bool {
        read(&self.inner.services).contains_key(key)
    }

    /// Recomputes `key` for every authorized connection and sends a `data`
    /// frame. Returns the number of connections reached.
    pub async fn refresh_service(&self, key: &str, forced: bool) -> usize {
        let Some(entry) = self.service_entry(key) else {
            debug!(key = %key, "Refresh of unknown data service ignored");
            return 0;
        };
        let service = entry.service;
        self.broadcast_with(
            DATA,
            |connection| {
                let service = service.clone();
                async move {
                    let value = service.get_value(forced, &connection).await?;
                    Ok::<_, HandlerError>(json!(KeyedValue::new(key, value)))
                }
            },
            entry.access,
        )
        .await
    }

    /// Sends a `patch` frame for `key` to every authorized connection.
    pub async fn patch_service(&self, key: &str, value: Value) -> usize {
        let Some(entry) = self.service_entry(key) else {
            debug!(key = %key, "Patch of unknown data service ignored");
            return 0;
        };
        self.broadcast(PATCH, json!(KeyedValue::new(key, value)), entry.access)
            .await
    }

    /// Sends every data service's current value to one connection. A service
    /// that fails is skipped with a warning.
    pub async fn refresh_connection(&self, connection: &Connection) {
        let services: Vec<(String, ServiceEntry)> = read(&self.inner.services)
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();

        let sweep = services.into_iter().map(|(key, entry)| async move {
            if self.intercept(connection, &entry.access).await {
                trace!(connection = %connection.id(), key = %key, "Data service vetoed");
                return;
            }
            match entry.service.get_value(false, connection).await {
                Ok(value) => {
                    if let Err(e) = connection.send(&Envelope::data(&key, value)) {
                        debug!(
                            connection = %connection.id(),
                            key = %key,
                            error = %e,
                            "Initial value not sent"
                        );
                    }
                }
                Err(e) => warn!(
                    connection = %connection.id(),
                    key = %key,
                    error = %e,
                    "Data service failed, key skipped"
                ),
            }
        });
        join_all(sweep).await;
    }

    // Entries

    /// Registers a UI entry and pushes the new entry set to every
    /// connection. The registration key is the entry id.
    pub fn add_entry(&self, entry: Entry) -> Registration {
        let id = random_id();
        write(&self.inner.entries).insert(id.clone(), entry);
        debug!(entry = %id, "Entry added");
        self.spawn_entry_refresh();

        let console = self.downgrade();
        let entry_id = id.clone();
        Registration::new(id, move || {
            if let Some(console) = console.upgrade()
                && write(&console.inner.entries).remove(&entry_id).is_some()
            {
                debug!(entry = %entry_id, "Entry removed");
                console.spawn_entry_refresh();
            }
        })
    }

    /// Returns the ids of the active entries.
    pub fn entry_ids(&self) -> Vec<String> {
        read(&self.inner.entries).keys().cloned().collect()
    }

    /// Builds the entry set as seen by `connection`.
    pub async fn entry_set(&self, connection: &Connection) -> EntrySet {
        let entries: Vec<(String, Entry)> = read(&self.inner.entries)
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        build_entry_set(
            self.inner.process_id.clone(),
            self.inner.config.mode,
            self.inner.resolver.as_ref(),
            entries,
            connection,
        )
        .await
    }

    fn spawn_entry_refresh(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let console = self.clone();
                runtime.spawn(async move {
                    console.refresh_service(ENTRY_KEY, true).await;
                });
            }
            Err(_) => trace!("No runtime, entry refresh skipped"),
        }
    }

    // Broadcast

    /// Sends `{ type: kind, body }` to every connection the interceptors
    /// allow. Returns the number of connections reached.
    pub async fn broadcast(&self, kind: &str, body: Value, access: AccessDescriptor) -> usize {
        self.broadcast_with(
            kind,
            |_| {
                let body = body.clone();
                async move { Ok::<_, HandlerError>(body) }
            },
            access,
        )
        .await
    }

    /// Like [`Console::broadcast`], computing the body once per connection.
    /// A connection whose body fails is skipped.
    pub async fn broadcast_with<F, Fut>(
        &self,
        kind: &str,
        body: F,
        access: AccessDescriptor,
    ) -> usize
    where
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = Result<Value, HandlerError>>,
    {
        let body = &body;
        let deliveries = self.connections().into_iter().map(|connection| async move {
            if self.intercept(&connection, &access).await {
                trace!(connection = %connection.id(), kind = %kind, "Broadcast vetoed");
                return false;
            }
            match body(connection.clone()).await {
                Ok(value) => connection.send(&Envelope::new(kind, value)).is_ok(),
                Err(e) => {
                    warn!(
                        connection = %connection.id(),
                        kind = %kind,
                        error = %e,
                        "Broadcast body failed"
                    );
                    false
                }
            }
        });
        join_all(deliveries)
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }

    // Requests

    pub(crate) async fn handle_request(
        &self,
        connection: &Connection,
        request: Request,
    ) -> ResponseBody {
        let Request { id, method, args } = request;
        let listener = read(&self.inner.listeners).get(&method).cloned();
        let Some(listener) = listener else {
            info!(connection = %connection.id(), method = %method, "Method not implemented");
            return ResponseBody::err(id, RpcError::NotImplemented);
        };

        if self.intercept(connection, &listener.access).await {
            debug!(connection = %connection.id(), method = %method, "Request vetoed");
            return ResponseBody::err(id, RpcError::Unauthorized);
        }

        match (listener.callback)(connection.clone(), args).await {
            Ok(value) => ResponseBody::ok(id, value),
            Err(e) => {
                debug!(
                    connection = %connection.id(),
                    method = %method,
                    error = %e,
                    "Listener failed"
                );
                ResponseBody::err(id, RpcError::handler(e))
            }
        }
    }

    // Connections

    /// Serves one transport until it closes.
    pub async fn accept<T: Transport>(&self, transport: T, meta: ConnectionMeta) {
        run_session(self.clone(), transport, meta).await;
    }

    /// Opens an in-process connection and returns the client end.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect_in_process(&self) -> MemoryTransport {
        let (server, client) = transport::pair();
        let console = self.clone();
        tokio::spawn(async move {
            console.accept(server, ConnectionMeta::in_process()).await;
        });
        client
    }

    pub(crate) fn register_connection(&self, connection: Connection) {
        let id = connection.id().clone();
        info!(
            connection = %id,
            peer = ?connection.meta().peer_addr,
            path = ?connection.meta().path,
            "Connection opened"
        );
        write(&self.inner.connections).insert(id.clone(), connection);
        let _ = self.inner.events.send(ConnectionEvent::Opened(id));
    }

    pub(crate) fn unregister_connection(&self, id: &ConnectionId) {
        if write(&self.inner.connections).remove(id).is_some() {
            info!(connection = %id, "Connection closed");
            let _ = self.inner.events.send(ConnectionEvent::Closed(id.clone()));
        }
    }

    /// Returns the live connections.
    pub fn connections(&self) -> Vec<Connection> {
        read(&self.inner.connections).values().cloned().collect()
    }

    /// Looks up a live connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<Connection> {
        read(&self.inner.connections).get(id).cloned()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        read(&self.inner.connections).len()
    }

    /// Subscribes to connection open/close notifications.
    pub fn subscribe_connections(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("process_id", &self.inner.process_id)
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Peer, StaticService};
    use std::time::Duration;

    const QUIET: Duration = Duration::from_millis(100);

    struct Failing;

    #[async_trait::async_trait]
    impl DataService for Failing {
        type Value = Value;

        async fn get(
            &self,
            _forced: bool,
            _connection: &Connection,
        ) -> Result<Value, HandlerError> {
            Err("backing store unavailable".into())
        }
    }

    struct DenyAll;

    #[async_trait::async_trait]
    impl Interceptor for DenyAll {
        async fn intercept(&self, _connection: &Connection, _access: &AccessDescriptor) -> bool {
            true
        }
    }

    /// Records that it was consulted and lets everything through.
    struct Recorder {
        name: &'static str,
        seen: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl Recorder {
        fn new(name: &'static str, seen: &Arc<std::sync::Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                seen: seen.clone(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Interceptor for Recorder {
        async fn intercept(&self, _connection: &Connection, _access: &AccessDescriptor) -> bool {
            self.seen.lock().unwrap().push(self.name);
            false
        }
    }

    fn console() -> Console {
        Console::new(ServerConfig::default().with_process_id("proc-test"))
    }

    #[tokio::test]
    async fn ping_roundtrip() {
        let console = console();
        let mut peer = Peer::connect(&console).await;
        peer.send_raw(r#"{"id":"a1","type":"ping","args":[]}"#).await;
        let response = peer.recv().await;
        insta::assert_json_snapshot!(response, @r#"
        {
          "type": "response",
          "body": {
            "id": "a1",
            "value": "pong"
          }
        }
        "#);
    }

    #[tokio::test]
    async fn unknown_method_is_not_implemented() {
        let console = console();
        let mut peer = Peer::connect(&console).await;
        let response = peer.call("b2", "market/install", vec![json!("pkg")]).await;
        assert_eq!(response.error, Some(json!("not implemented")));
        assert_eq!(response.value, None);

        // the connection survives
        let response = peer.call("b3", PING, vec![]).await;
        assert_eq!(response.value, Some(json!(PONG)));
    }

    #[tokio::test]
    async fn listener_receives_connection_and_args() {
        let console = console();
        let _sum = console.add_listener(
            "math/sum",
            |connection: Connection, args: Vec<Value>| async move {
                let total: i64 = args.iter().filter_map(Value::as_i64).sum();
                Ok::<_, HandlerError>(json!({ "total": total, "caller": connection.id().as_str() }))
            },
            AccessDescriptor::OPEN,
        );

        let mut peer = Peer::connect(&console).await;
        let response = peer.call("c1", "math/sum", vec![json!(1), json!(2), json!(3)]).await;
        let value = response.into_result().unwrap();
        assert_eq!(value["total"], json!(6));
        assert_eq!(value["caller"], json!(peer.id.as_str()));
    }

    #[tokio::test]
    async fn handler_error_is_coerced_to_message() {
        let console = console();
        let _fail = console.add_listener(
            "files/write",
            |_, _| async { Err::<Value, HandlerError>("disk full".into()) },
            AccessDescriptor::OPEN,
        );

        let mut peer = Peer::connect(&console).await;
        let response = peer.call("d1", "files/write", vec![]).await;
        assert_eq!(response.error, Some(json!({ "message": "disk full" })));
    }

    #[tokio::test]
    async fn null_result_is_a_value() {
        let console = console();
        let _noop = console.add_listener(
            "noop",
            |_, _| async { Ok::<_, HandlerError>(Value::Null) },
            AccessDescriptor::OPEN,
        );

        let mut peer = Peer::connect(&console).await;
        let response = peer.call("n1", "noop", vec![]).await;
        assert_eq!(response.into_result().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn disposed_listener_is_not_implemented() {
        let console = console();
        let mut registration = console.add_listener(
            "sandbox/eval",
            |_, _| async { Ok::<_, HandlerError>(json!(42)) },
            AccessDescriptor::OPEN,
        );

        let mut peer = Peer::connect(&console).await;
        assert_eq!(peer.call("e1", "sandbox/eval", vec![]).await.value, Some(json!(42)));

        registration.dispose();
        registration.dispose();
        assert!(!console.has_listener("sandbox/eval"));
        let response = peer.call("e2", "sandbox/eval", vec![]).await;
        assert_eq!(response.error, Some(json!("not implemented")));
    }

    #[tokio::test]
    async fn later_listener_wins_and_survives_stale_dispose() {
        let console = console();
        let first = console.add_listener(
            "version",
            |_, _| async { Ok::<_, HandlerError>(json!(1)) },
            AccessDescriptor::OPEN,
        );
        let _second = console.add_listener(
            "version",
            |_, _| async { Ok::<_, HandlerError>(json!(2)) },
            AccessDescriptor::OPEN,
        );
        drop(first);

        let mut peer = Peer::connect(&console).await;
        assert_eq!(peer.call("v", "version", vec![]).await.value, Some(json!(2)));
    }

    #[tokio::test]
    async fn interceptor_vetoes_requests() {
        let console = console();
        let mut peer = Peer::connect(&console).await;
        let mut deny = console.add_interceptor(DenyAll);

        let response = peer.call("f1", PING, vec![]).await;
        assert_eq!(response.error, Some(json!("unauthorized")));

        deny.dispose();
        let response = peer.call("f2", PING, vec![]).await;
        assert_eq!(response.value, Some(json!(PONG)));
    }

    #[tokio::test]
    async fn interceptors_run_in_order_until_a_veto() {
        let console = console();
        let mut peer = Peer::connect(&console).await;

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let _first = console.add_interceptor(Recorder::new("first", &seen));
        let mut deny = console.add_interceptor(DenyAll);
        let _last = console.add_interceptor(Recorder::new("last", &seen));

        let response = peer.call("h1", PING, vec![]).await;
        assert_eq!(response.error, Some(json!("unauthorized")));
        assert_eq!(*seen.lock().unwrap(), ["first"]);

        deny.dispose();
        let response = peer.call("h2", PING, vec![]).await;
        assert_eq!(response.value, Some(json!(PONG)));
        assert_eq!(*seen.lock().unwrap(), ["first", "first", "last"]);
    }

    #[tokio::test]
    async fn invalid_request_with_id_is_answered() {
        let console = console();
        let mut peer = Peer::connect(&console).await;

        peer.send_raw("this is not json").await;
        peer.send_raw(r#"{"id":"g1","type":7}"#).await;
        let response = peer.response("g1").await;
        let message = response.into_result().unwrap_err().message();
        assert!(message.starts_with("invalid request: "), "{message}");
    }

    #[tokio::test]
    async fn initial_sweep_skips_failing_service() {
        let console = console();
        let _bad = console.add_service("bad", Failing, AccessDescriptor::OPEN).await.unwrap();
        let _good = console
            .add_service("good", StaticService(json!({ "ok": true })), AccessDescriptor::OPEN)
            .await
            .unwrap();

        let mut peer = Peer::connect(&console).await;
        assert_eq!(peer.data("good").await, json!({ "ok": true }));
        assert!(peer.quiet(QUIET).await);
    }

    #[tokio::test]
    async fn duplicate_service_is_rejected() {
        let console = console();
        let _first = console
            .add_service("logs", StaticService(json!([])), AccessDescriptor::OPEN)
            .await
            .unwrap();
        let result = console
            .add_service("logs", StaticService(json!([])), AccessDescriptor::OPEN)
            .await;
        assert!(matches!(result, Err(ServerError::DuplicateService { ref key }) if key == "logs"));
    }

    #[tokio::test]
    async fn service_refresh_and_patch_reach_connections() {
        let console = console();
        let mut peer = Peer::connect(&console).await;

        let logs = console
            .add_service("logs", StaticService(json!(["a", "b"])), AccessDescriptor::OPEN)
            .await
            .unwrap();
        assert_eq!(peer.data("logs").await, json!(["a", "b"]));

        assert_eq!(logs.patch(&vec!["c"]).await.unwrap(), 1);
        assert_eq!(peer.keyed(PATCH, "logs").await, json!(["c"]));

        assert_eq!(logs.refresh(true).await, 1);
        assert_eq!(peer.data("logs").await, json!(["a", "b"]));
    }

    #[tokio::test]
    async fn disposed_service_stops_publishing() {
        let console = console();
        let mut logs = console
            .add_service("logs", StaticService(json!([1])), AccessDescriptor::OPEN)
            .await
            .unwrap();
        logs.dispose();
        assert!(logs.is_disposed());
        assert!(!console.has_service("logs"));
        assert_eq!(logs.refresh(true).await, 0);
        assert_eq!(logs.patch(&json!([2])).await.unwrap(), 0);

        let mut peer = Peer::connect(&console).await;
        assert!(peer.quiet(QUIET).await);
    }

    #[tokio::test]
    async fn entries_refresh_on_add_and_dispose() {
        let console = console();
        let mut peer = Peer::connect(&console).await;

        let mut entry = console.add_entry(
            Entry::new("market.js").with_data(|connection| async move {
                json!({ "viewer": connection.id().as_str() })
            }),
        );
        let set = peer.data(ENTRY_KEY).await;
        assert_eq!(set["_id"], json!("proc-test"));
        assert_eq!(set[entry.key()]["files"], json!(["market.js"]));
        assert_eq!(set[entry.key()]["data"]["viewer"], json!(peer.id.as_str()));

        let id = entry.key().to_owned();
        entry.dispose();
        let set = peer.data(ENTRY_KEY).await;
        assert_eq!(set, json!({ "_id": "proc-test" }));
        assert!(!console.entry_ids().contains(&id));
    }

    #[tokio::test]
    async fn broadcast_with_personalizes_per_connection() {
        let console = console();
        let mut first = Peer::connect(&console).await;
        let mut second = Peer::connect(&console).await;

        let reached = console
            .broadcast_with(
                "whoami",
                |connection| async move { Ok::<_, HandlerError>(json!(connection.id().as_str())) },
                AccessDescriptor::OPEN,
            )
            .await;
        assert_eq!(reached, 2);

        let frame = first.recv().await;
        assert_eq!(frame, Envelope::new("whoami", json!(first.id.as_str())));
        let frame = second.recv().await;
        assert_eq!(frame, Envelope::new("whoami", json!(second.id.as_str())));
    }

    #[tokio::test]
    async fn broadcast_skips_vetoed_connections() {
        let console = console();
        let mut peer = Peer::connect(&console).await;
        let _deny = console.add_interceptor(DenyAll);

        let reached = console
            .broadcast("market/progress", json!(0.5), AccessDescriptor::OPEN)
            .await;
        assert_eq!(reached, 0);
        assert!(peer.quiet(QUIET).await);
    }

    #[tokio::test]
    async fn connection_events_track_lifecycle() {
        let console = console();
        let mut events = console.subscribe_connections();

        let peer = Peer::connect(&console).await;
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Opened(peer.id.clone()));
        assert_eq!(console.connection_count(), 1);

        let id = peer.id.clone();
        drop(peer);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Closed(id));
        assert_eq!(console.connection_count(), 0);
    }

    #[tokio::test]
    async fn reconnect_yields_new_connection_id() {
        let console = console();
        let first = Peer::connect(&console).await;
        let first_id = first.id.clone();
        drop(first);
        let second = Peer::connect(&console).await;
        assert_ne!(second.id, first_id);
    }
}
