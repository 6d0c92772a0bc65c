//! Client half of the console protocol.
//!
//! [`ConsoleClient`] keeps one transport open to the console, mirrors the
//! published state into a [`Store`], and correlates RPC responses. When the
//! transport closes the store is reset and the client reconnects after a
//! fixed delay. The first connection attempt is not retried; callers decide
//! what to do when the console is unreachable at startup.
//!
//! ```rust,no_run
//! use console_client::{ClientOptions, ConsoleClient, WebSocketConnector};
//!
//! # async fn example() -> console_client::error::ClientResult<()> {
//! let connector = WebSocketConnector::new("ws://127.0.0.1:5140")?;
//! let client = ConsoleClient::connect(connector, ClientOptions::default()).await?;
//! let pong = client.send("ping", vec![]).await?;
//! assert_eq!(pong, "pong");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use console_protocol::{
    ENTRY_IDENTITY_FIELD, ENTRY_KEY, Envelope, FrameSink, FrameStream, KeyedValue,
    MAX_MESSAGE_SIZE, PING, Request, ServerMessage, Transport, decode_frame, encode_frame,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use crate::connector::Connector;
use crate::error::{ClientError, ClientResult};
use crate::rpc::{DEFAULT_REQUEST_TIMEOUT, PendingRequests};
use crate::store::Store;

const EVENT_CAPACITY: usize = 256;

/// Default pause between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Keep-alive timers re-armed by every inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Quiet time after which a `ping` is sent.
    pub interval: Duration,
    /// Quiet time after which the transport is closed.
    pub timeout: Duration,
}

/// Client behaviour.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long an RPC waits for its response.
    pub request_timeout: Duration,
    /// Pause before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Consecutive failed reconnects before giving up. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Half-open connection detection.
    pub heartbeat: Option<Heartbeat>,
    /// Largest frame sent or accepted.
    pub max_frame_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: None,
            heartbeat: None,
            max_frame_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientOptions {
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat = Some(Heartbeat { interval, timeout });
        self
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A transport is open.
    Open,
    /// Waiting to reconnect.
    Reconnecting,
    /// The client gave up or was told to reload.
    Stopped,
}

/// Something that happened on the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A transport opened.
    Open,
    /// The transport closed.
    Closed {
        /// False once the client has stopped for good.
        reconnecting: bool,
    },
    /// A key received a full snapshot.
    Data { key: String, value: Value },
    /// A key received an incremental update that was applied.
    Patch { key: String, value: Value },
    /// A frame on a provider-defined channel.
    Broadcast(Envelope),
    /// The server process behind the console changed.
    ReloadRequired { previous: String, current: String },
}

/// Connected console client.
///
/// Dropping the client stops its connection task.
#[derive(Debug)]
pub struct ConsoleClient {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

#[derive(Debug)]
struct Shared {
    options: ClientOptions,
    store: Mutex<Store>,
    pending: PendingRequests,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    identity: Mutex<Option<String>>,
    events: broadcast::Sender<ClientEvent>,
    state: watch::Sender<ConnectionState>,
}

enum SessionEnd {
    Closed,
    Reload,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConsoleClient {
    /// Opens the first transport and starts the connection task.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the first attempt fails. It is not
    /// retried.
    pub async fn connect<C: Connector>(connector: C, options: ClientOptions) -> ClientResult<Self> {
        let transport = connector.connect().await?;
        info!(endpoint = %connector.endpoint(), "Connected to console");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Open);
        let shared = Arc::new(Shared {
            options,
            store: Mutex::new(Store::new()),
            pending: PendingRequests::new(),
            outbound: Mutex::new(None),
            identity: Mutex::new(None),
            events,
            state,
        });
        let outbound = shared.go_online();
        let task = tokio::spawn(run(shared.clone(), connector, transport, outbound));
        Ok(Self { shared, task })
    }

    /// Calls `method` on the console and waits for its response.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] while reconnecting,
    /// [`ClientError::Timeout`] if no response arrives in time, and
    /// [`ClientError::Remote`] if the listener failed or was vetoed.
    pub async fn send(&self, method: &str, args: Vec<Value>) -> ClientResult<Value> {
        self.shared.send(method, args).await
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.shared.store).get(key).cloned()
    }

    /// Copy of the whole store.
    pub fn store(&self) -> Store {
        lock(&self.shared.store).clone()
    }

    /// Subscribes to client events. Earlier events are not replayed; the
    /// store holds the state they carried.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watches connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Identity of the server process last seen in the entry set.
    pub fn server_identity(&self) -> Option<String> {
        lock(&self.shared.identity).clone()
    }

    /// Number of RPCs awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Stops the connection task. Pending calls resolve on their timeout.
    pub fn shutdown(&self) {
        self.task.abort();
        self.shared.go_offline();
        self.shared.state.send_replace(ConnectionState::Stopped);
    }
}

impl Drop for ConsoleClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Shared {
    fn emit(&self, event: ClientEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn go_online(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.outbound) = Some(tx);
        self.state.send_replace(ConnectionState::Open);
        self.emit(ClientEvent::Open);
        rx
    }

    fn go_offline(&self) {
        *lock(&self.outbound) = None;
        lock(&self.store).reset();
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> ClientResult<Value> {
        let reply = self.pending.register();
        let request = Request::new(reply.id(), method, args);
        let text = match encode_frame(&request, self.options.max_frame_size) {
            Ok(text) => text,
            Err(e) => {
                self.pending.cancel(reply.id());
                return Err(e.into());
            }
        };

        let sent = lock(&self.outbound)
            .as_ref()
            .is_some_and(|tx| tx.send(text).is_ok());
        if !sent {
            self.pending.cancel(reply.id());
            return Err(ClientError::NotConnected);
        }
        debug!(id = %reply.id(), method = %method, "Request sent");
        self.pending.wait(reply, self.options.request_timeout).await
    }

    /// Applies one inbound frame. Returns false if the session must end
    /// because the server process changed.
    fn handle_frame(&self, text: &str) -> bool {
        let envelope: Envelope = match decode_frame(text, self.options.max_frame_size) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                return true;
            }
        };
        match ServerMessage::try_from(envelope) {
            Ok(ServerMessage::Response(body)) => {
                self.pending.resolve(body);
            }
            Ok(ServerMessage::Data(KeyedValue { key, value })) => {
                if key == ENTRY_KEY && !self.check_identity(&value) {
                    return false;
                }
                lock(&self.store).apply_data(key.clone(), value.clone());
                self.emit(ClientEvent::Data { key, value });
            }
            Ok(ServerMessage::Patch(KeyedValue { key, value })) => {
                if lock(&self.store).apply_patch(&key, value.clone()) {
                    self.emit(ClientEvent::Patch { key, value });
                }
            }
            Ok(ServerMessage::Broadcast(envelope)) => self.emit(ClientEvent::Broadcast(envelope)),
            Err(e) => warn!(error = %e, "Dropping malformed frame"),
        }
        true
    }

    /// Records the server identity carried by an entry set. Returns false
    /// if it differs from the one seen before.
    fn check_identity(&self, entries: &Value) -> bool {
        let Some(current) = entries.get(ENTRY_IDENTITY_FIELD).and_then(Value::as_str) else {
            return true;
        };
        let mut identity = lock(&self.identity);
        let Some(previous) = identity.clone() else {
            *identity = Some(current.to_owned());
            return true;
        };
        drop(identity);
        if previous == current {
            return true;
        }
        warn!(previous = %previous, current = %current, "Server process changed, reload required");
        self.emit(ClientEvent::ReloadRequired {
            previous,
            current: current.to_owned(),
        });
        false
    }
}

async fn run<C: Connector>(
    shared: Arc<Shared>,
    connector: C,
    mut transport: C::Transport,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let max_attempts = shared.options.max_reconnect_attempts;
    loop {
        let end = session(&shared, transport, outbound).await;
        shared.go_offline();
        if let SessionEnd::Reload = end {
            shared.state.send_replace(ConnectionState::Stopped);
            return;
        }

        let reconnecting = max_attempts != Some(0);
        shared.emit(ClientEvent::Closed { reconnecting });
        if !reconnecting {
            shared.state.send_replace(ConnectionState::Stopped);
            return;
        }
        shared.state.send_replace(ConnectionState::Reconnecting);
        info!(endpoint = %connector.endpoint(), "Connection closed, reconnecting");

        let mut attempts = 0u32;
        transport = loop {
            if max_attempts.is_some_and(|max| attempts >= max) {
                warn!(attempts, "Giving up reconnecting");
                shared.emit(ClientEvent::Closed {
                    reconnecting: false,
                });
                shared.state.send_replace(ConnectionState::Stopped);
                return;
            }
            sleep(shared.options.reconnect_delay).await;
            attempts += 1;
            match connector.connect().await {
                Ok(transport) => break transport,
                Err(e) => debug!(attempt = attempts, error = %e, "Reconnect failed"),
            }
        };
        info!(endpoint = %connector.endpoint(), "Reconnected to console");
        outbound = shared.go_online();
    }
}

async fn session<T: Transport>(
    shared: &Arc<Shared>,
    transport: T,
    mut outbound: mpsc::UnboundedReceiver<String>,
) -> SessionEnd {
    let (mut sink, mut stream) = transport.split();
    let heartbeat = shared.options.heartbeat;
    let mut ping_at = heartbeat.map(|h| Instant::now() + h.interval);
    let mut close_at = heartbeat.map(|h| Instant::now() + h.timeout);

    let end = loop {
        tokio::select! {
            frame = stream.next_text() => match frame {
                Some(Ok(text)) => {
                    if let Some(h) = heartbeat {
                        let now = Instant::now();
                        ping_at = Some(now + h.interval);
                        close_at = Some(now + h.timeout);
                    }
                    if !shared.handle_frame(&text) {
                        break SessionEnd::Reload;
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "Transport read failed");
                    break SessionEnd::Closed;
                }
                None => break SessionEnd::Closed,
            },
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = sink.send_text(text).await {
                        debug!(error = %e, "Transport write failed");
                        break SessionEnd::Closed;
                    }
                }
                None => break SessionEnd::Closed,
            },
            () = deadline(ping_at) => {
                ping_at = None;
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = shared.send(PING, vec![]).await {
                        debug!(error = %e, "Heartbeat ping failed");
                    }
                });
            }
            () = deadline(close_at) => {
                warn!("No traffic before heartbeat timeout, closing");
                break SessionEnd::Closed;
            }
        }
    };

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Transport close failed");
    }
    end
}

fn deadline(at: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match at {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::EmbeddedConnector;
    use async_trait::async_trait;
    use console_protocol::transport::memory::{MemorySink, MemoryStream};
    use console_protocol::{MemoryTransport, ResponseBody, transport};
    use console_server::{
        AccessDescriptor, Console, DataService, Entry, HandlerError, ServerConfig,
    };
    use serde_json::json;
    use std::collections::VecDeque;

    /// Hands out pre-made transports; fails once they run out.
    struct Scripted {
        transports: Mutex<VecDeque<MemoryTransport>>,
    }

    impl Scripted {
        fn new(count: usize) -> (Self, Vec<(MemorySink, MemoryStream)>) {
            let mut clients = VecDeque::new();
            let mut servers = Vec::new();
            for _ in 0..count {
                let (client, server) = transport::pair();
                clients.push_back(client);
                servers.push(server.split());
            }
            (
                Self {
                    transports: Mutex::new(clients),
                },
                servers,
            )
        }
    }

    #[async_trait]
    impl Connector for Scripted {
        type Transport = MemoryTransport;

        async fn connect(&self) -> ClientResult<MemoryTransport> {
            lock(&self.transports)
                .pop_front()
                .ok_or_else(|| ClientError::Connection("refused".into()))
        }

        fn endpoint(&self) -> String {
            "scripted".into()
        }
    }

    async fn send(sink: &mut MemorySink, envelope: Envelope) {
        sink.send_text(serde_json::to_string(&envelope).unwrap())
            .await
            .unwrap();
    }

    async fn next_event(events: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
        events.recv().await.unwrap()
    }

    struct Counter(u64);

    #[async_trait]
    impl DataService for Counter {
        type Value = Vec<u64>;

        async fn get(
            &self,
            _forced: bool,
            _connection: &console_server::Connection,
        ) -> Result<Vec<u64>, HandlerError> {
            Ok((1..=self.0).collect())
        }
    }

    #[tokio::test]
    async fn first_connect_failure_is_not_retried() {
        let (connector, _servers) = Scripted::new(0);
        let err = ConsoleClient::connect(connector, ClientOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
    }

    #[tokio::test]
    async fn embedded_ping_and_state() {
        let console = Console::new(ServerConfig::default());
        let _service = console
            .add_service("counter", Counter(2), AccessDescriptor::OPEN)
            .await
            .unwrap();

        let client = ConsoleClient::connect(
            EmbeddedConnector::new(console.clone()),
            ClientOptions::default(),
        )
        .await
        .unwrap();
        let mut events = client.subscribe();

        assert_eq!(client.send("ping", vec![]).await.unwrap(), json!("pong"));
        while client.get("counter").is_none() || client.server_identity().is_none() {
            next_event(&mut events).await;
        }
        assert_eq!(client.get("counter"), Some(json!([1, 2])));

        console.patch_service("counter", json!([3])).await;
        loop {
            if let ClientEvent::Patch { key, .. } = next_event(&mut events).await {
                assert_eq!(key, "counter");
                break;
            }
        }
        assert_eq!(client.get("counter"), Some(json!([1, 2, 3])));
        assert_eq!(client.server_identity().as_deref(), Some(console.process_id()));
    }

    #[tokio::test]
    async fn remote_failures_reject_the_call() {
        let console = Console::new(ServerConfig::default());
        let client = ConsoleClient::connect(
            EmbeddedConnector::new(console),
            ClientOptions::default(),
        )
        .await
        .unwrap();

        let err = client.send("missing", vec![]).await.unwrap_err();
        assert!(matches!(err, ClientError::Remote(ref e) if e.is_not_implemented()));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out_once() {
        let (connector, mut servers) = Scripted::new(1);
        let (mut server_tx, mut server_rx) = servers.remove(0);
        let client = ConsoleClient::connect(connector, ClientOptions::default())
            .await
            .unwrap();

        let (result, request) = tokio::join!(client.send("slow", vec![json!(1)]), async {
            server_rx.next_text().await.unwrap().unwrap()
        });
        assert!(matches!(result, Err(ClientError::Timeout(_))));
        assert_eq!(client.pending_requests(), 0);

        let request: Request = serde_json::from_str(&request).unwrap();
        assert_eq!(request.method, "slow");
        send(&mut server_tx, Envelope::response(ResponseBody::ok(request.id, json!("late")))).await;
        tokio::task::yield_now().await;
        assert_eq!(client.pending_requests(), 0);
        assert_eq!(client.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn close_resets_store_and_reconnects() {
        let (connector, mut servers) = Scripted::new(2);
        let (mut first_tx, first_rx) = servers.remove(0);
        let (mut second_tx, _second_rx) = servers.remove(0);

        let client = ConsoleClient::connect(connector, ClientOptions::default())
            .await
            .unwrap();
        let mut events = client.subscribe();

        send(&mut first_tx, Envelope::data("logs", json!(["a"]))).await;
        assert!(matches!(next_event(&mut events).await, ClientEvent::Data { .. }));
        assert_eq!(client.get("logs"), Some(json!(["a"])));

        drop(first_tx);
        drop(first_rx);
        assert_eq!(next_event(&mut events).await, ClientEvent::Closed { reconnecting: true });
        assert_eq!(client.get("logs"), None);
        assert!(client.store().contains_key("logs"));
        assert!(matches!(client.send("ping", vec![]).await, Err(ClientError::NotConnected)));

        assert_eq!(next_event(&mut events).await, ClientEvent::Open);
        send(&mut second_tx, Envelope::data("logs", json!(["b"]))).await;
        assert!(matches!(next_event(&mut events).await, ClientEvent::Data { .. }));
        assert_eq!(client.get("logs"), Some(json!(["b"])));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (connector, mut servers) = Scripted::new(1);
        let options = ClientOptions::default().with_max_reconnect_attempts(2);
        let client = ConsoleClient::connect(connector, options).await.unwrap();
        let mut events = client.subscribe();

        servers.clear();
        assert_eq!(next_event(&mut events).await, ClientEvent::Closed { reconnecting: true });
        assert_eq!(next_event(&mut events).await, ClientEvent::Closed { reconnecting: false });
        assert_eq!(client.state(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_server_identity_requires_reload() {
        let (connector, mut servers) = Scripted::new(2);
        let (mut first_tx, first_rx) = servers.remove(0);
        let (mut second_tx, _second_rx) = servers.remove(0);

        let client = ConsoleClient::connect(connector, ClientOptions::default())
            .await
            .unwrap();
        let mut events = client.subscribe();

        send(&mut first_tx, Envelope::data(ENTRY_KEY, json!({ "_id": "p1" }))).await;
        assert!(matches!(next_event(&mut events).await, ClientEvent::Data { .. }));
        assert_eq!(client.server_identity().as_deref(), Some("p1"));

        drop(first_tx);
        drop(first_rx);
        assert_eq!(next_event(&mut events).await, ClientEvent::Closed { reconnecting: true });
        assert_eq!(next_event(&mut events).await, ClientEvent::Open);

        send(&mut second_tx, Envelope::data(ENTRY_KEY, json!({ "_id": "p2", "x": {} }))).await;
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ReloadRequired {
                previous: "p1".into(),
                current: "p2".into()
            }
        );
        assert_eq!(client.get(ENTRY_KEY), None);

        let mut state = client.state_changes();
        state.wait_for(|s| *s == ConnectionState::Stopped).await.unwrap();
    }

    #[tokio::test]
    async fn same_identity_updates_entries_in_place() {
        let console = Console::new(ServerConfig::default());
        let client = ConsoleClient::connect(
            EmbeddedConnector::new(console.clone()),
            ClientOptions::default(),
        )
        .await
        .unwrap();
        let mut events = client.subscribe();

        let _entry = console.add_entry(Entry::new("plugin/client.js"));
        loop {
            if let ClientEvent::Data { key, value } = next_event(&mut events).await {
                if key == ENTRY_KEY && value.as_object().is_some_and(|o| o.len() == 2) {
                    break;
                }
            }
        }
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(client.server_identity().as_deref(), Some(console.process_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn broadcasts_surface_as_events() {
        let (connector, mut servers) = Scripted::new(1);
        let (mut server_tx, _server_rx) = servers.remove(0);
        let client = ConsoleClient::connect(connector, ClientOptions::default())
            .await
            .unwrap();
        let mut events = client.subscribe();

        send(&mut server_tx, Envelope::new("market/progress", json!(0.5))).await;
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::Broadcast(Envelope::new("market/progress", json!(0.5)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_then_closes_silent_transport() {
        let (connector, mut servers) = Scripted::new(1);
        let (_server_tx, mut server_rx) = servers.remove(0);
        let options = ClientOptions::default()
            .with_heartbeat(Duration::from_secs(5), Duration::from_secs(15))
            .with_max_reconnect_attempts(0);
        let client = ConsoleClient::connect(connector, options).await.unwrap();
        let mut events = client.subscribe();

        let ping: Request =
            serde_json::from_str(&server_rx.next_text().await.unwrap().unwrap()).unwrap();
        assert_eq!(ping.method, PING);

        assert_eq!(next_event(&mut events).await, ClientEvent::Closed { reconnecting: false });
        assert!(server_rx.next_text().await.is_none());
    }
}
