//! Helpers shared by the hub tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use console_protocol::transport::memory::{MemorySink, MemoryStream};
use console_protocol::{
    DATA, ENTRY_KEY, Envelope, FrameSink, FrameStream, KeyedValue, RESPONSE, Request,
    ResponseBody, Transport,
};

use crate::connection::{Connection, ConnectionId};
use crate::console::{Console, ConnectionEvent};
use crate::error::HandlerError;
use crate::service::DataService;

const WAIT: Duration = Duration::from_secs(5);

/// Client end of an in-process connection.
pub(crate) struct Peer {
    pub id: ConnectionId,
    tx: MemorySink,
    rx: MemoryStream,
    backlog: VecDeque<Envelope>,
}

impl Peer {
    /// Connects and consumes the initial `entry` frame, so the connection is
    /// registered when this returns. Other sweep frames stay queued.
    pub async fn connect(console: &Console) -> Self {
        let mut events = console.subscribe_connections();
        let (tx, rx) = console.connect_in_process().split();
        let id = loop {
            if let ConnectionEvent::Opened(id) = events.recv().await.unwrap() {
                break id;
            }
        };
        let mut peer = Self {
            id,
            tx,
            rx,
            backlog: VecDeque::new(),
        };
        let mut seen = Vec::new();
        loop {
            let frame = peer.read().await;
            if frame.kind == DATA && frame.body["key"] == ENTRY_KEY {
                break;
            }
            seen.push(frame);
        }
        peer.backlog.extend(seen);
        peer
    }

    async fn read(&mut self) -> Envelope {
        let text = tokio::time::timeout(WAIT, self.rx.next_text())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    /// Next frame, oldest first.
    pub async fn recv(&mut self) -> Envelope {
        match self.backlog.pop_front() {
            Some(frame) => frame,
            None => self.read().await,
        }
    }

    /// Sends raw text.
    pub async fn send_raw(&mut self, text: &str) {
        self.tx.send_text(text.to_owned()).await.unwrap();
    }

    /// Sends a request and waits for its response, skipping other frames.
    pub async fn call(&mut self, id: &str, method: &str, args: Vec<Value>) -> ResponseBody {
        let request = Request::new(id, method, args);
        self.send_raw(&serde_json::to_string(&request).unwrap()).await;
        self.response(id).await
    }

    /// Waits for the response to `id`, skipping other frames.
    pub async fn response(&mut self, id: &str) -> ResponseBody {
        loop {
            let frame = self.recv().await;
            if frame.kind == RESPONSE {
                let body: ResponseBody = serde_json::from_value(frame.body).unwrap();
                if body.id == id {
                    return body;
                }
            }
        }
    }

    /// Waits for the next `kind` frame for `key`, skipping other frames.
    pub async fn keyed(&mut self, kind: &str, key: &str) -> Value {
        loop {
            let frame = self.recv().await;
            if frame.kind == kind {
                let body: KeyedValue = serde_json::from_value(frame.body).unwrap();
                if body.key == key {
                    return body.value;
                }
            }
        }
    }

    /// Waits for the next `data` frame for `key`.
    pub async fn data(&mut self, key: &str) -> Value {
        self.keyed(DATA, key).await
    }

    /// Returns true if nothing arrives within `wait`.
    pub async fn quiet(&mut self, wait: Duration) -> bool {
        if !self.backlog.is_empty() {
            return false;
        }
        tokio::time::timeout(wait, self.rx.next_text()).await.is_err()
    }
}

/// Data service returning a fixed value.
pub(crate) struct StaticService(pub Value);

#[async_trait]
impl DataService for StaticService {
    type Value = Value;

    async fn get(&self, _forced: bool, _connection: &Connection) -> Result<Value, HandlerError> {
        Ok(self.0.clone())
    }
}
