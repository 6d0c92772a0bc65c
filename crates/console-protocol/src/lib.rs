//! Wire frames and transport abstraction for the console protocol.
//!
//! The console protocol synchronizes keyed state from a host process to any
//! number of connected consoles and lets those consoles invoke remote
//! procedures on the host.
//!
//! # Frames
//!
//! Every frame is a JSON text message:
//!
//! ```text
//! Client -> Server { "id": "<id>", "type": "<method>", "args": [...] }
//! Server -> Client { "type": "response", "body": { "id": "<id>", "value"?: any, "error"?: any } }
//! Server -> Client { "type": "data",  "body": { "key": "<provider>", "value": any } }
//! Server -> Client { "type": "patch", "body": { "key": "<provider>", "value": any } }
//! Server -> Client { "type": "<custom>", "body": <provider-defined> }
//! ```
//!
//! # Example
//!
//! ```rust
//! use console_protocol::{Envelope, ResponseBody, encode_frame, MAX_MESSAGE_SIZE};
//!
//! let frame = Envelope::response(ResponseBody::ok("a1", "pong".into()));
//! let text = encode_frame(&frame, MAX_MESSAGE_SIZE).unwrap();
//! assert_eq!(text, r#"{"type":"response","body":{"id":"a1","value":"pong"}}"#);
//! ```

mod error;
mod framing;
pub mod transport;
mod types;

pub use error::{ProtocolError, ProtocolResult, TransportError, TransportResult};
pub use framing::{decode_frame, encode_frame, peek_request_id};
pub use transport::{FrameSink, FrameStream, MemoryTransport, Transport, WebSocketTransport};
pub use types::{Envelope, KeyedValue, RemoteError, Request, ResponseBody, RpcError, ServerMessage};

/// Frame type of RPC responses.
pub const RESPONSE: &str = "response";

/// Frame type of full state snapshots.
pub const DATA: &str = "data";

/// Frame type of incremental state updates.
pub const PATCH: &str = "patch";

/// Built-in liveness check method.
pub const PING: &str = "ping";

/// Value returned by [`PING`].
pub const PONG: &str = "pong";

/// State key under which the UI entry set is published.
pub const ENTRY_KEY: &str = "entry";

/// Field of the entry set carrying the server process identity.
pub const ENTRY_IDENTITY_FIELD: &str = "_id";

/// Maximum frame size (1 MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
