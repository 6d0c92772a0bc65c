//! Frame types for the console protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ProtocolError, ProtocolResult};
use crate::{DATA, PATCH, RESPONSE};

/// Server-to-client wire unit.
///
/// The reserved `type` values are [`RESPONSE`], [`DATA`] and [`PATCH`];
/// every other type is a provider-defined broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Frame type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Frame payload.
    #[serde(default)]
    pub body: Value,
}

impl Envelope {
    /// Creates an envelope of an arbitrary type.
    pub fn new(kind: impl Into<String>, body: Value) -> Self {
        Self {
            kind: kind.into(),
            body,
        }
    }

    /// Creates a `response` envelope.
    pub fn response(body: ResponseBody) -> Self {
        Self::new(RESPONSE, json!(body))
    }

    /// Creates a `data` envelope carrying a full snapshot of `key`.
    pub fn data(key: impl Into<String>, value: Value) -> Self {
        Self::new(DATA, json!(KeyedValue::new(key, value)))
    }

    /// Creates a `patch` envelope carrying an incremental update of `key`.
    pub fn patch(key: impl Into<String>, value: Value) -> Self {
        Self::new(PATCH, json!(KeyedValue::new(key, value)))
    }
}

/// Client-to-server RPC request. Sent standalone, not wrapped in an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id echoed back in the response.
    pub id: String,
    /// Name of the listener to invoke.
    #[serde(rename = "type")]
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Request {
    /// Creates a request.
    pub fn new(id: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            args,
        }
    }
}

/// Body of a `response` frame. Exactly one of `value` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    /// Correlation id of the request being answered.
    pub id: String,
    /// Listener return value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Serialized failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ResponseBody {
    /// Creates a successful response.
    pub fn ok(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            value: Some(value),
            error: None,
        }
    }

    /// Creates a failed response.
    pub fn err(id: impl Into<String>, error: RpcError) -> Self {
        Self {
            id: id.into(),
            value: None,
            error: Some(error.to_value()),
        }
    }

    /// Converts into a result.
    ///
    /// A `null` value deserializes as an absent one, so a body with neither
    /// field resolves to `Ok(Value::Null)`.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self.error {
            Some(error) => Err(RemoteError(error)),
            None => Ok(self.value.unwrap_or(Value::Null)),
        }
    }
}

/// Body of `data` and `patch` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedValue {
    /// Provider key.
    pub key: String,
    /// Snapshot or delta.
    #[serde(default)]
    pub value: Value,
}

impl KeyedValue {
    /// Creates a keyed value.
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Failure reported to the caller of an RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// No listener is registered under the requested name.
    NotImplemented,
    /// An interceptor vetoed the call. The reason is not disclosed.
    Unauthorized,
    /// The frame parsed as JSON but is not a valid request.
    InvalidRequest(String),
    /// The listener failed.
    Handler { message: String },
}

impl RpcError {
    /// Coerces any displayable failure into a handler error.
    pub fn handler(error: impl fmt::Display) -> Self {
        Self::Handler {
            message: error.to_string(),
        }
    }

    /// Serializable wire representation.
    pub fn to_value(&self) -> Value {
        match self {
            Self::NotImplemented => json!("not implemented"),
            Self::Unauthorized => json!("unauthorized"),
            Self::InvalidRequest(reason) => {
                json!({ "message": format!("invalid request: {reason}") })
            }
            Self::Handler { message } => json!({ "message": message }),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotImplemented => f.write_str("not implemented"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::InvalidRequest(reason) => write!(f, "invalid request: {reason}"),
            Self::Handler { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for RpcError {}

/// Error payload received in a `response` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError(pub Value);

impl RemoteError {
    /// Returns the human-readable message carried by the payload.
    pub fn message(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            Value::Object(map) => match map.get("message") {
                Some(Value::String(s)) => s.clone(),
                _ => self.0.to_string(),
            },
            other => other.to_string(),
        }
    }

    /// True if the method had no registered listener.
    pub fn is_not_implemented(&self) -> bool {
        self.0 == RpcError::NotImplemented.to_value()
    }

    /// True if the call was vetoed.
    pub fn is_unauthorized(&self) -> bool {
        self.0 == RpcError::Unauthorized.to_value()
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for RemoteError {}

/// Decoded server-to-client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// RPC response.
    Response(ResponseBody),
    /// Full snapshot of one key.
    Data(KeyedValue),
    /// Incremental update of one key.
    Patch(KeyedValue),
    /// Provider-defined channel.
    Broadcast(Envelope),
}

impl TryFrom<Envelope> for ServerMessage {
    type Error = ProtocolError;

    fn try_from(envelope: Envelope) -> ProtocolResult<Self> {
        let Envelope { kind, body } = envelope;
        match kind.as_str() {
            RESPONSE => serde_json::from_value(body)
                .map(Self::Response)
                .map_err(|e| ProtocolError::malformed(RESPONSE, e)),
            DATA => serde_json::from_value(body)
                .map(Self::Data)
                .map_err(|e| ProtocolError::malformed(DATA, e)),
            PATCH => serde_json::from_value(body)
                .map(Self::Patch)
                .map_err(|e| ProtocolError::malformed(PATCH, e)),
            _ => Ok(Self::Broadcast(Envelope { kind, body })),
        }
    }
}
