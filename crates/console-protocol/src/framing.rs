//! JSON text framing with a size limit.
//!
//! Transports carry whole text frames, so framing reduces to serializing a
//! message to a single JSON document and refusing anything above the limit.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};

/// Encodes a message into a text frame.
pub fn encode_frame<T: Serialize>(message: &T, max_size: usize) -> ProtocolResult<String> {
    let text = serde_json::to_string(message)?;
    if text.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: max_size,
        });
    }
    Ok(text)
}

/// Decodes a text frame.
pub fn decode_frame<T: DeserializeOwned>(text: &str, max_size: usize) -> ProtocolResult<T> {
    if text.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: max_size,
        });
    }
    if text.trim().is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    Ok(serde_json::from_str(text)?)
}

/// Extracts a string `id` field from a frame that failed to decode as a
/// request, so the failure can still be answered.
pub fn peek_request_id(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("id")?.as_str().map(str::to_owned)
}
