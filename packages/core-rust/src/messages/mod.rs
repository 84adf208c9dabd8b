//! Wire message schemas for the hashwire protocol.
//!
//! Every frame on the wire carries one JSON object. Requests look like
//! `{ "pattern": ..., "data": ..., "id": ... }` and replies look like
//! `{ "id": ..., "response": { "status": ..., "data": ... } }`. Both travel
//! over the same framing in both directions, so decoding yields a [`Packet`]
//! that tells the two apart.

pub mod reply;
pub mod request;

pub use reply::{status, Reply, ReplyBody};
pub use request::{Message, MessageError};

use serde::Serialize;
use serde_json::Value;

/// One decoded frame payload: either a request or a reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Packet {
    /// A pattern-addressed request (or fire-and-forget event when `id` is absent).
    Request(Message),
    /// A reply correlated to an earlier request by `id`.
    Reply(Reply),
}

/// Errors from interpreting a well-framed payload.
///
/// These are per-frame: the frame is consumed and the connection keeps going.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has neither a `pattern` nor a `response` field")]
    UnknownShape,
    #[error("request pattern is empty")]
    EmptyPattern,
}

impl Packet {
    /// Parses a raw payload (the bytes after the `#` separator).
    ///
    /// # Errors
    ///
    /// Returns a [`PayloadError`] if the bytes are not a JSON object shaped
    /// like a request or a reply.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Classifies an already-parsed JSON value.
    ///
    /// An object with a `pattern` key is a request; one with a `response`
    /// key is a reply.
    ///
    /// # Errors
    ///
    /// Returns a [`PayloadError`] if the value is not an object, matches
    /// neither shape, or is a request with an empty pattern.
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        let (is_request, is_reply) = match &value {
            Value::Object(map) => (map.contains_key("pattern"), map.contains_key("response")),
            _ => return Err(PayloadError::NotAnObject),
        };

        if is_request {
            let message: Message = serde_json::from_value(value)?;
            if message.pattern.is_empty() {
                return Err(PayloadError::EmptyPattern);
            }
            Ok(Self::Request(message))
        } else if is_reply {
            Ok(Self::Reply(serde_json::from_value(value)?))
        } else {
            Err(PayloadError::UnknownShape)
        }
    }

    /// Returns the correlation id carried by this packet, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Request(message) => message.id.as_deref(),
            Self::Reply(reply) => Some(reply.id.as_str()),
        }
    }
}

impl From<Message> for Packet {
    fn from(message: Message) -> Self {
        Self::Request(message)
    }
}

impl From<Reply> for Packet {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}
