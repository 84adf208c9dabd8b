//! Reply envelopes correlated to requests by id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP-style status codes used in reply bodies.
pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
}

/// A reply to a request, echoing the request's correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub response: ReplyBody,
}

/// Status and payload of a reply.
///
/// Success replies carry `data`. Replies synthesised by the dispatcher for
/// unrouted patterns or failed handlers carry `error` (the reason phrase)
/// and `message` (the detail) instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyBody {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl Reply {
    #[must_use]
    pub fn new(id: impl Into<String>, response: ReplyBody) -> Self {
        Self {
            id: id.into(),
            response,
        }
    }
}

impl ReplyBody {
    /// A `200` reply carrying `data`.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self::with_status(status::OK, data)
    }

    /// A reply with an explicit status carrying `data`.
    #[must_use]
    pub fn with_status(status: u16, data: Value) -> Self {
        Self {
            status,
            data,
            error: None,
            message: None,
        }
    }

    /// The `404` reply sent when no route matches `pattern`.
    #[must_use]
    pub fn not_found(pattern: &str) -> Self {
        Self {
            status: status::NOT_FOUND,
            data: Value::Null,
            error: Some("Not Found".to_string()),
            message: Some(format!("No handler for message type: {pattern}")),
        }
    }

    /// The `500` reply sent when a handler fails.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            status: status::INTERNAL_SERVER_ERROR,
            data: Value::Null,
            error: Some("Internal Server Error".to_string()),
            message: Some(message.into()),
        }
    }

    /// Whether the status is in the `2xx` range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
