//! Request messages addressed by a dot-separated pattern.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pattern-addressed request.
///
/// `id` is the correlation id; when present the matching reply echoes it
/// verbatim. A request without an id is still dispatched, and its reply
/// carries an empty id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Dot-separated operation name, e.g. `USER.UPDATE_PROFILE.60f1a`.
    pub pattern: String,
    /// Request body. Absent on the wire means `null`.
    #[serde(default)]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
}

/// Errors from building a [`Message`] locally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("message pattern must not be empty")]
    EmptyPattern,
}

impl Message {
    /// Creates a request with no correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::EmptyPattern`] if `pattern` is empty.
    pub fn new(pattern: impl Into<String>, data: Value) -> Result<Self, MessageError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(MessageError::EmptyPattern);
        }
        Ok(Self {
            pattern,
            data,
            id: None,
        })
    }

    /// Attaches a correlation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}
