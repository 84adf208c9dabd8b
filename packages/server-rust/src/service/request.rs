//! Request facade handed to route handlers.

use std::collections::BTreeMap;

use hashwire_core::{Message, RouteParams};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::network::ConnectionId;

/// Header carrying the sender's connection identity.
pub const SENDER_ID_HEADER: &str = "x-sender-id";
/// Header carrying the correlation id, empty when the request had none.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Header carrying the request's message pattern.
pub const MESSAGE_TYPE_HEADER: &str = "x-message-type";

/// Key under which callers embed the authenticated principal in `data`.
const USER_KEY: &str = "user";

/// An inbound request as seen by a handler.
///
/// Built fresh for every dispatched message.
#[derive(Debug, Clone, PartialEq)]
pub struct TcpRequest {
    /// Request data with the `user` key removed. Non-object data is kept as is.
    pub body: Value,
    /// The `user` value lifted out of the request data; an empty object when
    /// the data carried none.
    pub user: Value,
    /// Values captured by the route's `:name` segments.
    pub params: RouteParams,
    /// Always empty; message patterns carry no query string.
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

impl TcpRequest {
    #[must_use]
    pub fn new(message: Message, sender: &ConnectionId, params: RouteParams) -> Self {
        let Message { pattern, data, id } = message;
        let (body, user) = match data {
            Value::Object(mut fields) => {
                let user = fields.remove(USER_KEY);
                (Value::Object(fields), user)
            }
            other => (other, None),
        };
        let user = user.unwrap_or_else(|| Value::Object(Map::new()));

        let headers = BTreeMap::from([
            (SENDER_ID_HEADER.to_string(), sender.to_string()),
            (REQUEST_ID_HEADER.to_string(), id.unwrap_or_default()),
            (MESSAGE_TYPE_HEADER.to_string(), pattern),
        ]);

        Self {
            body,
            user,
            params,
            query: BTreeMap::new(),
            headers,
        }
    }

    /// Whether the request carried a non-empty `user`.
    #[must_use]
    pub fn has_user(&self) -> bool {
        match &self.user {
            Value::Null => false,
            Value::Object(fields) => !fields.is_empty(),
            _ => true,
        }
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Looks up a header, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.header(MESSAGE_TYPE_HEADER).unwrap_or_default()
    }

    /// Deserializes the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the body does not fit `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }
}
