//! Response facade handed to route handlers.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use hashwire_core::{status, Reply, ReplyBody};
use serde_json::Value;
use tracing::warn;

use crate::network::{ConnectionId, Transport};

#[derive(Debug, Default)]
struct ReplyState {
    sent: AtomicBool,
    /// Status of the delivered reply, 0 until one is sent.
    status: AtomicU16,
}

/// Single-use reply sink bound to the requesting connection and correlation id.
///
/// Clones share the "already replied" state, so only the first reply across
/// all clones goes out. The status set with [`status`](Self::status) is per
/// clone.
#[derive(Debug, Clone)]
pub struct TcpResponse {
    transport: Transport,
    target: ConnectionId,
    id: String,
    status: u16,
    state: Arc<ReplyState>,
}

impl TcpResponse {
    #[must_use]
    pub fn new(transport: Transport, target: ConnectionId, id: impl Into<String>) -> Self {
        Self {
            transport,
            target,
            id: id.into(),
            status: status::OK,
            state: Arc::default(),
        }
    }

    /// Sets the status code used by the next `json` or `send`.
    pub fn status(&mut self, code: u16) -> &mut Self {
        self.status = code;
        self
    }

    /// Sends `data` as the reply body.
    ///
    /// Returns `false` if a reply was already sent or the connection is gone.
    pub fn json(&self, data: Value) -> bool {
        self.send(Some(data))
    }

    /// Sends the reply, with `data` or an empty body.
    ///
    /// Returns `false` if a reply was already sent or the connection is gone.
    pub fn send(&self, data: Option<Value>) -> bool {
        self.deliver(ReplyBody::with_status(self.status, data.unwrap_or(Value::Null)))
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.state.sent.load(Ordering::Acquire)
    }

    /// Status of the reply that went out, if any.
    #[must_use]
    pub fn sent_status(&self) -> Option<u16> {
        match self.state.status.load(Ordering::Acquire) {
            0 => None,
            code => Some(code),
        }
    }

    #[must_use]
    pub fn target(&self) -> &ConnectionId {
        &self.target
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.id
    }

    /// Sends `body` unless a reply already went out.
    pub(crate) fn deliver(&self, body: ReplyBody) -> bool {
        if self.state.sent.swap(true, Ordering::AcqRel) {
            warn!(connection = %self.target, id = %self.id, "reply already sent; dropping duplicate");
            return false;
        }
        self.state.status.store(body.status, Ordering::Release);
        self.transport
            .send_to_target(&self.target, Reply::new(self.id.clone(), body))
    }
}
