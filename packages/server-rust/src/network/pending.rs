//! Correlation table for requests awaiting a reply.
//!
//! `Transport::request()` registers a waiter under a fresh correlation id
//! before sending; the connection reader completes it when a reply with the
//! same id arrives. Waiters are removed when they resolve, time out, or are
//! dropped, so the table never outlives its callers.

use std::sync::Arc;

use dashmap::DashMap;
use hashwire_core::{Reply, ReplyBody};
use tokio::sync::oneshot;

use super::connection::ConnectionId;

#[derive(Debug)]
struct Waiter {
    connection: ConnectionId,
    tx: oneshot::Sender<ReplyBody>,
}

/// Outstanding requests keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingReplies {
    waiters: DashMap<String, Waiter>,
}

impl PendingReplies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for a reply with `id` arriving on `connection`.
    pub fn register(self: &Arc<Self>, id: String, connection: ConnectionId) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id.clone(), Waiter { connection, tx });
        PendingReply {
            id,
            table: Arc::clone(self),
            rx,
        }
    }

    /// Hands `reply` to its waiter.
    ///
    /// Returns the reply back if nobody is waiting for its id, so the caller
    /// can pass it on.
    pub fn complete(&self, reply: Reply) -> Option<Reply> {
        match self.waiters.remove(&reply.id) {
            Some((_, waiter)) => {
                // A waiter dropped mid-flight has already given up on the reply.
                let _ = waiter.tx.send(reply.response);
                None
            }
            None => Some(reply),
        }
    }

    /// Drops every waiter bound to `connection`, waking each with a closed error.
    pub fn fail_connection(&self, connection: &ConnectionId) -> usize {
        let ids: Vec<String> = self
            .waiters
            .iter()
            .filter(|entry| &entry.value().connection == connection)
            .map(|entry| entry.key().clone())
            .collect();
        ids.iter()
            .filter(|id| self.waiters.remove(*id).is_some())
            .count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// A registered waiter. Dropping it removes the table entry.
#[derive(Debug)]
pub struct PendingReply {
    id: String,
    table: Arc<PendingReplies>,
    rx: oneshot::Receiver<ReplyBody>,
}

impl PendingReply {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the waiter was dropped from the table, which
    /// happens when its connection closes.
    pub async fn recv(&mut self) -> Result<ReplyBody, oneshot::error::RecvError> {
        (&mut self.rx).await
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.waiters.remove(&self.id);
    }
}
