//! Connection identities, handles, and the registry of live sockets.
//!
//! Each connection gets a bounded mpsc channel drained by its writer task,
//! so senders never touch the socket directly. The registry maps connection
//! identities to handles with `DashMap`, which keeps lookups and the
//! accept/close/connect transitions safe across tokio worker threads.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hashwire_core::Packet;
use tokio::sync::mpsc;

use super::config::ConnectionConfig;

/// Identity of a connection, stable for the connection's lifetime.
///
/// Inbound connections are named after the remote socket address; outbound
/// connections after the `host:port` they were dialed with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity for a dialed peer.
    #[must_use]
    pub fn for_target(host: &str, port: u16) -> Self {
        Self(format!("{host}:{port}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SocketAddr> for ConnectionId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Accepted by our listener.
    Inbound,
    /// Dialed by us with `connect()`.
    Outbound,
}

impl ConnectionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Message queued for a connection's writer task.
#[derive(Debug)]
pub enum OutboundMessage {
    /// A packet to frame and write.
    Packet(Packet),
    /// Flush what is queued, then close the socket.
    Close,
}

/// Error returned when queueing a message for a connection fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// No connection is registered under the identity.
    #[error("no connection registered under that identity")]
    UnknownTarget,
    /// The connection's outbound queue is full.
    #[error("outbound queue is full")]
    Full,
    /// The connection's writer has exited.
    #[error("connection is closed")]
    Disconnected,
}

/// Handle to a single connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Sender end of the bounded outbound channel; the writer task holds the receiver.
    pub tx: mpsc::Sender<OutboundMessage>,
    pub kind: ConnectionKind,
    pub peer_addr: SocketAddr,
    pub connected_at: Instant,
}

impl ConnectionHandle {
    /// Queues a message without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Full`] if the queue is at capacity, or
    /// [`SendError::Disconnected`] if the writer task has exited.
    pub fn try_send(&self, msg: OutboundMessage) -> Result<(), SendError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Disconnected,
        })
    }

    /// Returns `false` once the writer task has exited.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Time since the connection was registered.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Registry of all live connections, inbound and outbound.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection, returning its handle and the receiver for its writer task.
    ///
    /// An existing entry under the same identity is replaced and returned so
    /// the caller can close it.
    pub fn register(
        &self,
        id: ConnectionId,
        kind: ConnectionKind,
        peer_addr: SocketAddr,
        config: &ConnectionConfig,
    ) -> (
        Arc<ConnectionHandle>,
        mpsc::Receiver<OutboundMessage>,
        Option<Arc<ConnectionHandle>>,
    ) {
        let (tx, rx) = mpsc::channel(config.outbound_channel_capacity);
        let handle = Arc::new(ConnectionHandle {
            id: id.clone(),
            tx,
            kind,
            peer_addr,
            connected_at: Instant::now(),
        });
        let replaced = self.connections.insert(id, Arc::clone(&handle));
        (handle, rx, replaced)
    }

    /// Removes `handle` if it is still the one registered under its identity.
    ///
    /// A connection that was replaced by a newer one under the same identity
    /// must not deregister its successor on close.
    pub fn deregister(&self, handle: &Arc<ConnectionHandle>) -> bool {
        self.connections
            .remove_if(&handle.id, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    /// Removes whatever is registered under `id`.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn count_by_kind(&self, kind: ConnectionKind) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().kind == kind)
            .count()
    }

    /// Snapshot of all live connections.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Queues `packet` for the connection registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::UnknownTarget`] if nothing is registered under
    /// `id`, otherwise the error from [`ConnectionHandle::try_send`].
    pub fn send(&self, id: &ConnectionId, packet: Packet) -> Result<(), SendError> {
        let handle = self.get(id).ok_or(SendError::UnknownTarget)?;
        handle.try_send(OutboundMessage::Packet(packet))
    }

    /// Queues `packet` on every connection of `kind`, returning how many accepted it.
    ///
    /// Uses non-blocking sends so one slow connection cannot stall the
    /// others; full or closed queues are skipped.
    pub fn broadcast(&self, packet: &Packet, kind: ConnectionKind) -> usize {
        self.connections()
            .iter()
            .filter(|handle| handle.kind == kind)
            .filter(|handle| {
                handle
                    .try_send(OutboundMessage::Packet(packet.clone()))
                    .is_ok()
            })
            .count()
    }

    /// Removes and returns all connections. Used during shutdown.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let keys: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        keys.iter().filter_map(|key| self.remove(key)).collect()
    }
}
