//! Transport configuration types.

use std::time::Duration;

use hashwire_core::frame::DEFAULT_MAX_FRAME_LENGTH;

/// Top-level configuration for a [`Transport`](super::Transport).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bind address for the listener.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Per-connection settings.
    pub connection: ConnectionConfig,
    /// Capacity of the inbound request channel feeding the route mapper.
    pub inbound_channel_capacity: usize,
    /// Maximum time to wait when dialing a peer.
    pub connect_timeout: Duration,
    /// Maximum time `shutdown()` waits for in-flight handlers.
    pub drain_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            connection: ConnectionConfig::default(),
            inbound_channel_capacity: 1024,
            connect_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-connection configuration controlling framing limits and backpressure.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bounded mpsc channel capacity for outbound frames per connection.
    pub outbound_channel_capacity: usize,
    /// Largest accepted payload in bytes. A peer declaring more is disconnected.
    pub max_frame_length: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}
