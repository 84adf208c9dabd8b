//! TCP transport: framing codec, connection registry, correlated requests, and shutdown control.

pub mod codec;
pub mod config;
pub mod connection;
pub mod pending;
pub mod shutdown;
pub mod transport;

pub use codec::{CodecError, WireCodec};
pub use config::*;
pub use connection::*;
pub use pending::{PendingReplies, PendingReply};
pub use shutdown::*;
pub use transport::{InboundRequest, RequestError, Transport, TransportError, TransportEvent};
