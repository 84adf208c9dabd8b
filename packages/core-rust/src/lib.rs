//! hashwire core — message schemas, the `<length>#<json>` wire codec, and
//! route pattern compilation.
//!
//! Nothing here touches sockets or a runtime; the server crate drives these
//! types from its connection tasks.

pub mod catalog;
pub mod frame;
pub mod messages;
pub mod pattern;

pub use frame::{encode_packet, encode_to_vec, Decoded, FrameDecoder, FrameError};
pub use messages::{status, Message, MessageError, Packet, PayloadError, Reply, ReplyBody};
pub use pattern::{PatternError, RouteParams, RoutePattern, Segment};
