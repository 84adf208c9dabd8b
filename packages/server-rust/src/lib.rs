//! hashwire server: length-prefixed JSON RPC over TCP with pattern routing.
//!
//! [`network::Transport`] owns the sockets and emits decoded requests on a
//! channel; [`service::RouteMapper`] consumes that channel and dispatches each
//! request to the first route whose pattern matches.

pub mod network;
pub mod service;

pub use network::{
    InboundRequest, RequestError, Transport, TransportConfig, TransportError, TransportEvent,
};
pub use service::{RouteHandler, RouteMapper, TcpRequest, TcpResponse};
