//! Request routing over the TCP transport.
//!
//! The transport hands decoded requests to a [`RouteMapper`], which finds the
//! first route whose pattern matches, wraps the message in a [`TcpRequest`]
//! and a [`TcpResponse`], and runs the route's [`RouteHandler`]. Unmatched
//! patterns get a 404 reply and failed handlers a 500.

pub mod handler;
pub mod request;
pub mod response;
pub mod router;

pub use handler::RouteHandler;
pub use request::{TcpRequest, MESSAGE_TYPE_HEADER, REQUEST_ID_HEADER, SENDER_ID_HEADER};
pub use response::TcpResponse;
pub use router::RouteMapper;
