//! Pattern routing: dispatches inbound requests to the first matching handler.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use hashwire_core::{status, PatternError, Reply, ReplyBody, RouteParams, RoutePattern};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::handler::RouteHandler;
use super::request::TcpRequest;
use super::response::TcpResponse;
use crate::network::{ConnectionId, InboundRequest, Transport, TransportEvent};

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

struct Route {
    pattern: RoutePattern,
    handler: Arc<dyn RouteHandler>,
}

// ---------------------------------------------------------------------------
// RouteMapper
// ---------------------------------------------------------------------------

/// Ordered route table bound to a transport.
///
/// Routes are tried in registration order and the first match wins, so
/// register specific patterns before broader ones. The table is fixed once
/// [`run`](Self::run) takes ownership.
pub struct RouteMapper {
    transport: Transport,
    routes: Vec<Route>,
}

impl std::fmt::Debug for RouteMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMapper")
            .field("routes", &self.patterns().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RouteMapper {
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            routes: Vec::new(),
        }
    }

    /// Compiles `pattern` and appends it to the route table.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] if the pattern is malformed; the table is
    /// left unchanged.
    pub fn register_route<H: RouteHandler>(
        &mut self,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, PatternError> {
        let pattern = RoutePattern::parse(pattern)?;
        info!(pattern = %pattern, params = ?pattern.param_names(), "registered route");
        self.routes.push(Route {
            pattern,
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    /// Registered patterns, in match order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|route| route.pattern.source())
    }

    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    fn find(&self, pattern: &str) -> Option<(&Route, RouteParams)> {
        self.routes
            .iter()
            .find_map(|route| route.pattern.captures(pattern).map(|params| (route, params)))
    }

    /// Dispatches requests from `rx` until the transport closes the channel.
    ///
    /// Matching happens here, in arrival order. Each matched handler then
    /// runs as its own task, so a slow handler never holds up later requests.
    /// Replies nobody waited for and disconnections are only logged.
    pub async fn run(self, mut rx: mpsc::Receiver<TransportEvent>) {
        info!(routes = self.routes.len(), "route mapper running");
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Request(request) => self.dispatch(request),
                TransportEvent::Reply { from, reply } => {
                    debug!(connection = %from, id = %reply.id, "reply with no waiting caller");
                }
                TransportEvent::Disconnected { id, kind } => {
                    debug!(connection = %id, kind = kind.as_str(), "peer disconnected");
                }
            }
        }
        info!("inbound channel closed; route mapper stopped");
    }

    fn dispatch(&self, request: InboundRequest) {
        let start = Instant::now();
        let InboundRequest { from, message } = request;
        let id = message.id.clone().unwrap_or_default();
        let span = info_span!(
            "rpc",
            pattern = %message.pattern,
            from = %from,
            id = %id,
            duration_ms = tracing::field::Empty,
            status = tracing::field::Empty,
            delivered = tracing::field::Empty,
        );

        let Some((route, params)) = self.find(&message.pattern) else {
            let _entered = span.enter();
            warn!("no handler for message type");
            let delivered = self.reply_not_found(&from, id, &message.pattern);
            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            let current = Span::current();
            current.record("duration_ms", duration_ms);
            current.record("status", status::NOT_FOUND);
            current.record("delivered", delivered);
            if !delivered {
                warn!("not-found reply could not be queued");
            }
            info!(duration_ms, status = status::NOT_FOUND, delivered, "request complete");
            return;
        };

        let handler = Arc::clone(&route.handler);
        let guard = self.transport.in_flight_guard();
        let req = TcpRequest::new(message, &from, params);
        let res = TcpResponse::new(self.transport.clone(), from, id);

        tokio::spawn(
            async move {
                let _guard = guard;
                let outcome = AssertUnwindSafe(handler.handle(req, res.clone()))
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(Ok(())) => {
                        if !res.is_sent() {
                            warn!("handler returned without replying");
                        }
                    }
                    Ok(Err(err)) if res.is_sent() => {
                        warn!(error = %err, "handler failed after replying");
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, "handler failed");
                        res.deliver(ReplyBody::internal_error(err.to_string()));
                    }
                    Err(_) => {
                        error!("handler panicked");
                        if !res.is_sent() {
                            res.deliver(ReplyBody::internal_error("handler panicked"));
                        }
                    }
                }

                let duration_ms = start.elapsed().as_millis();
                #[allow(clippy::cast_possible_truncation)]
                let duration_u64 = duration_ms as u64;
                let status = res.sent_status();
                Span::current().record("duration_ms", duration_u64);
                if let Some(status) = status {
                    Span::current().record("status", status);
                }
                info!(duration_ms = duration_u64, status = ?status, "request complete");
            }
            .instrument(span),
        );
    }

    /// Queues a 404 reply for a request no route matched. Returns whether it
    /// reached the sender's outbound queue.
    fn reply_not_found(&self, from: &ConnectionId, id: String, pattern: &str) -> bool {
        self.transport
            .send_to_target(from, Reply::new(id, ReplyBody::not_found(pattern)))
    }
}
