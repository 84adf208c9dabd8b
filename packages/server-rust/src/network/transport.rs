//! TCP transport: listener, dialer, and per-connection reader/writer tasks.
//!
//! Every connection, accepted or dialed, runs the same pair of tasks:
//!
//! - a reader that decodes frames in arrival order, forwards requests to the
//!   inbound channel, and hands replies to the pending-reply table;
//! - a writer that drains the connection's outbound queue into the socket.
//!
//! Everything a peer sends, plus connection loss, leaves the transport as a
//! [`TransportEvent`] on the receiver returned by [`Transport::new`];
//! whoever owns that receiver owns dispatch.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hashwire_core::{Message, MessageError, Packet, Reply, ReplyBody};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::codec::WireCodec;
use super::config::TransportConfig;
use super::connection::{
    ConnectionHandle, ConnectionId, ConnectionKind, ConnectionRegistry, OutboundMessage,
    SendError,
};
use super::pending::PendingReplies;
use super::shutdown::{InFlightGuard, ShutdownController, TransportState};

/// A decoded request together with the connection it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    pub from: ConnectionId,
    pub message: Message,
}

/// What the transport reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A request decoded on any connection, in arrival order per connection.
    Request(InboundRequest),
    /// A reply that no [`Transport::request`] call was waiting for.
    Reply { from: ConnectionId, reply: Reply },
    /// A connection closed and its identity was deregistered.
    Disconnected {
        id: ConnectionId,
        kind: ConnectionKind,
    },
}

/// Errors from starting the listener or dialing a peer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind listener at {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("listener already running on {addr}")]
    AlreadyListening { addr: SocketAddr },
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out connecting to {target} after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },
    #[error("transport is shut down")]
    ShutDown,
}

/// Errors from [`Transport::request`].
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("cannot send to {target}: {source}")]
    Send {
        target: ConnectionId,
        #[source]
        source: SendError,
    },
    /// No reply arrived in time. The peer may still have processed the request.
    #[error("no reply within {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("connection closed before a reply arrived")]
    ConnectionClosed,
}

struct ListenerState {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

struct Inner {
    config: TransportConfig,
    registry: Arc<ConnectionRegistry>,
    pending: Arc<PendingReplies>,
    shutdown: Arc<ShutdownController>,
    /// Taken on shutdown so the inbound channel closes once readers exit.
    inbound_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    listener: Mutex<Option<ListenerState>>,
}

/// Handle to a transport. Cloning is cheap; all clones share one registry.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("local_addr", &self.local_addr())
            .field("state", &self.state())
            .field("connections", &self.inner.registry.count())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Creates a transport and the receiving end of its event stream.
    ///
    /// Nothing is bound until [`start_server`](Self::start_server).
    #[must_use]
    pub fn new(config: TransportConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(config.inbound_channel_capacity);
        let inner = Inner {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            pending: Arc::new(PendingReplies::new()),
            shutdown: Arc::new(ShutdownController::new()),
            inbound_tx: Mutex::new(Some(tx)),
            listener: Mutex::new(None),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.inner.registry)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.inner.shutdown)
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        self.inner.shutdown.state()
    }

    /// Address the listener is bound to, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.listener.lock().as_ref().map(|l| l.local_addr)
    }

    /// Marks a request handler as running so `shutdown()` waits for it.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.inner.shutdown.in_flight_guard()
    }

    /// Binds the configured host and port and starts accepting connections.
    ///
    /// Returns the bound address, which carries the OS-assigned port when
    /// the configured port is 0.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the address cannot be bound,
    /// [`TransportError::AlreadyListening`] if a listener is already running,
    /// or [`TransportError::ShutDown`] after shutdown.
    pub async fn start_server(&self) -> Result<SocketAddr, TransportError> {
        if self.inner.shutdown.is_shutting_down() {
            return Err(TransportError::ShutDown);
        }
        if let Some(addr) = self.local_addr() {
            return Err(TransportError::AlreadyListening { addr });
        }

        let addr = format!("{}:{}", self.inner.config.host, self.inner.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        let mut slot = self.inner.listener.lock();
        if let Some(existing) = slot.as_ref() {
            return Err(TransportError::AlreadyListening {
                addr: existing.local_addr,
            });
        }
        let task = tokio::spawn(accept_loop(Arc::clone(&self.inner), listener));
        *slot = Some(ListenerState { local_addr, task });
        drop(slot);

        self.inner.shutdown.set_listening();
        info!(addr = %local_addr, "TCP transport listening");
        Ok(local_addr)
    }

    /// Dials `host:port`, or reuses a live connection to the same target.
    ///
    /// Replies and requests arriving on the dialed connection flow through
    /// the same decode path as inbound connections.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] or
    /// [`TransportError::ConnectTimeout`] if the peer cannot be reached, or
    /// [`TransportError::ShutDown`] after shutdown.
    pub async fn connect(&self, host: &str, port: u16) -> Result<ConnectionId, TransportError> {
        let id = ConnectionId::for_target(host, port);
        if self.inner.shutdown.is_shutting_down() {
            return Err(TransportError::ShutDown);
        }
        if self.is_live(&id) {
            return Ok(id);
        }

        let timeout = self.inner.config.connect_timeout;
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                target: id.to_string(),
                timeout,
            })?
            .map_err(|source| TransportError::Connect {
                target: id.to_string(),
                source,
            })?;
        let peer_addr = stream.peer_addr().map_err(|source| TransportError::Connect {
            target: id.to_string(),
            source,
        })?;

        // A concurrent connect() may have won the race while we dialed.
        if self.is_live(&id) {
            return Ok(id);
        }
        spawn_connection(&self.inner, stream, id.clone(), ConnectionKind::Outbound, peer_addr)
            .ok_or(TransportError::ShutDown)?;
        Ok(id)
    }

    fn is_live(&self, id: &ConnectionId) -> bool {
        self.inner
            .registry
            .get(id)
            .is_some_and(|handle| handle.is_connected())
    }

    /// Queues `packet` for the connection registered under `target`.
    ///
    /// Returns `false`, without writing anything, if no such connection is
    /// registered or its outbound queue cannot take the packet.
    #[must_use]
    pub fn send_to_target(&self, target: &ConnectionId, packet: impl Into<Packet>) -> bool {
        match self.inner.registry.send(target, packet.into()) {
            Ok(()) => true,
            Err(error) => {
                warn!(connection = %target, %error, "send failed");
                false
            }
        }
    }

    /// Best-effort send of `packet` to every inbound connection.
    ///
    /// Returns how many connections accepted it; a failure on one does not
    /// stop delivery to the rest.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        let delivered = self
            .inner
            .registry
            .broadcast(packet, ConnectionKind::Inbound);
        let total = self.inner.registry.count_by_kind(ConnectionKind::Inbound);
        if delivered < total {
            warn!(delivered, total, "broadcast skipped some connections");
        } else {
            debug!(delivered, "broadcast sent");
        }
        delivered
    }

    /// Sends a request to `target` and waits for the correlated reply.
    ///
    /// A fresh UUID is used as the correlation id. The transport never
    /// retries: on timeout the request may or may not have been processed.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Timeout`] if no reply arrives in time,
    /// [`RequestError::ConnectionClosed`] if the connection drops first,
    /// [`RequestError::Send`] if the request cannot be queued, or
    /// [`RequestError::Message`] for an empty pattern.
    pub async fn request(
        &self,
        target: &ConnectionId,
        pattern: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<ReplyBody, RequestError> {
        let id = Uuid::new_v4().to_string();
        let message = Message::new(pattern, data)?.with_id(id.clone());
        let mut waiter = self.inner.pending.register(id, target.clone());

        self.inner
            .registry
            .send(target, Packet::Request(message))
            .map_err(|source| RequestError::Send {
                target: target.clone(),
                source,
            })?;

        match tokio::time::timeout(timeout, waiter.recv()).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(RequestError::ConnectionClosed),
            Err(_) => {
                debug!(connection = %target, pattern, id = waiter.id(), "request timed out");
                Err(RequestError::Timeout { timeout })
            }
        }
    }

    /// Stops listening, lets in-flight handlers finish, and closes every socket.
    ///
    /// Handlers that finish within `drain_timeout` can still deliver their
    /// replies. Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        if !self.inner.shutdown.begin_shutdown() {
            return;
        }

        let listener = self.inner.listener.lock().take();
        if let Some(listener) = listener {
            // The accept loop exits on the shutdown signal; awaiting it
            // guarantees the listening socket is released.
            let _ = listener.task.await;
        }
        self.inner.inbound_tx.lock().take();

        let in_flight = self.inner.shutdown.in_flight_count();
        if in_flight > 0 {
            info!(in_flight, "waiting for in-flight handlers");
        }
        if !self
            .inner
            .shutdown
            .wait_for_drain(self.inner.config.drain_timeout)
            .await
        {
            warn!(
                in_flight = self.inner.shutdown.in_flight_count(),
                "drain timeout expired with handlers still running"
            );
            self.inner.shutdown.mark_stopped();
        }

        let handles = self.inner.registry.drain_all();
        for handle in &handles {
            let _ = handle.try_send(OutboundMessage::Close);
            self.inner.pending.fail_connection(&handle.id);
        }
        info!(closed = handles.len(), "TCP transport shut down");
    }
}

/// Resolves once shutdown has been signalled (or the controller is gone).
async fn shutdown_signalled(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    let shutdown = shutdown_signalled(inner.shutdown.subscribe());
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    spawn_connection(
                        &inner,
                        stream,
                        ConnectionId::from(peer_addr),
                        ConnectionKind::Inbound,
                        peer_addr,
                    );
                }
                Err(error) => {
                    // Usually resource exhaustion; back off instead of spinning.
                    warn!(%error, "accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            () = &mut shutdown => break,
        }
    }
    debug!("accept loop stopped");
}

/// Registers the connection and spawns its reader and writer tasks.
///
/// Returns `None` once shutdown has closed the inbound channel.
fn spawn_connection(
    inner: &Arc<Inner>,
    stream: TcpStream,
    id: ConnectionId,
    kind: ConnectionKind,
    peer_addr: SocketAddr,
) -> Option<Arc<ConnectionHandle>> {
    let inbound_tx = inner.inbound_tx.lock().clone()?;
    if let Err(error) = stream.set_nodelay(true) {
        debug!(connection = %id, %error, "failed to set TCP_NODELAY");
    }

    let (handle, rx, replaced) =
        inner
            .registry
            .register(id.clone(), kind, peer_addr, &inner.config.connection);
    if let Some(previous) = replaced {
        warn!(connection = %id, "identity reused; closing previous connection");
        let _ = previous.try_send(OutboundMessage::Close);
    }
    info!(connection = %id, kind = kind.as_str(), "connection opened");

    let codec = WireCodec::new(inner.config.connection.max_frame_length);
    let (read_half, write_half) = stream.into_split();
    tokio::spawn(write_loop(write_half, rx, id, codec));
    tokio::spawn(read_loop(
        Arc::clone(inner),
        read_half,
        Arc::clone(&handle),
        inbound_tx,
        codec,
    ));
    Some(handle)
}

async fn write_loop(
    write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<OutboundMessage>,
    id: ConnectionId,
    codec: WireCodec,
) {
    let mut sink = FramedWrite::new(write_half, codec);
    while let Some(msg) = rx.recv().await {
        match msg {
            OutboundMessage::Packet(packet) => {
                if let Err(error) = sink.send(packet).await {
                    warn!(connection = %id, %error, "write failed");
                    break;
                }
            }
            OutboundMessage::Close => break,
        }
    }
    if let Err(error) = sink.close().await {
        debug!(connection = %id, %error, "error closing socket");
    }
}

enum ReadEnd {
    PeerClosed,
    FramingError,
    ClosedLocally,
    DispatcherGone,
    Shutdown,
}

impl ReadEnd {
    fn as_str(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer closed",
            Self::FramingError => "framing error",
            Self::ClosedLocally => "closed locally",
            Self::DispatcherGone => "dispatcher gone",
            Self::Shutdown => "shutdown",
        }
    }
}

async fn read_loop(
    inner: Arc<Inner>,
    read_half: OwnedReadHalf,
    handle: Arc<ConnectionHandle>,
    inbound_tx: mpsc::Sender<TransportEvent>,
    codec: WireCodec,
) {
    let mut frames = FramedRead::new(read_half, codec);
    let shutdown = shutdown_signalled(inner.shutdown.subscribe());
    tokio::pin!(shutdown);

    let end = loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(Ok(Packet::Request(message)))) => {
                    debug!(
                        connection = %handle.id,
                        pattern = %message.pattern,
                        id = message.id.as_deref().unwrap_or(""),
                        "request decoded"
                    );
                    let request = InboundRequest { from: handle.id.clone(), message };
                    if inbound_tx.send(TransportEvent::Request(request)).await.is_err() {
                        break ReadEnd::DispatcherGone;
                    }
                }
                Some(Ok(Ok(Packet::Reply(reply)))) => {
                    if let Some(reply) = inner.pending.complete(reply) {
                        debug!(connection = %handle.id, id = %reply.id, "reply with no waiting caller");
                        let event = TransportEvent::Reply { from: handle.id.clone(), reply };
                        let _ = inbound_tx.send(event).await;
                    }
                }
                Some(Ok(Err(error))) => {
                    warn!(connection = %handle.id, %error, "discarding undecodable frame");
                }
                Some(Err(error)) => {
                    warn!(connection = %handle.id, %error, "closing connection");
                    break ReadEnd::FramingError;
                }
                None => break ReadEnd::PeerClosed,
            },
            () = handle.tx.closed() => break ReadEnd::ClosedLocally,
            () = &mut shutdown => break ReadEnd::Shutdown,
        }
    };

    // On shutdown the connection stays registered so draining handlers can
    // still reply; `Transport::shutdown` closes it afterwards.
    if matches!(end, ReadEnd::Shutdown) {
        return;
    }
    let _ = handle.try_send(OutboundMessage::Close);

    // A connection replaced under the same identity leaves the waiters and
    // the identity itself to its successor.
    let deregistered = inner.registry.deregister(&handle);
    let failed = if deregistered {
        inner.pending.fail_connection(&handle.id)
    } else {
        0
    };
    #[allow(clippy::cast_possible_truncation)]
    let connected_ms = handle.age().as_millis() as u64;
    info!(
        connection = %handle.id,
        kind = handle.kind.as_str(),
        reason = end.as_str(),
        connected_ms,
        replaced = !deregistered,
        failed_requests = failed,
        "connection closed"
    );

    if deregistered {
        let event = TransportEvent::Disconnected {
            id: handle.id.clone(),
            kind: handle.kind,
        };
        let _ = inbound_tx.send(event).await;
    }
}

/// Polls `check` until it holds or `within` elapses.
#[cfg(test)]
pub(crate) async fn eventually(within: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Awaits `fut`, failing the test if it takes longer than two seconds.
#[cfg(test)]
pub(crate) async fn within_2s<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out")
}

#[cfg(test)]
mod tests {
    use hashwire_core::frame::encode_to_vec;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn listening() -> (Transport, mpsc::Receiver<TransportEvent>, SocketAddr) {
        let (transport, rx) = Transport::new(TransportConfig::default());
        let addr = transport.start_server().await.unwrap();
        (transport, rx, addr)
    }

    /// Next request off the event stream, skipping other events.
    async fn next_request(rx: &mut mpsc::Receiver<TransportEvent>) -> InboundRequest {
        loop {
            match within_2s(rx.recv()).await {
                Some(TransportEvent::Request(request)) => return request,
                Some(_) => {}
                None => panic!("event stream closed"),
            }
        }
    }

    fn frame(pattern: &str, data: Value, id: &str) -> Vec<u8> {
        let message = Message::new(pattern, data).unwrap().with_id(id);
        encode_to_vec(&Packet::Request(message)).unwrap()
    }

    async fn read_frame(stream: &mut TcpStream) -> Packet {
        let mut buf = bytes::BytesMut::new();
        let decoder = hashwire_core::FrameDecoder::default();
        loop {
            if let Some(decoded) = decoder.decode(&mut buf).unwrap() {
                return decoded.unwrap();
            }
            let mut chunk = [0_u8; 1024];
            let n = within_2s(stream.read(&mut chunk)).await.unwrap();
            assert!(n > 0, "connection closed before a full frame");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn start_server_binds_os_assigned_port() {
        let (transport, _rx, addr) = listening().await;
        assert!(addr.port() > 0);
        assert_eq!(transport.local_addr(), Some(addr));
        assert_eq!(transport.state(), TransportState::Listening);

        let err = transport.start_server().await.unwrap_err();
        assert!(matches!(err, TransportError::AlreadyListening { .. }));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let (_first, _rx1, addr) = listening().await;
        let (second, _rx2) = Transport::new(TransportConfig {
            port: addr.port(),
            ..TransportConfig::default()
        });
        let err = second.start_server().await.unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }

    #[tokio::test]
    async fn inbound_requests_carry_sender_identity_in_order() {
        let (_transport, mut rx, addr) = listening().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        let client_id = ConnectionId::from(client.local_addr().unwrap());

        let mut wire = frame("A.FIRST", json!({}), "1");
        wire.extend(frame("A.SECOND", json!({"n": 2}), "2"));
        // Split inside the second frame's length prefix.
        let split = wire.len() - frame("A.SECOND", json!({"n": 2}), "2").len() + 1;
        client.write_all(&wire[..split]).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(&wire[split..]).await.unwrap();

        let first = next_request(&mut rx).await;
        let second = next_request(&mut rx).await;
        assert_eq!(first.from, client_id);
        assert_eq!(first.message.pattern, "A.FIRST");
        assert_eq!(second.message.pattern, "A.SECOND");
        assert_eq!(second.message.data, json!({"n": 2}));
    }

    #[tokio::test]
    async fn send_to_target_writes_a_frame() {
        let (transport, mut rx, addr) = listening().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&frame("A.B", json!({}), "x")).await.unwrap();
        let request = next_request(&mut rx).await;

        let reply = Reply::new("x", ReplyBody::ok(json!({"ok": true})));
        assert!(transport.send_to_target(&request.from, reply.clone()));
        assert_eq!(read_frame(&mut client).await, Packet::Reply(reply));
    }

    #[tokio::test]
    async fn send_to_unknown_or_departed_target_fails() {
        let (transport, mut rx, addr) = listening().await;
        let reply = Reply::new("x", ReplyBody::ok(Value::Null));
        assert!(!transport.send_to_target(&ConnectionId::new("10.9.9.9:1"), reply.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&frame("A.B", json!({}), "x")).await.unwrap();
        let request = next_request(&mut rx).await;
        drop(client);

        let registry = transport.registry();
        assert!(eventually(Duration::from_secs(2), || registry.count() == 0).await);
        assert!(!transport.send_to_target(&request.from, reply));
    }

    #[tokio::test]
    async fn framing_error_closes_the_connection() {
        let (transport, _rx, addr) = listening().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        let registry = transport.registry();
        assert!(eventually(Duration::from_secs(2), || registry.count() == 1).await);

        client.write_all(b"12x#{}").await.unwrap();
        let mut buf = [0_u8; 16];
        let n = within_2s(client.read(&mut buf)).await.unwrap_or(0);
        assert_eq!(n, 0, "server should close the socket");
        assert!(eventually(Duration::from_secs(2), || registry.count() == 0).await);
    }

    #[tokio::test]
    async fn undecodable_payload_keeps_the_connection() {
        let (_transport, mut rx, addr) = listening().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        let mut wire = b"5#nope!".to_vec();
        wire.extend(frame("A.AFTER", json!({}), "2"));
        client.write_all(&wire).await.unwrap();

        let request = next_request(&mut rx).await;
        assert_eq!(request.message.pattern, "A.AFTER");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_inbound_connection() {
        let (transport, _rx, addr) = listening().await;
        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        let registry = transport.registry();
        assert!(eventually(Duration::from_secs(2), || registry.count() == 2).await);

        let event = Packet::Request(Message::new("EVENT.USER_UPDATED", json!({"id": 1})).unwrap());
        assert_eq!(transport.broadcast(&event), 2);
        assert_eq!(read_frame(&mut a).await, event);
        assert_eq!(read_frame(&mut b).await, event);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (_server, _srv_rx, addr) = listening().await;
        let (client, _rx) = Transport::new(TransportConfig::default());

        let first = client.connect("127.0.0.1", addr.port()).await.unwrap();
        let second = client.connect("127.0.0.1", addr.port()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str(), format!("127.0.0.1:{}", addr.port()));
        assert_eq!(client.registry().count_by_kind(ConnectionKind::Outbound), 1);
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let (server, _rx, addr) = listening().await;
        server.shutdown().await;

        let (client, _crx) = Transport::new(TransportConfig::default());
        let err = client.connect("127.0.0.1", addr.port()).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn request_resolves_with_correlated_reply() {
        let (server, mut srv_rx, addr) = listening().await;
        let responder = tokio::spawn(async move {
            while let Some(event) = srv_rx.recv().await {
                let TransportEvent::Request(request) = event else {
                    continue;
                };
                let id = request.message.id.clone().unwrap_or_default();
                let body = ReplyBody::ok(json!({"echo": request.message.data}));
                assert!(server.send_to_target(&request.from, Reply::new(id, body)));
            }
        });

        let (client, _rx) = Transport::new(TransportConfig::default());
        let peer = client.connect("127.0.0.1", addr.port()).await.unwrap();
        let body = client
            .request(&peer, "ECHO.SAY", json!("hi"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(body.status, 200);
        assert_eq!(body.data, json!({"echo": "hi"}));

        responder.abort();
    }

    #[tokio::test]
    async fn dialed_connection_emits_replies_nobody_waits_for() {
        let (server, mut srv_rx, addr) = listening().await;
        let (client, mut rx) = Transport::new(TransportConfig::default());
        let peer = client.connect("127.0.0.1", addr.port()).await.unwrap();

        let message = Message::new("USER.GET_PROFILE", json!({})).unwrap().with_id("abc");
        assert!(client.send_to_target(&peer, message));
        let request = next_request(&mut srv_rx).await;
        assert_eq!(request.message.id.as_deref(), Some("abc"));

        let reply = Reply::new("abc", ReplyBody::ok(json!(1)));
        assert!(server.send_to_target(&request.from, reply.clone()));
        assert_eq!(
            within_2s(rx.recv()).await,
            Some(TransportEvent::Reply { from: peer, reply })
        );
    }

    #[tokio::test]
    async fn replaced_connection_leaves_successor_requests_alone() {
        let (server, mut srv_rx, addr) = listening().await;
        let responder = tokio::spawn(async move {
            while let Some(event) = srv_rx.recv().await {
                let TransportEvent::Request(request) = event else {
                    continue;
                };
                let server = server.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    let id = request.message.id.clone().unwrap_or_default();
                    let pong = Reply::new(id, ReplyBody::ok(json!("pong")));
                    let _ = server.send_to_target(&request.from, pong);
                });
            }
        });

        let (client, _rx) = Transport::new(TransportConfig::default());
        let id = client.connect("127.0.0.1", addr.port()).await.unwrap();
        let previous = client.registry().get(&id).unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        let peer_addr = stream.peer_addr().unwrap();
        let successor =
            spawn_connection(&client.inner, stream, id.clone(), ConnectionKind::Outbound, peer_addr)
                .unwrap();
        assert!(!Arc::ptr_eq(&previous, &successor));

        // The previous connection closes while this request is in flight.
        let body = client
            .request(&id, "PING.NOW", Value::Null, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(body.data, json!("pong"));
        assert!(!previous.is_connected());
        assert!(Arc::ptr_eq(&client.registry().get(&id).unwrap(), &successor));

        responder.abort();
    }

    #[tokio::test]
    async fn dropped_client_is_reported_as_disconnected() {
        let (transport, mut rx, addr) = listening().await;
        let client = TcpStream::connect(addr).await.unwrap();
        let client_id = ConnectionId::from(client.local_addr().unwrap());
        let registry = transport.registry();
        assert!(eventually(Duration::from_secs(2), || registry.count() == 1).await);

        drop(client);
        assert_eq!(
            within_2s(rx.recv()).await,
            Some(TransportEvent::Disconnected {
                id: client_id,
                kind: ConnectionKind::Inbound,
            })
        );
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn request_times_out_without_reply() {
        let (_server, _srv_rx, addr) = listening().await;
        let (client, _rx) = Transport::new(TransportConfig::default());
        let peer = client.connect("127.0.0.1", addr.port()).await.unwrap();

        let err = client
            .request(&peer, "SLOW.NEVER", Value::Null, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Timeout { .. }));
        assert!(client.inner.pending.is_empty());
    }

    #[tokio::test]
    async fn request_to_unknown_target_fails_fast() {
        let (client, _rx) = Transport::new(TransportConfig::default());
        let err = client
            .request(&ConnectionId::new("nowhere:1"), "A.B", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::Send { source: SendError::UnknownTarget, .. }
        ));
        assert!(client.inner.pending.is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let (transport, mut rx, addr) = listening().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&frame("A.B", json!({}), "1")).await.unwrap();
        let request = next_request(&mut rx).await;

        transport.shutdown().await;
        assert_eq!(transport.state(), TransportState::Stopped);
        assert_eq!(transport.registry().count(), 0);
        assert!(!transport.send_to_target(&request.from, Reply::new("1", ReplyBody::ok(Value::Null))));
        assert!(within_2s(rx.recv()).await.is_none());

        let mut buf = [0_u8; 8];
        assert_eq!(within_2s(client.read(&mut buf)).await.unwrap_or(0), 0);
        assert!(matches!(
            transport.connect("127.0.0.1", addr.port()).await,
            Err(TransportError::ShutDown)
        ));

        // Second call is a no-op.
        transport.shutdown().await;
    }
}
