//! The publish side of the pub/sub transport.
//!
//! A [`StreamEndpoint`] owns every socket resource used to publish:
//! the listener (bind mode) or the connector (connect mode), and one
//! outbound queue per attached subscriber. Background tasks perform the
//! handshake, track each subscriber's topic filter and drain its queue
//! onto the socket; the endpoint's owner only ever calls
//! [`send`](StreamEndpoint::send), which never waits on a socket.
//!
//! ```text
//!   accept / connect task ──► handshake ──► PeerLink ◄── StreamEndpoint::send
//!                                  │            │            (try_send)
//!                                  │            ▼
//!                                  │      writer task (per peer) ──► socket
//!                                  └──► subscription reader (per peer)
//! ```
//!
//! Each queue holds at most `send_high_water_mark` messages. When a
//! subscriber's queue is full, new messages are dropped for that
//! subscriber only, as a ZeroMQ PUB socket does at its high-water mark.
//!
//! Dropping the endpoint cancels every background task and closes every
//! socket.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, StreamError};
use crate::transport::address::{AddressMode, TransportAddress};
use crate::transport::handshake::{Handshaken, handshake};
use crate::transport::subscription::SubscriptionSet;
use crate::transport::zmtp::{
    DEFAULT_MAX_FRAME_SIZE, Multipart, SocketType, SubscriptionChange, ZmtpCodec,
};

// ── EndpointState ────────────────────────────────────────────────

/// Lifecycle of the publishing endpoint.
///
/// ```text
///  Uninitialized ──(connected)──► Bound ──(teardown)──► Closed
/// ```
///
/// There is no way back to `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointState {
    /// No transport address received yet.
    #[default]
    Uninitialized,
    /// Socket created; frames can be published.
    Bound,
    /// Torn down. Terminal.
    Closed,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Bound => write!(f, "Bound"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl EndpointState {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound)
    }

    /// Check that a bind may start, without transitioning.
    pub fn check_bind(&self) -> Result<()> {
        match self {
            Self::Uninitialized => Ok(()),
            Self::Bound => Err(StreamError::AlreadyBound),
            Self::Closed => Err(StreamError::Closed),
        }
    }

    /// Transition to `Bound`.
    ///
    /// Valid from: `Uninitialized`.
    pub fn bind(&mut self) -> Result<()> {
        self.check_bind()?;
        *self = Self::Bound;
        Ok(())
    }

    /// Transition to `Closed` from any state.
    pub fn close(&mut self) {
        *self = Self::Closed;
    }
}

// ── EndpointOptions ──────────────────────────────────────────────

/// Default per-subscriber queue depth, in messages.
pub const DEFAULT_SEND_HIGH_WATER_MARK: usize = 8;

/// Tuning for [`StreamEndpoint`].
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    /// Delay between connection attempts in connect mode.
    pub reconnect_interval: Duration,
    /// Messages queued per subscriber before new ones are dropped for it.
    pub send_high_water_mark: usize,
    /// Largest inbound frame accepted from a subscriber.
    pub max_frame_size: usize,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(100),
            send_high_water_mark: DEFAULT_SEND_HIGH_WATER_MARK,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

// ── PeerLink ─────────────────────────────────────────────────────

/// Endpoint-side handle on one attached subscriber.
struct PeerLink {
    remote: SocketAddr,
    /// Encoded messages waiting for the writer task.
    queue: mpsc::Sender<Bytes>,
    subscriptions: Arc<Mutex<SubscriptionSet>>,
    /// Set by the reader or writer task when the subscriber goes away.
    closed: Arc<AtomicBool>,
    /// Stops the reader and writer tasks when the link is dropped.
    _tasks_guard: DropGuard,
}

impl PeerLink {
    fn wants(&self, topic: &[u8]) -> bool {
        lock(&self.subscriptions).matches(topic)
    }

    fn is_subscribed(&self) -> bool {
        !lock(&self.subscriptions).is_empty()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn lock(subscriptions: &Mutex<SubscriptionSet>) -> MutexGuard<'_, SubscriptionSet> {
    subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── StreamEndpoint ───────────────────────────────────────────────

/// Publishing socket with ZeroMQ PUB semantics.
///
/// Messages go to every attached subscriber whose filter matches the
/// topic part. With no matching subscriber a message is discarded and
/// the send still succeeds.
pub struct StreamEndpoint {
    address: TransportAddress,
    local_addr: Option<SocketAddr>,
    codec: ZmtpCodec,
    peers: Vec<PeerLink>,
    incoming: mpsc::UnboundedReceiver<PeerLink>,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
    closed: bool,
}

impl StreamEndpoint {
    /// Create the socket for `address`.
    ///
    /// In bind mode the listener is bound before returning, so a busy
    /// port surfaces here. In connect mode the connection is made in the
    /// background and retried until it succeeds.
    pub async fn bind(address: &str, options: EndpointOptions) -> Result<Self> {
        let address = TransportAddress::parse(address, AddressMode::Bind)?;
        let (tx, incoming) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let (local_addr, worker) = match address.mode() {
            AddressMode::Bind => {
                let listener = TcpListener::bind(address.socket_addr()).await?;
                let local = listener.local_addr()?;
                info!(%local, "publisher listening");
                let worker = tokio::spawn(accept_loop(
                    listener,
                    tx,
                    shutdown.clone(),
                    options.clone(),
                ));
                (Some(local), worker)
            }
            AddressMode::Connect => {
                info!(remote = %address, "publisher connecting");
                let worker = tokio::spawn(connect_loop(
                    address.socket_addr(),
                    tx,
                    shutdown.clone(),
                    options.clone(),
                ));
                (None, worker)
            }
        };

        Ok(Self {
            address,
            local_addr,
            codec: ZmtpCodec::new(options.max_frame_size),
            peers: Vec::new(),
            incoming,
            shutdown,
            worker,
            closed: false,
        })
    }

    /// The parsed connection string.
    pub fn address(&self) -> &TransportAddress {
        &self.address
    }

    /// Listening address in bind mode (resolves port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Attached subscribers, subscribed or not.
    pub fn peer_count(&mut self) -> usize {
        self.attach_pending();
        self.peers.len()
    }

    /// Attached subscribers with at least one subscription.
    pub fn subscriber_count(&mut self) -> usize {
        self.attach_pending();
        self.peers.iter().filter(|p| p.is_subscribed()).count()
    }

    /// Poll until `count` subscribers have subscribed, or `limit` passes.
    pub async fn wait_for_subscribers(&mut self, count: usize, limit: Duration) -> Result<()> {
        let start = Instant::now();
        while self.subscriber_count() < count {
            if start.elapsed() >= limit {
                return Err(StreamError::Timeout(limit));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    /// Publish one multipart message.
    ///
    /// The message is encoded once and queued for every attached
    /// subscriber whose filter matches its topic. Returns the number of
    /// subscribers it was queued for. A subscriber at its high-water mark
    /// misses this message but stays attached.
    ///
    /// Fails if the endpoint is closed, or if matching subscribers exist
    /// and none of them could take the message.
    pub fn send(&mut self, message: Multipart<'_>) -> Result<usize> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.attach_pending();

        let topic = message.topic();
        if !self.peers.iter().any(|p| p.wants(topic)) {
            trace!("no matching subscriber; message discarded");
            return Ok(0);
        }

        let mut wire = BytesMut::new();
        self.codec.encode(message, &mut wire)?;
        let wire = wire.freeze();

        let mut queued = 0usize;
        let mut skipped = 0usize;
        for peer in &self.peers {
            if !peer.wants(topic) {
                continue;
            }
            match peer.queue.try_send(wire.clone()) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(remote = %peer.remote, "subscriber at high-water mark; message dropped for it");
                    skipped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    peer.mark_closed();
                    skipped += 1;
                }
            }
        }
        self.peers.retain(|p| !p.is_closed());

        if queued == 0 {
            return Err(StreamError::Send(format!(
                "none of {skipped} matching subscribers could take the message"
            )));
        }
        trace!(queued, skipped, "message published");
        Ok(queued)
    }

    /// Tear down: stop background tasks and close every socket.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shutdown.cancel();
        self.worker.abort();
        self.peers.clear();
        info!(address = %self.address, "publisher closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn attach_pending(&mut self) {
        while let Ok(link) = self.incoming.try_recv() {
            debug!(remote = %link.remote, "subscriber attached");
            self.peers.push(link);
        }
        self.peers.retain(|p| !p.is_closed());
    }
}

impl Drop for StreamEndpoint {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.worker.abort();
    }
}

// ── Background tasks ─────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::UnboundedSender<PeerLink>,
    shutdown: CancellationToken,
    options: EndpointOptions,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = listener.accept() => result,
        };

        let (stream, remote) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept error: {e}");
                continue;
            }
        };

        let tx = tx.clone();
        let token = shutdown.child_token();
        let options = options.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_peer(stream, &tx, token, &options).await {
                debug!(%remote, error = %e, "subscriber session ended");
            }
        });
    }
}

async fn connect_loop(
    remote: String,
    tx: mpsc::UnboundedSender<PeerLink>,
    shutdown: CancellationToken,
    options: EndpointOptions,
) {
    loop {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = TcpStream::connect(&remote) => result,
        };

        match connected {
            Ok(stream) => {
                let token = shutdown.child_token();
                if let Err(e) = serve_peer(stream, &tx, token, &options).await {
                    debug!(%remote, error = %e, "upstream session ended");
                }
            }
            Err(e) => debug!(%remote, error = %e, "connect failed; retrying"),
        }

        if tx.is_closed() {
            break;
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(options.reconnect_interval) => {}
        }
    }
}

/// Handshake, start the writer task, hand its queue to the endpoint,
/// then follow the peer's subscriptions until the link ends.
async fn serve_peer(
    stream: TcpStream,
    tx: &mpsc::UnboundedSender<PeerLink>,
    token: CancellationToken,
    options: &EndpointOptions,
) -> Result<()> {
    let Handshaken {
        mut reader,
        writer,
        peer_type,
        remote,
    } = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        result = handshake(stream, SocketType::Pub, options.max_frame_size) => result?,
    };
    info!(%remote, peer = peer_type.as_str(), "subscriber connected");

    let subscriptions = Arc::new(Mutex::new(SubscriptionSet::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let (queue, outbound) = mpsc::channel(options.send_high_water_mark.max(1));
    tokio::spawn(drain_queue(
        writer.into_inner(),
        outbound,
        Arc::clone(&closed),
        token.clone(),
    ));

    let link = PeerLink {
        remote,
        queue,
        subscriptions: Arc::clone(&subscriptions),
        closed: Arc::clone(&closed),
        _tasks_guard: token.clone().drop_guard(),
    };
    if tx.send(link).is_err() {
        return Ok(());
    }

    let result = track_subscriptions(&mut reader, &subscriptions, &token).await;
    closed.store(true, Ordering::SeqCst);
    info!(%remote, "subscriber disconnected");
    result
}

/// Write queued messages to one subscriber until the queue closes, the
/// link is cancelled or a write fails.
async fn drain_queue(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
    closed: Arc<AtomicBool>,
    token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = outbound.recv() => message,
        };
        let Some(message) = message else {
            break;
        };
        let written = tokio::select! {
            _ = token.cancelled() => break,
            result = writer.write_all(&message) => result,
        };
        if let Err(e) = written {
            debug!(error = %e, "subscriber write failed");
            closed.store(true, Ordering::SeqCst);
            break;
        }
    }
}

async fn track_subscriptions(
    reader: &mut FramedRead<OwnedReadHalf, ZmtpCodec>,
    subscriptions: &Mutex<SubscriptionSet>,
    token: &CancellationToken,
) -> Result<()> {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            next = reader.next() => next,
        };
        let Some(frame) = next else {
            return Ok(());
        };
        if let Some(change) = SubscriptionChange::from_frame(&frame?) {
            trace!(?change, "subscription update");
            lock(subscriptions).apply(change);
        }
    }
}
