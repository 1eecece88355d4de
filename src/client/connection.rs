//! Connection orchestrator and event loop.
//!
//! This module owns one transport for its whole lifetime, including
//! tag-based request/response correlation and teardown.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming transport chunks (split into frames by the handshake engine)
//! - Next-frame waits used during the handshake
//! - Tag correlation for decoded nodes
//! - Forwarding unsolicited nodes to the node handler
//! - Transport close/error, which fails every pending wait

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Level, debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{Tag, TagGenerator};
use crate::protocol::{HandshakeEngine, HandshakeState, Node, NodeCodec};
use crate::transport::{Transport, TransportEvent};

use super::config::ConnectionConfig;
use super::credentials::{Credentials, KeyStore};
use super::waiter::{WaitTable, with_deadline};

// ============================================================================
// Types
// ============================================================================

/// Callback for nodes that match no pending tag.
pub type NodeHandler = Arc<dyn Fn(Node) + Send + Sync>;

/// Key of a next-frame wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FrameWaitId(u64);

impl fmt::Display for FrameWaitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "next frame (wait #{})", self.0)
    }
}

/// Internal shared state for a connection.
pub(crate) struct ConnectionInner {
    /// Normalized configuration.
    pub config: ConnectionConfig,
    /// Long-term credentials, read-only.
    pub credentials: Arc<Credentials>,
    /// Key storage, passed through unchanged.
    pub keys: Arc<dyn KeyStore>,
    /// The one transport of this connection.
    pub transport: Arc<dyn Transport>,
    /// Whether teardown should close the transport.
    owns_transport: bool,
    /// Handshake and frame protection.
    pub engine: Mutex<Box<dyn HandshakeEngine>>,
    /// Node codec.
    pub codec: Arc<dyn NodeCodec>,
    /// Tag source for this connection.
    pub tags: TagGenerator,
    /// Handshake progress.
    pub state: Mutex<HandshakeState>,
    /// Raw chunks that arrived between the server hello and `Finished`,
    /// decoded once the steady-state keys are committed.
    pub early_chunks: Mutex<Vec<Vec<u8>>>,
    /// Waits keyed by tag.
    pub tagged: Arc<WaitTable<Tag, Node>>,
    /// Waits for the next raw frame.
    pub frames: Arc<WaitTable<FrameWaitId, Vec<u8>>>,
    /// Next frame wait id.
    next_frame_wait: AtomicU64,
    /// Serializes frame encoding with the transport write.
    send_lock: AsyncMutex<()>,
    /// Set once by teardown.
    closed: AtomicBool,
    /// Arrival time of the last transport chunk.
    pub last_received: Mutex<Instant>,
    /// Handler for unsolicited nodes.
    node_handler: Mutex<Option<NodeHandler>>,
    /// Keep-alive task, present from handshake completion to teardown.
    pub keep_alive: Mutex<Option<JoinHandle<()>>>,
    /// Reader task.
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if let Some(handle) = self.keep_alive.get_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
        self.tagged.fail_all(|| Error::ConnectionClosed);
        self.frames.fail_all(|| Error::ConnectionClosed);
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A multiplexed, noise-secured connection.
///
/// Cheap to clone; all clones share one transport, one handshake and one
/// dispatch table.
///
/// # Example
///
/// ```ignore
/// let conn = Connection::builder()
///     .credentials(creds)
///     .handshake_engine(engine)
///     .connect()
///     .await?;
///
/// let reply = conn.query(Node::new("iq").with_attr("type", "get"), None).await?;
/// conn.end(None).await;
/// ```
#[derive(Clone)]
pub struct Connection {
    /// Shared inner state.
    pub(crate) inner: Arc<ConnectionInner>,
}

// ============================================================================
// Connection - Display
// ============================================================================

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Constructor
// ============================================================================

impl Connection {
    /// Creates a connection around an unconnected transport.
    ///
    /// Spawns the reader task; does not connect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the transport's events were already taken.
    pub(crate) fn new(
        config: ConnectionConfig,
        credentials: Arc<Credentials>,
        keys: Arc<dyn KeyStore>,
        transport: Arc<dyn Transport>,
        owns_transport: bool,
        engine: Box<dyn HandshakeEngine>,
        codec: Arc<dyn NodeCodec>,
    ) -> Result<Self> {
        let events = transport
            .take_events()
            .ok_or_else(|| Error::config("transport events already claimed"))?;

        let inner = Arc::new(ConnectionInner {
            config,
            credentials,
            keys,
            transport,
            owns_transport,
            engine: Mutex::new(engine),
            codec,
            tags: TagGenerator::new(),
            state: Mutex::new(HandshakeState::NotStarted),
            early_chunks: Mutex::new(Vec::new()),
            tagged: WaitTable::new(),
            frames: WaitTable::new(),
            next_frame_wait: AtomicU64::new(0),
            send_lock: AsyncMutex::new(()),
            closed: AtomicBool::new(false),
            last_received: Mutex::new(Instant::now()),
            node_handler: Mutex::new(None),
            keep_alive: Mutex::new(None),
            reader: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::run_reader(Arc::downgrade(&inner), events));
        *inner.reader.lock() = Some(handle);

        debug!(tag_prefix = inner.tags.prefix(), "Connection created");
        Ok(Self { inner })
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the current handshake state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        *self.inner.state.lock()
    }

    /// Returns `true` once the connection has been torn down.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns the number of pending waits (tagged and next-frame).
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.tagged.len() + self.inner.frames.len()
    }

    /// Returns the normalized configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Returns the credentials this connection authenticated with.
    #[inline]
    #[must_use]
    pub fn credentials(&self) -> &Arc<Credentials> {
        &self.inner.credentials
    }

    /// Returns the key store.
    #[inline]
    #[must_use]
    pub fn keys(&self) -> &Arc<dyn KeyStore> {
        &self.inner.keys
    }

    /// Issues a fresh tag from this connection's generator.
    #[inline]
    pub fn generate_message_tag(&self) -> Tag {
        self.inner.tags.next_tag()
    }

    /// Sets the handler for nodes that match no pending tag.
    ///
    /// The handler runs on the reader task without any connection lock
    /// held, so it may replace or clear itself.
    pub fn set_node_handler(&self, handler: impl Fn(Node) + Send + Sync + 'static) {
        *self.inner.node_handler.lock() = Some(Arc::new(handler));
    }

    /// Clears the node handler.
    pub fn clear_node_handler(&self) {
        *self.inner.node_handler.lock() = None;
    }

    /// Moves the handshake state forward.
    pub(crate) fn set_state(&self, next: HandshakeState) {
        let mut state = self.inner.state.lock();
        debug_assert!(next >= *state, "handshake state moved backwards");
        trace!(from = ?*state, to = ?next, "Handshake state");
        *state = next;
    }

    /// Moves to `Finished` and dispatches chunks that raced the transition.
    ///
    /// Must run after the engine committed its steady-state keys; buffered
    /// chunks are decoded here, in arrival order, before any later chunk.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if a buffered chunk fails to decode. The
    /// state is left unchanged in that case.
    pub(crate) fn mark_finished(&self) -> Result<()> {
        let frames = {
            let mut state = self.inner.state.lock();
            let chunks = std::mem::take(&mut *self.inner.early_chunks.lock());

            let mut frames = Vec::new();
            let mut engine = self.inner.engine.lock();
            for chunk in &chunks {
                frames.extend(engine.decode_frame(chunk)?);
            }
            drop(engine);

            *state = HandshakeState::Finished;
            frames
        };

        if !frames.is_empty() {
            debug!(count = frames.len(), "Dispatching frames buffered during handshake");
        }
        for frame in frames {
            self.decode_and_dispatch(&frame);
        }
        Ok(())
    }
}

// ============================================================================
// Connection - Send Path
// ============================================================================

impl Connection {
    /// Sends an already-encoded payload as one frame.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the transport is not open
    /// - [`Error::HandshakeIncomplete`] before the handshake finished
    /// - [`Error::Timeout`] if the write exceeds the connect timeout
    /// - [`Error::SendFailure`] if the transport write fails
    pub async fn send_raw_message(&self, payload: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        self.write_frame(payload).await
    }

    /// Encodes and sends a node. No retry.
    ///
    /// # Errors
    ///
    /// Same as [`send_raw_message`](Self::send_raw_message), plus
    /// [`Error::Codec`] if the node cannot be encoded.
    pub async fn send_node(&self, node: &Node) -> Result<()> {
        self.ensure_ready()?;

        let bytes = self.inner.codec.encode(node)?;
        if tracing::enabled!(Level::TRACE) {
            trace!(xml = %self.inner.codec.to_display_string(node), "Sending node");
        }

        self.write_frame(&bytes).await
    }

    /// Fails unless application frames may flow.
    fn ensure_ready(&self) -> Result<()> {
        if self.is_closed() || !self.inner.transport.is_open() {
            return Err(Error::ConnectionClosed);
        }
        if !self.state().is_finished() {
            return Err(Error::HandshakeIncomplete);
        }
        Ok(())
    }

    /// Frames `payload` through the engine and writes it.
    ///
    /// Used directly by the handshake; public paths go through
    /// [`ensure_ready`](Self::ensure_ready) first.
    pub(crate) async fn write_frame(&self, payload: &[u8]) -> Result<()> {
        if self.is_closed() || !self.inner.transport.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let inner = &self.inner;
        with_deadline("sending frame", inner.config.connect_timeout, async {
            let _guard = inner.send_lock.lock().await;
            let frame = {
                let mut engine = inner.engine.lock();
                engine.encode_frame(payload)?
            };
            inner.transport.send(frame).await
        })
        .await
    }
}

// ============================================================================
// Connection - Waits & Queries
// ============================================================================

impl Connection {
    /// Waits for the next raw frame, optionally sending `payload` first.
    ///
    /// The wait is registered before the payload is sent, so a reply that
    /// arrives before the send returns is not missed. Bounded by the
    /// connect timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeIncomplete`] if a payload is given before the
    ///   handshake finished
    /// - [`Error::Timeout`] if no frame arrives in time
    /// - [`Error::ConnectionClosed`] if the transport closes first
    pub async fn await_next_message(&self, payload: Option<&[u8]>) -> Result<Vec<u8>> {
        if payload.is_some() {
            self.ensure_ready()?;
        }
        self.await_frame(payload).await
    }

    /// Registers a next-frame wait, sends `payload`, awaits the frame.
    ///
    /// The connect timeout bounds the send and the wait together.
    pub(crate) async fn await_frame(&self, payload: Option<&[u8]>) -> Result<Vec<u8>> {
        let limit = self.inner.config.connect_timeout;
        let id = FrameWaitId(self.inner.next_frame_wait.fetch_add(1, Ordering::Relaxed));
        let operation = format!("waiting for {id}");
        let wait = self.inner.frames.register(id)?;

        with_deadline(&operation, limit, async {
            if let Some(payload) = payload {
                self.write_frame(payload).await?;
            }
            wait.wait(limit).await
        })
        .await
    }

    /// Waits for the node tagged `tag`.
    ///
    /// `timeout` defaults to the configured query timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateTag`] if a wait for `tag` is already pending
    /// - [`Error::Timeout`] if no reply arrives in time
    /// - [`Error::ConnectionClosed`] or [`Error::Connection`] if the
    ///   transport closes or fails first
    pub async fn wait_for_message(&self, tag: Tag, timeout: Option<Duration>) -> Result<Node> {
        let limit = timeout.unwrap_or(self.inner.config.default_query_timeout);
        self.inner.tagged.register(tag)?.wait(limit).await
    }

    /// Sends `node` and waits for the reply carrying the same tag.
    ///
    /// A tag is generated if the node has no `id` attribute. `timeout`
    /// bounds the send and the wait together.
    ///
    /// # Errors
    ///
    /// Everything [`send_node`](Self::send_node) and
    /// [`wait_for_message`](Self::wait_for_message) return, plus
    /// [`Error::Protocol`] if the reply is an error node.
    pub async fn query(&self, mut node: Node, timeout: Option<Duration>) -> Result<Node> {
        let tag = match node.id() {
            Some(tag) => tag,
            None => {
                let tag = self.generate_message_tag();
                node.set_id(&tag);
                tag
            }
        };

        let limit = timeout.unwrap_or(self.inner.config.default_query_timeout);
        let operation = format!("waiting for {tag}");
        let wait = self.inner.tagged.register(tag)?;

        let reply = with_deadline(&operation, limit, async {
            self.send_node(&node).await?;
            wait.wait(limit).await
        })
        .await?;
        self.inner.codec.assert_no_error(&reply)?;
        Ok(reply)
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Tears the connection down. Idempotent.
    ///
    /// Stops the keep-alive, rejects every pending wait, closes an owned
    /// transport and stops the reader. Pending waits are rejected with
    /// [`Error::ConnectionClosed`], or with [`Error::Connection`] carrying
    /// `reason` when one is given.
    pub async fn end(&self, reason: Option<Error>) {
        let message = reason.map(|e| match e {
            Error::Connection { message } => message,
            other => other.to_string(),
        });
        let torn_down = self.teardown(|| match &message {
            Some(message) => Error::connection(message.clone()),
            None => Error::ConnectionClosed,
        });
        if !torn_down {
            return;
        }

        if self.inner.owns_transport
            && let Err(e) = self.inner.transport.close().await
        {
            debug!(error = %e, "Transport close failed");
        }

        if let Some(handle) = self.inner.reader.lock().take() {
            handle.abort();
        }

        info!(reason = message.as_deref().unwrap_or("closed"), "Connection ended");
    }

    /// Marks the connection closed, stops the keep-alive and fails all waits.
    ///
    /// Returns `false` if already torn down.
    pub(crate) fn teardown(&self, make_error: impl Fn() -> Error) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Some(handle) = self.inner.keep_alive.lock().take() {
            handle.abort();
        }

        let tagged = self.inner.tagged.fail_all(&make_error);
        let frames = self.inner.frames.fail_all(&make_error);

        if tagged + frames > 0 {
            debug!(tagged, frames, "Failed pending waits on teardown");
        }
        true
    }
}

// ============================================================================
// Connection - Event Loop
// ============================================================================

impl Connection {
    /// Consumes transport events until close, error, or connection drop.
    async fn run_reader(
        inner: Weak<ConnectionInner>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let connection = Connection { inner };

            match event {
                TransportEvent::Frame(chunk) => {
                    connection.handle_chunk(&chunk).await;
                }

                TransportEvent::Closed(reason) => {
                    debug!(?reason, "Transport closed");
                    connection.teardown(|| Error::ConnectionClosed);
                    break;
                }

                TransportEvent::Errored(message) => {
                    error!(error = %message, "Transport error");
                    connection.teardown(|| Error::connection(message.clone()));
                    break;
                }
            }
        }

        debug!("Reader terminated");
    }

    /// Splits a chunk into frames and routes each one.
    ///
    /// Chunks arriving after the server hello but before `Finished` are
    /// held raw; the engine's keys change when the handshake commits.
    async fn handle_chunk(&self, chunk: &[u8]) {
        *self.inner.last_received.lock() = Instant::now();

        {
            let state = self.inner.state.lock();
            if *state == HandshakeState::ServerHelloReceived {
                trace!(len = chunk.len(), "Buffering chunk until handshake commits");
                self.inner.early_chunks.lock().push(chunk.to_vec());
                return;
            }
        }

        let decoded = self.inner.engine.lock().decode_frame(chunk);
        let frames = match decoded {
            Ok(frames) => frames,
            Err(e) => {
                error!(error = %e, "Failed to decode frame");
                self.end(Some(e)).await;
                return;
            }
        };

        for frame in frames {
            let woken = self.inner.frames.resolve_all(&frame);

            if !self.state().is_finished() {
                if woken == 0 {
                    debug!(len = frame.len(), "Dropping frame received before handshake");
                }
                continue;
            }

            self.decode_and_dispatch(&frame);
        }
    }

    /// Decodes one steady-state frame and dispatches the node.
    fn decode_and_dispatch(&self, frame: &[u8]) {
        match self.inner.codec.decode(frame) {
            Ok(node) => self.dispatch_node(node),
            Err(e) => warn!(error = %e, "Failed to decode node"),
        }
    }

    /// Delivers a node to its tagged wait or the node handler.
    fn dispatch_node(&self, node: Node) {
        if tracing::enabled!(Level::TRACE) {
            trace!(xml = %self.inner.codec.to_display_string(&node), "Received node");
        }

        let node = match node.id() {
            Some(tag) => match self.inner.tagged.resolve(&tag, node) {
                Ok(()) => return,
                Err(node) => node,
            },
            None => node,
        };

        let handler = self.inner.node_handler.lock().clone();
        match handler {
            Some(handler) => handler(node),
            None => debug!(tag = %node.tag, "Unhandled node"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
