//! In-process transport, handshake engine and server script for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::protocol::{
    ClientPayload, HandshakeEngine, HandshakeMessage, JsonNodeCodec, KeyPair, Node, NodeCodec,
    ServerHello,
};
use crate::transport::{EventChannel, Transport, TransportEvent};

use super::config::ConnectionConfig;
use super::connection::Connection;
use super::credentials::Credentials;

/// Chunk the plain engine refuses to decode.
pub const CORRUPT_CHUNK: &[u8] = b"\xde\xad";

/// Prefix the plain engine puts on "encrypted" bytes.
pub const SEALED: &[u8] = b"sealed:";

// ============================================================================
// MockTransport
// ============================================================================

/// Transport that records writes and lets tests inject events.
#[derive(Debug)]
pub struct MockTransport {
    open: AtomicBool,
    fail_connect: AtomicBool,
    stall: watch::Sender<bool>,
    events: EventChannel,
    sent_tx: mpsc::UnboundedSender<Vec<u8>>,
    sent_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Self {
            open: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            stall: watch::Sender::new(false),
            events: EventChannel::new(),
            sent_tx,
            sent_rx: Mutex::new(Some(sent_rx)),
        }
    }

    pub fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    /// Holds every send that has passed the open check until released.
    pub fn stall_sends(&self) {
        self.stall.send_replace(true);
    }

    pub fn release_sends(&self) {
        self.stall.send_replace(false);
    }

    pub fn take_sent(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        self.sent_rx.lock().take().expect("sent frames already taken")
    }

    pub fn push_frame(&self, chunk: Vec<u8>) {
        self.events.emit(TransportEvent::Frame(chunk));
    }

    pub fn remote_close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.events.emit(TransportEvent::Closed(None));
    }

    pub fn remote_error(&self, message: &str) {
        self.open.store(false, Ordering::SeqCst);
        self.events.emit(TransportEvent::Errored(message.to_string()));
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connection("connection refused"));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, chunk: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }
        let mut stall = self.stall.subscribe();
        if stall.wait_for(|stalled| !*stalled).await.is_err() {
            return Err(Error::send_failure("stall switch dropped"));
        }
        self.sent_tx
            .send(chunk)
            .map_err(|_| Error::send_failure("recorder dropped"))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.events.emit(TransportEvent::Closed(Some("closed locally".into())));
        }
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}

// ============================================================================
// PlainEngine
// ============================================================================

/// Handshake engine without cryptography.
///
/// Frames pass through unchanged; "encryption" prefixes [`SEALED`].
/// A server hello whose static key is `b"bad"` fails verification.
/// A sealing engine also seals every frame once `finish_init` ran and
/// refuses unsealed frames from then on.
#[derive(Debug, Default)]
pub struct PlainEngine {
    calls: Arc<Mutex<Vec<&'static str>>>,
    derived: bool,
    sealing: bool,
    committed: bool,
}

impl PlainEngine {
    pub fn with_log(calls: Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self {
            calls,
            ..Self::default()
        }
    }

    pub fn sealing(mut self) -> Self {
        self.sealing = true;
        self
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }
}

pub fn seal(data: &[u8]) -> Vec<u8> {
    [SEALED, data].concat()
}

impl HandshakeEngine for PlainEngine {
    fn generate_key_pair(&mut self) -> KeyPair {
        self.record("generate_key_pair");
        KeyPair::new(vec![0xe1; 32], vec![0xe2; 32])
    }

    fn encode_frame(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        if self.sealing && self.committed {
            return Ok(seal(payload));
        }
        Ok(payload.to_vec())
    }

    fn decode_frame(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        if chunk == CORRUPT_CHUNK {
            return Err(Error::codec("bad frame"));
        }
        if self.sealing && self.committed {
            let plain = chunk
                .strip_prefix(SEALED)
                .ok_or_else(|| Error::codec("frame not sealed with session keys"))?;
            return Ok(vec![plain.to_vec()]);
        }
        Ok(vec![chunk.to_vec()])
    }

    fn process_handshake(&mut self, server_hello: &ServerHello, static_key: &KeyPair) -> Result<Vec<u8>> {
        self.record("process_handshake");
        if server_hello.static_key == b"bad" {
            return Err(Error::handshake("server certificate rejected"));
        }
        self.derived = true;
        Ok(seal(&static_key.public))
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.record("encrypt");
        if !self.derived {
            return Err(Error::handshake("no handshake keys"));
        }
        Ok(seal(plaintext))
    }

    fn finish_init(&mut self) -> Result<()> {
        self.record("finish_init");
        self.committed = true;
        Ok(())
    }
}

/// Encodes a server hello message with the given static key.
pub fn server_hello(static_key: &[u8]) -> Vec<u8> {
    let message = HandshakeMessage {
        server_hello: Some(ServerHello {
            ephemeral: vec![0x5e; 32],
            static_key: static_key.to_vec(),
            payload: vec![0xce],
        }),
        ..HandshakeMessage::default()
    };
    serde_json::to_vec(&message).expect("server hello encodes")
}

/// Builds the `result` reply for a query.
pub fn reply_to(query: &Node) -> Node {
    Node::new("iq")
        .with_attr("id", query.attr("id").expect("query has an id"))
        .with_attr("type", "result")
}

// ============================================================================
// Harness
// ============================================================================

/// A connection wired to a [`MockTransport`] and a [`PlainEngine`].
pub struct Harness {
    pub connection: Connection,
    pub transport: Arc<MockTransport>,
    sent: mpsc::UnboundedReceiver<Vec<u8>>,
    calls: Arc<Mutex<Vec<&'static str>>>,
    client_finish: Option<Vec<u8>>,
}

impl Harness {
    pub fn credentials() -> Credentials {
        Credentials::new(
            KeyPair::new(vec![0x01; 32], vec![0x02; 32]),
            KeyPair::new(vec![0x03; 32], vec![0x04; 32]),
            42,
        )
    }

    /// Opens a connection without running the handshake.
    pub async fn open(config: ConnectionConfig, credentials: Credentials) -> Self {
        Self::open_engine(config, credentials, false).await
    }

    /// Like [`open`](Self::open), with an engine that seals frames after
    /// the handshake commits.
    pub async fn open_sealed(config: ConnectionConfig, credentials: Credentials) -> Self {
        Self::open_engine(config, credentials, true).await
    }

    async fn open_engine(config: ConnectionConfig, credentials: Credentials, sealing: bool) -> Self {
        let transport = Arc::new(MockTransport::new());
        let sent = transport.take_sent();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut engine = PlainEngine::with_log(Arc::clone(&calls));
        if sealing {
            engine = engine.sealing();
        }

        let connection = Connection::builder()
            .config(config.with_transport(Arc::clone(&transport) as Arc<dyn Transport>))
            .credentials(credentials)
            .handshake_engine(Box::new(engine))
            .open()
            .await
            .expect("mock connection opens");

        Self {
            connection,
            transport,
            sent,
            calls,
            client_finish: None,
        }
    }

    /// Opens and handshakes with default settings.
    pub async fn connected() -> Self {
        Self::connected_with(ConnectionConfig::new(), Self::credentials()).await
    }

    /// Opens and handshakes, playing the server side.
    pub async fn connected_with(config: ConnectionConfig, credentials: Credentials) -> Self {
        let mut harness = Self::open(config, credentials).await;
        let conn = harness.connection.clone();
        let handshake = tokio::spawn(async move { conn.handshake().await });

        harness.next_frame().await;
        harness.transport.push_frame(server_hello(b"ok"));
        harness.client_finish = Some(harness.next_frame().await);

        handshake
            .await
            .expect("handshake task")
            .expect("handshake succeeds");
        harness
    }

    /// Next frame written by the client.
    pub async fn next_frame(&mut self) -> Vec<u8> {
        timeout(Duration::from_secs(30), self.sent.recv())
            .await
            .expect("client wrote a frame")
            .expect("recorder open")
    }

    pub fn try_next_frame(&mut self) -> std::result::Result<Vec<u8>, TryRecvError> {
        self.sent.try_recv()
    }

    /// Next node written by the client.
    pub async fn next_node(&mut self) -> Node {
        let frame = self.next_frame().await;
        JsonNodeCodec.decode(&frame).expect("client wrote a node")
    }

    /// Delivers a node as if the server sent it.
    pub fn push_node(&self, node: &Node) {
        self.transport
            .push_frame(JsonNodeCodec.encode(node).expect("node encodes"));
    }

    /// Engine calls in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    /// The identity payload carried by the client finish.
    pub fn client_payload(&self) -> ClientPayload {
        let finish = self.client_finish.as_ref().expect("handshake ran");
        let message: HandshakeMessage = serde_json::from_slice(finish).expect("finish decodes");
        let sealed = message.client_finish.expect("client finish").payload;
        let plain = sealed.strip_prefix(SEALED).expect("payload sealed");
        serde_json::from_slice(plain).expect("payload decodes")
    }
}
