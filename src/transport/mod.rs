//! Duplex byte transports.
//!
//! A [`Transport`] moves opaque chunks between the client and the server.
//! It knows nothing about handshakes, frames or nodes; framing belongs to
//! the handshake engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                        ┌──────────────────┐
//! │  Connection      │   send(Vec<u8>)        │  Transport       │
//! │                  │───────────────────────►│  WebSocket │ TCP │
//! │  reader task     │◄───────────────────────│                  │
//! └──────────────────┘   TransportEvent       └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `select` | Endpoint normalization and [`TransportPlan`] |
//! | `stream` | Raw TCP transport |
//! | `websocket` | WebSocket transport |

// ============================================================================
// Submodules
// ============================================================================

/// Transport selection from configuration.
pub mod select;

/// Raw TCP stream transport.
pub mod stream;

/// WebSocket transport.
pub mod websocket;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use select::{MOBILE_GATEWAY_HOST, MOBILE_GATEWAY_PORT, ROUTING_INFO_PARAM, TransportPlan};
pub use stream::RawStreamTransport;
pub use websocket::WebSocketTransport;

// ============================================================================
// TransportEvent
// ============================================================================

/// Notification emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A chunk of bytes arrived.
    Frame(Vec<u8>),
    /// The transport closed, with an optional reason.
    Closed(Option<String>),
    /// The transport failed.
    Errored(String),
}

// ============================================================================
// Transport
// ============================================================================

/// A duplex byte channel.
///
/// Events are delivered through a single receiver obtained once from
/// [`take_events`](Transport::take_events). Implementations emit at most
/// one terminal event (`Closed` or `Errored`).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the channel.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the peer cannot be reached.
    async fn connect(&self) -> Result<()>;

    /// Writes one chunk.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if not open
    /// - [`Error::SendFailure`](crate::Error::SendFailure) if the write fails
    async fn send(&self, chunk: Vec<u8>) -> Result<()>;

    /// Returns `true` while the channel can carry writes.
    fn is_open(&self) -> bool;

    /// Closes the channel. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails.
    async fn close(&self) -> Result<()>;

    /// Takes the event receiver. Returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}

// ============================================================================
// EventChannel
// ============================================================================

/// Single-consumer event channel shared by the built-in transports.
#[derive(Debug)]
pub(crate) struct EventChannel {
    tx: mpsc::UnboundedSender<TransportEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl EventChannel {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<TransportEvent> {
        self.tx.clone()
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }

    pub(crate) fn take(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.rx.lock().take()
    }
}

// ============================================================================
// Tests
// ============================================================================
