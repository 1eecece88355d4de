//! WebSocket transport.
//!
//! Binary WebSocket messages carry the chunks. Text, ping and pong
//! messages are ignored; tungstenite answers pings on its own.
//!
//! # Connection Flow
//!
//! 1. `connect` upgrades to WebSocket (bounded by the connect timeout)
//! 2. The stream is split; a reader task forwards chunks as events
//! 3. `send` writes binary messages through the sink half
//! 4. `close` sends a close frame and stops the reader

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::waiter::millis;
use crate::error::{Error, Result};

use super::{EventChannel, Transport, TransportEvent};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// WebSocketTransport
// ============================================================================

/// Transport over a client WebSocket.
pub struct WebSocketTransport {
    /// Target URL, including any query parameters.
    url: Url,
    /// `Origin` header sent with the upgrade request.
    origin: Option<String>,
    /// Upper bound for the upgrade.
    connect_timeout: Duration,
    /// Write half, present while connected.
    writer: AsyncMutex<Option<SplitSink<WsStream, Message>>>,
    /// Open flag, shared with the reader task.
    open: Arc<AtomicBool>,
    /// Event channel.
    events: EventChannel,
    /// Reader task handle.
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url.as_str())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Creates an unconnected transport.
    #[must_use]
    pub fn new(url: Url, origin: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            url,
            origin,
            connect_timeout,
            writer: AsyncMutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
            events: EventChannel::new(),
            reader: Mutex::new(None),
        }
    }

    /// Returns the URL this transport connects to.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Forwards incoming messages until the stream ends.
    async fn read_loop(
        mut source: SplitStream<WsStream>,
        events: mpsc::UnboundedSender<TransportEvent>,
        open: Arc<AtomicBool>,
    ) {
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Binary(data)) => {
                    if events.send(TransportEvent::Frame(data.to_vec())).is_err() {
                        debug!("Event receiver dropped, stopping reader");
                        return;
                    }
                }

                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by remote");
                    open.store(false, Ordering::SeqCst);
                    let reason = frame.map(|f| f.reason.to_string());
                    let _ = events.send(TransportEvent::Closed(reason));
                    return;
                }

                // Ignore Text, Ping, Pong
                Ok(_) => {}

                Err(e) => {
                    warn!(error = %e, "WebSocket error");
                    open.store(false, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Errored(e.to_string()));
                    return;
                }
            }
        }

        debug!("WebSocket stream ended");
        open.store(false, Ordering::SeqCst);
        let _ = events.send(TransportEvent::Closed(None));
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<()> {
        if self.is_open() {
            return Err(Error::connection("WebSocket already connected"));
        }

        let mut request = self.url.as_str().into_client_request()?;
        if let Some(origin) = &self.origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|e| Error::config(format!("invalid origin header: {e}")))?;
            request.headers_mut().insert(ORIGIN, value);
        }

        let timeout_ms = millis(self.connect_timeout);
        let (stream, _response) = timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| Error::timeout("WebSocket connect", timeout_ms))?
            .map_err(|e| Error::connection(format!("WebSocket connect failed: {e}")))?;

        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);
        self.open.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(Self::read_loop(
            source,
            self.events.sender(),
            Arc::clone(&self.open),
        ));
        *self.reader.lock() = Some(handle);

        info!(url = %self.url, "WebSocket connection established");
        Ok(())
    }

    async fn send(&self, chunk: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(Error::ConnectionClosed)?;
        sink.send(Message::Binary(chunk.into()))
            .await
            .map_err(|e| Error::send_failure(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }

        let result = match self.writer.lock().await.take() {
            Some(mut sink) => sink.close().await.map_err(Error::from),
            None => Ok(()),
        };

        self.events
            .emit(TransportEvent::Closed(Some("closed locally".to_string())));
        debug!(url = %self.url, "WebSocket closed locally");
        result
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
