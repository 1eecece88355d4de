//! Raw TCP stream transport.
//!
//! Used for the mobile gateway. The stream has no message boundaries of
//! its own; every read is forwarded as one chunk and the handshake
//! engine reassembles frames.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::waiter::millis;
use crate::error::{Error, Result};

use super::{EventChannel, Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// Read buffer size per chunk.
const READ_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// RawStreamTransport
// ============================================================================

/// Transport over a plain TCP connection.
#[derive(Debug)]
pub struct RawStreamTransport {
    /// Remote host.
    host: String,
    /// Remote port.
    port: u16,
    /// Upper bound for the TCP connect.
    connect_timeout: Duration,
    /// Write half, present while connected.
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    /// Open flag, shared with the reader task.
    open: Arc<AtomicBool>,
    /// Event channel.
    events: EventChannel,
    /// Reader task handle.
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RawStreamTransport {
    /// Creates an unconnected transport.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
            writer: AsyncMutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
            events: EventChannel::new(),
            reader: Mutex::new(None),
        }
    }

    /// Returns the `host:port` target.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Forwards reads until EOF or error.
    async fn read_loop(
        mut source: OwnedReadHalf,
        events: mpsc::UnboundedSender<TransportEvent>,
        open: Arc<AtomicBool>,
    ) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match source.read(&mut buf).await {
                Ok(0) => {
                    debug!("TCP stream closed by remote");
                    open.store(false, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Closed(None));
                    return;
                }

                Ok(n) => {
                    if events.send(TransportEvent::Frame(buf[..n].to_vec())).is_err() {
                        debug!("Event receiver dropped, stopping reader");
                        return;
                    }
                }

                Err(e) => {
                    warn!(error = %e, "TCP read error");
                    open.store(false, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Errored(e.to_string()));
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for RawStreamTransport {
    async fn connect(&self) -> Result<()> {
        if self.is_open() {
            return Err(Error::connection("TCP stream already connected"));
        }

        let timeout_ms = millis(self.connect_timeout);
        let stream = timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| Error::timeout("TCP connect", timeout_ms))?
        .map_err(|e| Error::connection(format!("TCP connect to {} failed: {e}", self.target())))?;

        stream.set_nodelay(true)?;
        let (source, sink) = stream.into_split();
        *self.writer.lock().await = Some(sink);
        self.open.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(Self::read_loop(
            source,
            self.events.sender(),
            Arc::clone(&self.open),
        ));
        *self.reader.lock() = Some(handle);

        info!(addr = %self.target(), "TCP connection established");
        Ok(())
    }

    async fn send(&self, chunk: Vec<u8>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(Error::ConnectionClosed)?;
        sink.write_all(&chunk)
            .await
            .map_err(|e| Error::send_failure(e.to_string()))?;
        sink.flush()
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
            Some(mut sink) => sink.shutdown().await.map_err(Error::from),
            None => Ok(()),
        };

        self.events
            .emit(TransportEvent::Closed(Some("closed locally".to_string())));
        debug!(addr = %self.target(), "TCP stream closed locally");
        result
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }
}

impl Drop for RawStreamTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
