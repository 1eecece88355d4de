//! Builder pattern for connection setup.
//!
//! Provides a fluent API for configuring and opening [`Connection`]
//! instances.
//!
//! # Example
//!
//! ```ignore
//! use noise_socket::{Connection, ConnectionConfig};
//!
//! let conn = Connection::builder()
//!     .config(ConnectionConfig::new().with_mobile())
//!     .credentials(creds)
//!     .handshake_engine(engine)
//!     .connect()
//!     .await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{HandshakeEngine, JsonNodeCodec, NodeCodec};
use crate::transport::TransportPlan;

use super::config::ConnectionConfig;
use super::connection::Connection;
use super::credentials::{Credentials, KeyStore, MemoryKeyStore};

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Builder for configuring a [`Connection`].
///
/// Use [`Connection::builder()`] to create a new builder.
#[derive(Default)]
pub struct ConnectionBuilder {
    /// Connection settings.
    config: ConnectionConfig,
    /// Account credentials.
    credentials: Option<Arc<Credentials>>,
    /// Key storage, in-memory if unset.
    keys: Option<Arc<dyn KeyStore>>,
    /// Handshake engine.
    engine: Option<Box<dyn HandshakeEngine>>,
    /// Node codec, JSON if unset.
    codec: Option<Arc<dyn NodeCodec>>,
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("config", &self.config)
            .field("has_credentials", &self.credentials.is_some())
            .field("has_engine", &self.engine.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionBuilder Implementation
// ============================================================================

impl ConnectionBuilder {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the account credentials. Required.
    #[inline]
    #[must_use]
    pub fn credentials(mut self, credentials: impl Into<Arc<Credentials>>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Sets the key store.
    #[inline]
    #[must_use]
    pub fn keys(mut self, keys: Arc<dyn KeyStore>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Sets the handshake engine. Required.
    #[inline]
    #[must_use]
    pub fn handshake_engine(mut self, engine: Box<dyn HandshakeEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Sets the node codec.
    #[inline]
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn NodeCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Opens the transport without running the handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if credentials or engine are missing, or the
    ///   configuration is invalid
    /// - [`Error::Url`] if the endpoint is not a URL
    /// - whatever the transport's `connect` returns
    pub async fn open(self) -> Result<Connection> {
        let Self {
            mut config,
            credentials,
            keys,
            engine,
            codec,
        } = self;

        let credentials =
            credentials.ok_or_else(|| Error::config("Credentials required. Use .credentials()"))?;
        let engine =
            engine.ok_or_else(|| Error::config("Handshake engine required. Use .handshake_engine()"))?;
        config.validate()?;

        let plan = TransportPlan::resolve(&mut config, &credentials)?;
        let owns_transport = !matches!(plan, TransportPlan::Supplied(_));
        debug!(target_addr = %plan.target(), mobile = config.mobile, "Transport selected");

        let transport = plan.build(&config);
        let connection = Connection::new(
            config,
            credentials,
            keys.unwrap_or_else(|| Arc::new(MemoryKeyStore::new())),
            Arc::clone(&transport),
            owns_transport,
            engine,
            codec.unwrap_or_else(|| Arc::new(JsonNodeCodec)),
        )?;

        if let Err(e) = transport.connect().await {
            connection.teardown(|| Error::ConnectionClosed);
            return Err(e);
        }

        info!("Transport connected");
        Ok(connection)
    }

    /// Opens the transport and runs the handshake.
    ///
    /// # Errors
    ///
    /// Everything [`open`](Self::open) and [`Connection::handshake`] return.
    pub async fn connect(self) -> Result<Connection> {
        let connection = self.open().await?;
        connection.handshake().await?;
        Ok(connection)
    }
}

impl Connection {
    /// Creates a new connection builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    use crate::client::mock::{Harness, MockTransport, PlainEngine, server_hello};
    use crate::protocol::Node;

    #[tokio::test]
    async fn test_missing_credentials() {
        let result = Connection::builder()
            .handshake_engine(Box::new(PlainEngine::default()))
            .open()
            .await;
        match result {
            Err(Error::Config { message }) => assert!(message.contains("Credentials")),
            other => panic!("expected config error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_missing_engine() {
        let result = Connection::builder()
            .credentials(Harness::credentials())
            .open()
            .await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = Connection::builder()
            .config(ConnectionConfig::new().with_default_query_timeout(std::time::Duration::ZERO))
            .credentials(Harness::credentials())
            .handshake_engine(Box::new(PlainEngine::default()))
            .open()
            .await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_connect();

        let result = Connection::builder()
            .config(ConnectionConfig::new().with_transport(transport))
            .credentials(Harness::credentials())
            .handshake_engine(Box::new(PlainEngine::default()))
            .open()
            .await;
        assert!(matches!(result, Err(Error::Connection { .. })));
    }

    #[tokio::test]
    async fn test_websocket_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // Client hello, then server hello.
            let hello = ws.next().await.unwrap().unwrap();
            assert!(matches!(hello, Message::Binary(_)));
            ws.send(Message::Binary(server_hello(b"ok").into()))
                .await
                .unwrap();

            // Client finish.
            ws.next().await.unwrap().unwrap();

            // Echo one query back as its reply.
            let Message::Binary(query) = ws.next().await.unwrap().unwrap() else {
                panic!("expected binary query");
            };
            let node = JsonNodeCodec.decode(&query).unwrap();
            let reply = Node::new("iq")
                .with_attr("id", node.attr("id").unwrap())
                .with_attr("type", "result");
            ws.send(Message::Binary(JsonNodeCodec.encode(&reply).unwrap().into()))
                .await
                .unwrap();

            // Drain until the client closes.
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        });

        let connection = Connection::builder()
            .config(ConnectionConfig::new().with_endpoint(format!("ws://{addr}/ws/chat")))
            .credentials(Harness::credentials())
            .handshake_engine(Box::new(PlainEngine::default()))
            .connect()
            .await
            .unwrap();

        let reply = connection.query(Node::new("iq"), None).await.unwrap();
        assert_eq!(reply.attr("type"), Some("result"));

        connection.end(None).await;
        assert!(connection.is_closed());
        server.await.unwrap();
    }
}
