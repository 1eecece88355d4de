//! Noise Socket - connection core for a noise-secured binary messaging client.
//!
//! This library opens one duplex transport to a messaging server, runs a
//! three-message noise handshake over it, then multiplexes tagged
//! request/response queries on the secured channel.
//!
//! # Architecture
//!
//! The connection follows a single-owner model:
//!
//! - **Transport**: WebSocket (browser endpoint) or raw TCP (mobile gateway)
//! - **Connection**: owns the transport, the reader task and the keep-alive
//!
//! Key design principles:
//!
//! - Every [`Connection`] owns: transport + handshake engine + dispatch table
//! - Replies are matched to requests by their `id` tag, in any order
//! - Every wait is bounded by a timeout and is removed when it settles
//! - Teardown rejects every pending wait; nothing hangs on a dead socket
//!
//! # Quick Start
//!
//! ```ignore
//! use noise_socket::{Connection, ConnectionConfig, Node, Result};
//!
//! async fn run(creds: noise_socket::Credentials, engine: Box<dyn noise_socket::HandshakeEngine>) -> Result<()> {
//!     let conn = Connection::builder()
//!         .config(ConnectionConfig::new())
//!         .credentials(creds)
//!         .handshake_engine(engine)
//!         .connect()
//!         .await?;
//!
//!     let reply = conn
//!         .query(Node::new("iq").with_attr("type", "get"), None)
//!         .await?;
//!     println!("{reply}");
//!
//!     conn.end(None).await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Connection`], builder, configuration, waits |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Message tags and the tag generator |
//! | [`protocol`] | Nodes, handshake messages, codec and engine contracts |
//! | [`transport`] | WebSocket and raw TCP transports |

// ============================================================================
// Modules
// ============================================================================

/// Connection orchestration.
///
/// - [`Connection`] - handshake, send path, tagged queries, teardown
/// - [`ConnectionBuilder`] - transport selection and setup
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Message tags.
pub mod identifiers;

/// Protocol types and collaborator contracts.
pub mod protocol;

/// Transport layer.
///
/// Moves opaque chunks; framing belongs to the handshake engine.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    Browser, Connection, ConnectionBuilder, ConnectionConfig, Credentials, Identity, KeyStore,
    MemoryKeyStore, NodeHandler, TransactionOptions,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{Tag, TagGenerator};

// Protocol types
pub use protocol::{
    ClientPayload, HandshakeEngine, HandshakeState, JsonNodeCodec, KeyPair, Node, NodeCodec,
    NodeContent, ServerHello,
};

// Transport types
pub use transport::{RawStreamTransport, Transport, TransportEvent, WebSocketTransport};
