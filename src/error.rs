//! Error types for the connection core.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use noise_socket::{Connection, Node, Result};
//!
//! async fn example(conn: &Connection) -> Result<()> {
//!     let reply = conn.query(Node::new("iq"), None).await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::SendFailure`] |
//! | Handshake | [`Error::Handshake`], [`Error::HandshakeIncomplete`] |
//! | Protocol | [`Error::Protocol`], [`Error::Codec`], [`Error::DuplicateTag`] |
//! | Execution | [`Error::Timeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::Tag;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when connection configuration is invalid or incomplete.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport-level connection failure.
    ///
    /// Returned when the transport cannot connect, reports an error event,
    /// or the connection is detected as lost.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Transport is not open, or closed while the operation was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Transport-level write error.
    #[error("Send failed: {message}")]
    SendFailure {
        /// Description of the write failure.
        message: String,
    },

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Malformed or cryptographically invalid handshake message.
    ///
    /// Fatal to the connection attempt; no retry is made.
    #[error("Handshake failed: {message}")]
    Handshake {
        /// Description of the handshake failure.
        message: String,
    },

    /// Application traffic attempted before the handshake finished.
    #[error("Handshake not complete")]
    HandshakeIncomplete,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The server answered with an error-flagged node.
    #[error("Server error {code}: {text}")]
    Protocol {
        /// Numeric error code from the error node.
        code: u16,
        /// Error text from the error node.
        text: String,
    },

    /// Frame or node could not be encoded or decoded.
    #[error("Codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// A wait for this tag is already pending.
    #[error("Tag already pending: {tag}")]
    DuplicateTag {
        /// The conflicting tag.
        tag: Tag,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Operation timeout.
    ///
    /// Returned when an operation exceeds its deadline.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Endpoint URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a send failure error.
    #[inline]
    pub fn send_failure(message: impl Into<String>) -> Self {
        Self::SendFailure {
            message: message.into(),
        }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates a server protocol error.
    #[inline]
    pub fn protocol(code: u16, text: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            text: text.into(),
        }
    }

    /// Creates a codec error.
    #[inline]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::SendFailure { .. }
                | Self::WebSocket(_)
                | Self::Io(_)
        )
    }

    /// Returns `true` if the server rejected the request.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed when retried by the caller on the
    /// same connection. Nothing in this crate retries automatically.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::DuplicateTag { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
