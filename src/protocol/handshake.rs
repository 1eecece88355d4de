//! Handshake message types and the handshake engine contract.
//!
//! The two-message exchange is:
//!
//! | Step | Direction | Message |
//! |------|-----------|---------|
//! | 1 | Client → Server | [`ClientHello`] with the ephemeral public key |
//! | 2 | Server → Client | [`ServerHello`] with server ephemeral/static/payload |
//! | 3 | Client → Server | [`ClientFinish`] with encrypted static key and payload |
//!
//! Key agreement and frame protection belong to the [`HandshakeEngine`].
//! Message encoding defaults to JSON and may be overridden per engine.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{from_slice, to_vec};

use crate::error::{Error, Result};

// ============================================================================
// KeyPair
// ============================================================================

/// A Curve25519-style key pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    /// Public half.
    pub public: Vec<u8>,
    /// Private half.
    pub private: Vec<u8>,
}

impl KeyPair {
    /// Creates a key pair from raw halves.
    #[inline]
    #[must_use]
    pub fn new(public: impl Into<Vec<u8>>, private: impl Into<Vec<u8>>) -> Self {
        Self {
            public: public.into(),
            private: private.into(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("private", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// HandshakeState
// ============================================================================

/// Progress of the connection handshake.
///
/// Transitions only move forward. `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakeState {
    /// Nothing sent yet.
    NotStarted,
    /// Client hello sent, waiting for the server hello.
    HelloSent,
    /// Server hello processed, client finish pending.
    ServerHelloReceived,
    /// Steady-state keys committed.
    Finished,
    /// Handshake aborted; the connection is unusable.
    Failed,
}

impl HandshakeState {
    /// Returns `true` once application frames may flow.
    #[inline]
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Finished)
    }
}

// ============================================================================
// Handshake Messages
// ============================================================================

/// First client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    /// Ephemeral public key.
    pub ephemeral: Vec<u8>,
}

/// Server reply to the client hello.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    /// Server ephemeral public key.
    pub ephemeral: Vec<u8>,
    /// Encrypted server static key.
    #[serde(rename = "static")]
    pub static_key: Vec<u8>,
    /// Encrypted certificate payload.
    pub payload: Vec<u8>,
}

/// Final client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFinish {
    /// Encrypted client static key.
    #[serde(rename = "static")]
    pub static_key: Vec<u8>,
    /// Encrypted [`ClientPayload`].
    pub payload: Vec<u8>,
}

/// Envelope carrying exactly one handshake step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeMessage {
    /// Step 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_hello: Option<ClientHello>,
    /// Step 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_hello: Option<ServerHello>,
    /// Step 3.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_finish: Option<ClientFinish>,
}

impl HandshakeMessage {
    /// Wraps a client hello.
    #[must_use]
    pub fn client_hello(ephemeral: impl Into<Vec<u8>>) -> Self {
        Self {
            client_hello: Some(ClientHello {
                ephemeral: ephemeral.into(),
            }),
            ..Self::default()
        }
    }

    /// Wraps a client finish.
    #[must_use]
    pub fn client_finish(static_key: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            client_finish: Some(ClientFinish {
                static_key,
                payload,
            }),
            ..Self::default()
        }
    }
}

// ============================================================================
// ClientPayload
// ============================================================================

/// Client software description sent inside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAgent {
    /// Operating system name.
    pub os: String,
    /// Client or browser name.
    pub name: String,
    /// Client version string.
    pub version: String,
}

/// Identity payload carried in the client finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ClientPayload {
    /// Login as a mobile primary device.
    Mobile {
        /// Phone number, when known.
        username: Option<String>,
        /// Client description.
        user_agent: UserAgent,
    },
    /// Register a new linked device.
    Registration {
        /// Local registration id.
        registration_id: u32,
        /// Identity public key.
        identity_key: Vec<u8>,
        /// Client description.
        user_agent: UserAgent,
    },
    /// Resume an existing linked identity.
    Login {
        /// User part of the identity.
        username: String,
        /// Device number of the identity.
        device: u16,
        /// Client description.
        user_agent: UserAgent,
    },
}

// ============================================================================
// HandshakeEngine
// ============================================================================

/// Stateful key agreement and frame protection for one connection.
///
/// The engine frames every outgoing payload with [`encode_frame`] and splits
/// incoming transport chunks with [`decode_frame`]. Before
/// [`finish_init`] both pass payloads through unencrypted; afterwards they
/// apply the session keys.
///
/// [`encode_frame`]: HandshakeEngine::encode_frame
/// [`decode_frame`]: HandshakeEngine::decode_frame
/// [`finish_init`]: HandshakeEngine::finish_init
pub trait HandshakeEngine: Send {
    /// Generates the ephemeral key pair for this attempt and binds it to
    /// the engine's handshake state.
    fn generate_key_pair(&mut self) -> KeyPair;

    /// Frames one outgoing payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the payload cannot be framed.
    fn encode_frame(&mut self, payload: &[u8]) -> Result<Vec<u8>>;

    /// Consumes one transport chunk and returns every complete frame it
    /// finishes. Partial frames are buffered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] on corrupt framing or failed decryption.
    fn decode_frame(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Mixes the server hello into the handshake and returns the client
    /// static key encrypted for the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if the server hello fails verification.
    fn process_handshake(&mut self, server_hello: &ServerHello, static_key: &KeyPair)
    -> Result<Vec<u8>>;

    /// Encrypts a handshake payload with the current handshake keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if no keys have been derived yet.
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Commits the derived keys for steady-state framing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if key agreement did not complete.
    fn finish_init(&mut self) -> Result<()>;

    /// Serializes a handshake message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] on serialization failure.
    fn encode_message(&self, message: &HandshakeMessage) -> Result<Vec<u8>> {
        to_vec(message).map_err(|e| Error::codec(format!("handshake encode failed: {e}")))
    }

    /// Parses a handshake message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if the bytes are not a handshake message.
    fn decode_message(&self, data: &[u8]) -> Result<HandshakeMessage> {
        from_slice(data).map_err(|e| Error::handshake(format!("malformed handshake message: {e}")))
    }

    /// Serializes the client payload before encryption.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] on serialization failure.
    fn encode_payload(&self, payload: &ClientPayload) -> Result<Vec<u8>> {
        to_vec(payload).map_err(|e| Error::codec(format!("client payload encode failed: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
