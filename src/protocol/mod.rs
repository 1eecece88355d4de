//! Protocol message types and collaborator contracts.
//!
//! # Protocol Overview
//!
//! | Message Type | Phase | Purpose |
//! |--------------|-------|---------|
//! | `HandshakeMessage` | Handshake | Key agreement (hello / finish) |
//! | `ClientPayload` | Handshake | Identity presented in the client finish |
//! | `Node` | Steady state | Tagged application message tree |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | [`NodeCodec`] contract and JSON reference codec |
//! | `handshake` | Handshake messages and [`HandshakeEngine`] contract |
//! | `node` | [`Node`] tree type |

// ============================================================================
// Submodules
// ============================================================================

/// Node codec contract.
pub mod codec;

/// Handshake messages and engine contract.
pub mod handshake;

/// Protocol node tree.
pub mod node;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{JsonNodeCodec, NodeCodec};
pub use handshake::{
    ClientFinish, ClientHello, ClientPayload, HandshakeEngine, HandshakeMessage, HandshakeState,
    KeyPair, ServerHello, UserAgent,
};
pub use node::{ID_ATTR, Node, NodeContent};
