//! Node codec contract.
//!
//! The binary node format is owned by the [`NodeCodec`] implementation.
//! [`JsonNodeCodec`] is a reference implementation that serializes nodes
//! as JSON, suitable for tests and for peers speaking the same encoding.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{from_slice, to_vec};

use crate::error::{Error, Result};

use super::Node;

// ============================================================================
// Constants
// ============================================================================

/// Child tag marking a server-side failure.
const ERROR_TAG: &str = "error";

/// Text used when an error node carries none.
const UNKNOWN_ERROR_TEXT: &str = "Unknown error";

// ============================================================================
// NodeCodec
// ============================================================================

/// Encodes and decodes protocol nodes.
pub trait NodeCodec: Send + Sync {
    /// Encodes a node to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the node cannot be represented.
    fn encode(&self, node: &Node) -> Result<Vec<u8>>;

    /// Decodes a node from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the bytes are not a valid node.
    fn decode(&self, data: &[u8]) -> Result<Node>;

    /// Renders a node for trace logging.
    fn to_display_string(&self, node: &Node) -> String {
        node.to_string()
    }

    /// Fails if the node reports a server-side error.
    ///
    /// A node is an error when it has an `error` child; its `code` and
    /// `text` attributes become the error details.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for error nodes.
    fn assert_no_error(&self, node: &Node) -> Result<()> {
        match node.child(ERROR_TAG) {
            Some(error) => {
                let code = error
                    .attr("code")
                    .and_then(|code| code.parse().ok())
                    .unwrap_or_default();
                let text = error.attr("text").unwrap_or(UNKNOWN_ERROR_TEXT);
                Err(Error::protocol(code, text))
            }
            None => Ok(()),
        }
    }
}

// ============================================================================
// JsonNodeCodec
// ============================================================================

/// Node codec using JSON as the wire form.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonNodeCodec;

impl NodeCodec for JsonNodeCodec {
    fn encode(&self, node: &Node) -> Result<Vec<u8>> {
        to_vec(node).map_err(|e| Error::codec(format!("node encode failed: {e}")))
    }

    fn decode(&self, data: &[u8]) -> Result<Node> {
        from_slice(data).map_err(|e| Error::codec(format!("node decode failed: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
