//! Tree-structured protocol node.
//!
//! Every application message exchanged after the handshake is a [`Node`]:
//! a tag name, string attributes, and optional content.
//!
//! # Format
//!
//! The display form is an XML-like rendering used only for diagnostics:
//!
//! ```text
//! <iq id="12.34-1" type="get" xmlns="w:p"><ping/></iq>
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifiers::Tag;

// ============================================================================
// Constants
// ============================================================================

/// Attribute carrying the correlation tag.
pub const ID_ATTR: &str = "id";

// ============================================================================
// NodeContent
// ============================================================================

/// Payload of a [`Node`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum NodeContent {
    /// No content.
    #[default]
    Empty,
    /// Child nodes.
    Nodes(Vec<Node>),
    /// Opaque binary content.
    Bytes(Vec<u8>),
    /// Text content.
    Text(String),
}

// ============================================================================
// Node
// ============================================================================

/// A protocol message tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Element name.
    pub tag: String,

    /// Attributes, ordered by key.
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,

    /// Element content.
    #[serde(default)]
    pub content: NodeContent,
}

impl Node {
    /// Creates an empty node with the given tag name.
    #[inline]
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: BTreeMap::new(),
            content: NodeContent::Empty,
        }
    }

    /// Sets an attribute.
    #[inline]
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Sets child nodes as content.
    #[inline]
    #[must_use]
    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.content = NodeContent::Nodes(children.into_iter().collect());
        self
    }

    /// Sets binary content.
    #[inline]
    #[must_use]
    pub fn with_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.content = NodeContent::Bytes(bytes.into());
        self
    }

    /// Sets text content.
    #[inline]
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content = NodeContent::Text(text.into());
        self
    }

    /// Returns an attribute value.
    #[inline]
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Returns the correlation tag, if the node carries one.
    #[must_use]
    pub fn id(&self) -> Option<Tag> {
        self.attr(ID_ATTR).map(Tag::from)
    }

    /// Sets the correlation tag.
    pub fn set_id(&mut self, tag: &Tag) {
        self.attrs.insert(ID_ATTR.to_string(), tag.to_string());
    }

    /// Returns child nodes, or an empty slice for non-node content.
    #[must_use]
    pub fn children(&self) -> &[Node] {
        match &self.content {
            NodeContent::Nodes(children) => children,
            _ => &[],
        }
    }

    /// Returns the first child with the given tag name.
    #[must_use]
    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children().iter().find(|child| child.tag == tag)
    }
}

// ============================================================================
// Node - Display
// ============================================================================

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        for (key, value) in &self.attrs {
            write!(f, " {key}=\"{value}\"")?;
        }

        match &self.content {
            NodeContent::Empty => f.write_str("/>"),
            NodeContent::Nodes(children) => {
                f.write_str(">")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                write!(f, "</{}>", self.tag)
            }
            NodeContent::Bytes(bytes) => write!(f, "><!-- {} bytes --></{}>", bytes.len(), self.tag),
            NodeContent::Text(text) => write!(f, ">{text}</{}>", self.tag),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_nested() {
        let node = Node::new("iq")
            .with_attr("type", "get")
            .with_attr("id", "1.2-3")
            .with_children([Node::new("ping")]);

        assert_eq!(node.to_string(), r#"<iq id="1.2-3" type="get"><ping/></iq>"#);
    }

    #[test]
    fn test_display_bytes_and_text() {
        assert_eq!(
            Node::new("enc").with_bytes(vec![1, 2, 3]).to_string(),
            "<enc><!-- 3 bytes --></enc>"
        );
        assert_eq!(
            Node::new("body").with_text("hi").to_string(),
            "<body>hi</body>"
        );
    }

    #[test]
    fn test_id_roundtrip_through_attr() {
        let mut node = Node::new("iq");
        assert!(node.id().is_none());

        node.set_id(&Tag::from("5.6-7"));
        assert_eq!(node.id(), Some(Tag::from("5.6-7")));
        assert_eq!(node.attr(ID_ATTR), Some("5.6-7"));
    }

    #[test]
    fn test_child_lookup() {
        let node = Node::new("iq").with_children([
            Node::new("ping"),
            Node::new("error").with_attr("code", "500"),
        ]);

        assert_eq!(node.child("error").and_then(|e| e.attr("code")), Some("500"));
        assert!(node.child("missing").is_none());
        assert!(Node::new("leaf").with_text("x").children().is_empty());
    }
}
