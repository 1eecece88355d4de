//! Type-safe identifiers for request correlation.
//!
//! A [`Tag`] names one outstanding request. Tags issued by a
//! [`TagGenerator`] have the form `<prefix><counter>`, where the prefix is
//! random per generator and the counter starts at 1.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Tag
// ============================================================================

/// Correlation identifier carried in a node's `id` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Creates a tag from an arbitrary string.
    #[inline]
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the tag as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// TagGenerator
// ============================================================================

/// Issues unique tags for one connection.
///
/// The counter is never reset, so tags are unique for the lifetime of the
/// generator. Safe to share across tasks.
#[derive(Debug)]
pub struct TagGenerator {
    /// Session prefix, fixed at construction.
    prefix: String,
    /// Next counter value.
    epoch: AtomicU64,
}

impl TagGenerator {
    /// Creates a generator with a random `"<u16>.<u16>-"` prefix.
    #[must_use]
    pub fn new() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        let high = u16::from_be_bytes([bytes[0], bytes[1]]);
        let low = u16::from_be_bytes([bytes[2], bytes[3]]);
        Self::with_prefix(format!("{high}.{low}-"))
    }

    /// Creates a generator with a fixed prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            epoch: AtomicU64::new(1),
        }
    }

    /// Returns the session prefix.
    #[inline]
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Issues the next tag.
    pub fn next_tag(&self) -> Tag {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
        Tag(format!("{}{epoch}", self.prefix))
    }

    /// Returns the counter of a tag issued by this generator.
    ///
    /// Returns `None` for tags carrying another prefix.
    #[must_use]
    pub fn counter_of(&self, tag: &Tag) -> Option<u64> {
        tag.as_str().strip_prefix(&self.prefix)?.parse().ok()
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::Arc;

    use proptest::prelude::*;

    #[test]
    fn test_counter_starts_at_one() {
        let tags = TagGenerator::with_prefix("12.34-");
        assert_eq!(tags.next_tag().as_str(), "12.34-1");
        assert_eq!(tags.next_tag().as_str(), "12.34-2");
    }

    #[test]
    fn test_random_prefix_format() {
        let tags = TagGenerator::new();
        let prefix = tags.prefix();
        assert!(prefix.ends_with('-'));

        let (high, low) = prefix
            .trim_end_matches('-')
            .split_once('.')
            .expect("prefix has a dot");
        assert!(high.parse::<u16>().is_ok());
        assert!(low.parse::<u16>().is_ok());
    }

    #[test]
    fn test_counter_of_foreign_tag() {
        let tags = TagGenerator::with_prefix("1.2-");
        assert_eq!(tags.counter_of(&Tag::from("9.9-3")), None);
        assert_eq!(tags.counter_of(&Tag::from("1.2-3")), Some(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tags_are_unique() {
        let tags = Arc::new(TagGenerator::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tags = Arc::clone(&tags);
                tokio::spawn(async move { (0..500).map(|_| tags.next_tag()).collect::<Vec<_>>() })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for tag in handle.await.expect("task should not panic") {
                assert!(seen.insert(tag), "duplicate tag issued");
            }
        }
        assert_eq!(seen.len(), 8 * 500);
    }

    proptest! {
        #[test]
        fn prop_sequential_tags_strictly_increase(count in 1usize..300) {
            let tags = TagGenerator::new();
            let counters: Vec<u64> = (0..count)
                .map(|_| tags.counter_of(&tags.next_tag()).expect("own prefix"))
                .collect();

            prop_assert_eq!(counters[0], 1);
            for pair in counters.windows(2) {
                prop_assert_eq!(pair[1], pair[0] + 1);
            }
        }
    }
}
