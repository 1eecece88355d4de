//! Timeout-bounded waits with guaranteed deregistration.
//!
//! A [`WaitTable`] maps keys to single-fire result slots. Registering
//! returns a [`PendingWait`] guard; whichever of resolution, failure,
//! timeout or drop happens first removes the slot, so the table never
//! accumulates stale entries.
//!
//! # Example
//!
//! ```ignore
//! let table = WaitTable::<Tag, Node>::new();
//! let wait = table.register(tag.clone())?;
//! send(request).await?;              // wait is already registered
//! let reply = wait.wait(limit).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::Tag;

// ============================================================================
// Types
// ============================================================================

/// One registered slot.
struct Slot<T> {
    /// Registration sequence, guards against removing a re-registered key.
    seq: u64,
    /// Result channel.
    tx: oneshot::Sender<Result<T>>,
}

/// Mutable table state.
struct TableState<K, T> {
    slots: FxHashMap<K, Slot<T>>,
    next_seq: u64,
    closed: bool,
}

// ============================================================================
// WaitTable
// ============================================================================

/// Dispatch table of pending single-fire waits.
///
/// Once [`fail_all`](Self::fail_all) runs the table is closed and every
/// later registration fails with [`Error::ConnectionClosed`].
pub struct WaitTable<K, T> {
    state: Mutex<TableState<K, T>>,
}

impl<K, T> WaitTable<K, T>
where
    K: Eq + Hash + Clone + Display,
{
    /// Creates an empty, open table.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TableState {
                slots: FxHashMap::default(),
                next_seq: 0,
                closed: false,
            }),
        })
    }

    /// Registers a wait for `key`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the table is closed
    /// - [`Error::DuplicateTag`] if `key` is already pending
    pub fn register(self: &Arc<Self>, key: K) -> Result<PendingWait<K, T>> {
        let (tx, rx) = oneshot::channel();

        let seq = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::ConnectionClosed);
            }
            if state.slots.contains_key(&key) {
                return Err(Error::DuplicateTag {
                    tag: Tag::new(key.to_string()),
                });
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.slots.insert(key.clone(), Slot { seq, tx });
            seq
        };

        trace!(%key, "Wait registered");
        Ok(PendingWait {
            table: Arc::clone(self),
            key,
            seq,
            rx,
        })
    }

    /// Resolves the wait for `key`.
    ///
    /// # Errors
    ///
    /// Hands `value` back if no wait is pending for `key`.
    pub fn resolve(&self, key: &K, value: T) -> StdResult<(), T> {
        let slot = self.state.lock().slots.remove(key);

        match slot {
            Some(slot) => {
                // Receiver may be gone if the waiter was cancelled concurrently.
                let _ = slot.tx.send(Ok(value));
                Ok(())
            }
            None => Err(value),
        }
    }

    /// Resolves every pending wait with a copy of `value`.
    pub fn resolve_all(&self, value: &T) -> usize
    where
        T: Clone,
    {
        let slots: Vec<_> = self.state.lock().slots.drain().collect();
        let count = slots.len();

        for (_, slot) in slots {
            let _ = slot.tx.send(Ok(value.clone()));
        }
        count
    }

    /// Rejects every pending wait and closes the table.
    ///
    /// Each wait is rejected exactly once with an error from `make_error`.
    pub fn fail_all(&self, make_error: impl Fn() -> Error) -> usize {
        let slots: Vec<_> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.slots.drain().collect()
        };
        let count = slots.len();

        for (_, slot) in slots {
            let _ = slot.tx.send(Err(make_error()));
        }
        count
    }

    /// Returns the number of pending waits.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Returns `true` if no wait is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once the table has been closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Removes `key` if it still belongs to registration `seq`.
    fn deregister(&self, key: &K, seq: u64) {
        let mut state = self.state.lock();
        if state.slots.get(key).is_some_and(|slot| slot.seq == seq) {
            state.slots.remove(key);
            trace!(%key, "Wait deregistered");
        }
    }
}

// ============================================================================
// PendingWait
// ============================================================================

/// Guard for one registered wait.
///
/// Dropping the guard deregisters the wait.
pub struct PendingWait<K, T>
where
    K: Eq + Hash + Clone + Display,
{
    table: Arc<WaitTable<K, T>>,
    key: K,
    seq: u64,
    rx: oneshot::Receiver<Result<T>>,
}

impl<K, T> PendingWait<K, T>
where
    K: Eq + Hash + Clone + Display,
{
    /// Returns the key this wait is registered under.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Waits for resolution, bounded by `limit`.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if `limit` elapses first
    /// - [`Error::ConnectionClosed`] if the table is torn down
    /// - whatever error the wait was rejected with
    pub async fn wait(mut self, limit: Duration) -> Result<T> {
        match timeout(limit, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::timeout(
                format!("waiting for {}", self.key),
                millis(limit),
            )),
        }
    }
}

impl<K, T> Drop for PendingWait<K, T>
where
    K: Eq + Hash + Clone + Display,
{
    fn drop(&mut self) {
        self.table.deregister(&self.key, self.seq);
    }
}

// ============================================================================
// Deadline Helper
// ============================================================================

/// Runs `future`, failing with [`Error::Timeout`] after `limit`.
///
/// The future is dropped on timeout; any side effect it already started
/// is not rolled back.
///
/// # Errors
///
/// Returns the future's error, or [`Error::Timeout`].
pub async fn with_deadline<T, F>(operation: &str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout(limit, future)
        .await
        .map_err(|_| Error::timeout(operation, millis(limit)))?
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[inline]
#[must_use]
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::Instant;

    fn table() -> Arc<WaitTable<Tag, u32>> {
        WaitTable::new()
    }

    #[tokio::test]
    async fn test_resolve_delivers_value_and_clears_slot() {
        let table = table();
        let wait = table.register(Tag::from("a")).unwrap();
        assert_eq!(table.len(), 1);

        assert!(table.resolve(&Tag::from("a"), 7).is_ok());
        assert!(table.is_empty());
        assert_eq!(wait.wait(Duration::from_secs(1)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_resolve_unknown_key() {
        let table = table();
        assert_eq!(table.resolve(&Tag::from("missing"), 1), Err(1));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let table = table();
        let _first = table.register(Tag::from("dup")).unwrap();

        match table.register(Tag::from("dup")) {
            Err(Error::DuplicateTag { tag }) => assert_eq!(tag.as_str(), "dup"),
            other => panic!("expected duplicate error, got {:?}", other.err()),
        }
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_and_cleanup() {
        let table = table();
        let limit = Duration::from_millis(250);

        let started = Instant::now();
        let err = table
            .register(Tag::from("slow"))
            .unwrap()
            .wait(limit)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_timeout());
        assert!(elapsed >= limit);
        assert!(elapsed < limit + Duration::from_millis(50));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_drop_without_wait_deregisters() {
        let table = table();
        let wait = table.register(Tag::from("dropped")).unwrap();
        drop(wait);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_stale_guard_keeps_new_registration() {
        let table = table();
        let first = table.register(Tag::from("reuse")).unwrap();
        assert!(table.resolve(&Tag::from("reuse"), 1).is_ok());

        let second = table.register(Tag::from("reuse")).unwrap();
        drop(first);
        assert_eq!(table.len(), 1);

        assert!(table.resolve(&Tag::from("reuse"), 2).is_ok());
        assert_eq!(second.wait(Duration::from_secs(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fail_all_rejects_and_closes() {
        let table = table();
        let waits: Vec<_> = (0..5)
            .map(|i| table.register(Tag::new(format!("t{i}"))).unwrap())
            .collect();

        assert_eq!(table.fail_all(|| Error::ConnectionClosed), 5);
        assert!(table.is_closed());

        for wait in waits {
            let err = wait.wait(Duration::from_secs(60)).await.unwrap_err();
            assert!(matches!(err, Error::ConnectionClosed));
        }
        assert!(matches!(
            table.register(Tag::from("late")),
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_resolve_all_copies_value() {
        let table = WaitTable::<u64, Vec<u8>>::new();
        let a = table.register(1).unwrap();
        let b = table.register(2).unwrap();

        assert_eq!(table.resolve_all(&vec![4, 2]), 2);
        assert_eq!(a.wait(Duration::from_secs(1)).await.unwrap(), vec![4, 2]);
        assert_eq!(b.wait(Duration::from_secs(1)).await.unwrap(), vec![4, 2]);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline() {
        let ok = with_deadline("fast", Duration::from_secs(1), async { Ok(3) }).await;
        assert_eq!(ok.unwrap(), 3);

        let slow = with_deadline("slow op", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        match slow {
            Err(Error::Timeout { operation, timeout_ms }) => {
                assert_eq!(operation, "slow op");
                assert_eq!(timeout_ms, 10);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
