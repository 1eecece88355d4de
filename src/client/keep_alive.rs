//! Keep-alive scheduler.
//!
//! One task per connection, started when the handshake finishes and
//! aborted by teardown. Each tick either declares the connection lost or
//! sends a ping.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::Node;

use super::connection::{Connection, ConnectionInner};
use super::waiter::millis;

// ============================================================================
// Constants
// ============================================================================

/// Server address pings are sent to.
pub const PING_TARGET: &str = "s.whatsapp.net";

/// Namespace of the ping query.
pub const PING_XMLNS: &str = "w:p";

/// Silence tolerated beyond one keep-alive period.
pub const LOST_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Connection - Keep-Alive
// ============================================================================

impl Connection {
    /// Spawns the keep-alive task, replacing any previous one.
    ///
    /// The handle is stored before the closed flag is read, so a teardown
    /// racing this call either finds the handle or is seen here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection was torn down.
    pub(crate) fn start_keep_alive(&self) -> Result<()> {
        let period = self.inner.config.keep_alive_interval;
        let handle = tokio::spawn(run_keep_alive(Arc::downgrade(&self.inner), period));

        if let Some(previous) = self.inner.keep_alive.lock().replace(handle) {
            previous.abort();
        }

        if self.is_closed() {
            if let Some(handle) = self.inner.keep_alive.lock().take() {
                handle.abort();
            }
            return Err(Error::ConnectionClosed);
        }

        debug!(period_ms = millis(period), "Keep-alive started");
        Ok(())
    }

    /// Builds one ping query with a fresh tag.
    fn ping_node(&self) -> Node {
        Node::new("iq")
            .with_attr("id", self.generate_message_tag().as_str())
            .with_attr("to", PING_TARGET)
            .with_attr("type", "get")
            .with_attr("xmlns", PING_XMLNS)
            .with_children([Node::new("ping")])
    }
}

async fn run_keep_alive(inner: Weak<ConnectionInner>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let connection = Connection { inner };

        let silent_for = connection.inner.last_received.lock().elapsed();
        if silent_for > period + LOST_GRACE {
            warn!(silent_ms = millis(silent_for), "Connection lost");
            // end() aborts this task; detach so the teardown completes.
            tokio::spawn(async move {
                connection
                    .end(Some(Error::connection("connection was lost")))
                    .await;
            });
            break;
        }

        if let Err(e) = connection.send_node(&connection.ping_node()).await {
            warn!(error = %e, "Keep-alive ping failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc::error::TryRecvError;

    use crate::client::ConnectionConfig;
    use crate::client::mock::Harness;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new().with_keep_alive_interval(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_every_period() {
        let mut harness = Harness::connected_with(config(), Harness::credentials()).await;
        let started = Instant::now();

        for n in 1..=3u64 {
            let ping = harness.next_node().await;
            assert_eq!(ping.tag, "iq");
            assert_eq!(ping.attr("xmlns"), Some(PING_XMLNS));
            assert_eq!(ping.attr("to"), Some(PING_TARGET));
            assert_eq!(ping.attr("type"), Some("get"));
            assert!(ping.child("ping").is_some());

            let elapsed = started.elapsed();
            assert!(elapsed >= Duration::from_secs(n));
            assert!(elapsed < Duration::from_secs(n) + Duration::from_millis(100));

            harness.push_node(&Node::new("iq").with_attr("id", ping.attr("id").unwrap()));
        }
        assert!(!harness.connection.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ping_after_end() {
        let mut harness = Harness::connected_with(config(), Harness::credentials()).await;
        harness.connection.end(None).await;
        assert!(harness.connection.inner.keep_alive.lock().is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(matches!(harness.try_next_frame(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_ends_connection() {
        let harness = Harness::connected_with(config(), Harness::credentials()).await;
        let started = Instant::now();

        let conn = harness.connection.clone();
        let wait = tokio::spawn(async move {
            conn.wait_for_message("never".into(), Some(Duration::from_secs(3600)))
                .await
        });

        match wait.await.unwrap() {
            Err(Error::Connection { message }) => {
                assert!(message.contains("connection was lost"), "{message}");
            }
            other => panic!("expected lost connection, got {other:?}"),
        }
        assert!(harness.connection.is_closed());
        assert!(started.elapsed() > Duration::from_secs(6));
        assert!(started.elapsed() < Duration::from_secs(8));
    }
}
