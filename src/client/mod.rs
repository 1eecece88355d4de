//! Connection orchestration.
//!
//! # Lifecycle
//!
//! ```text
//! builder ──► open ──► handshake ──► steady state ──► end
//!              │          │              │              │
//!        transport    hello/finish   queries +     fail waits,
//!        selected     over frames    keep-alive    close transport
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`ConnectionBuilder`] |
//! | `config` | [`ConnectionConfig`] and defaults |
//! | `connection` | [`Connection`], send path, tagged queries, teardown |
//! | `credentials` | [`Credentials`] and the [`KeyStore`] contract |
//! | `handshake` | Client side of the handshake |
//! | `keep_alive` | Periodic ping and lost-connection detection |
//! | `waiter` | [`WaitTable`] of timeout-bounded waits |

// ============================================================================
// Submodules
// ============================================================================

/// Connection builder.
pub mod builder;

/// Connection configuration.
pub mod config;

/// Connection orchestrator.
pub mod connection;

/// Credentials and key storage.
pub mod credentials;

/// Handshake driver.
mod handshake;

/// Keep-alive scheduler.
pub mod keep_alive;

/// Timeout-bounded waits.
pub mod waiter;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConnectionBuilder;
pub use config::{Browser, ConnectionConfig, TransactionOptions};
pub use connection::{Connection, NodeHandler};
pub use credentials::{Credentials, Identity, KeyStore, MemoryKeyStore};
pub use waiter::{PendingWait, WaitTable, with_deadline};
