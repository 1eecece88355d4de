//! Long-term credentials and the key-storage contract.
//!
//! The connection reads [`Credentials`] during the handshake and never
//! mutates them. Key material beyond the credentials lives behind a
//! [`KeyStore`], which the connection only passes through.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::protocol::KeyPair;

// ============================================================================
// Identity
// ============================================================================

/// A linked account identity, `user[:device]@server`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Full identity string.
    pub id: String,
    /// Display name, if known.
    pub name: Option<String>,
}

impl Identity {
    /// Creates an identity from its full id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Returns the user part.
    #[must_use]
    pub fn user(&self) -> &str {
        let local = self.id.split('@').next().unwrap_or_default();
        local.split(':').next().unwrap_or_default()
    }

    /// Returns the device number, 0 for the primary device.
    #[must_use]
    pub fn device(&self) -> u16 {
        self.id
            .split('@')
            .next()
            .and_then(|local| local.split_once(':'))
            .and_then(|(_, device)| device.parse().ok())
            .unwrap_or_default()
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Long-term identity material for one account.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Static noise key mixed into the handshake.
    pub noise_key: KeyPair,
    /// Identity key presented at registration.
    pub identity_key: KeyPair,
    /// Local registration id.
    pub registration_id: u32,
    /// Linked identity; `None` until the device is registered.
    pub me: Option<Identity>,
    /// Routing hint returned by the server on a previous session.
    pub routing_info: Option<Vec<u8>>,
}

impl Credentials {
    /// Creates credentials for an unregistered device.
    #[must_use]
    pub fn new(noise_key: KeyPair, identity_key: KeyPair, registration_id: u32) -> Self {
        Self {
            noise_key,
            identity_key,
            registration_id,
            me: None,
            routing_info: None,
        }
    }

    /// Sets the linked identity.
    #[inline]
    #[must_use]
    pub fn with_me(mut self, me: Identity) -> Self {
        self.me = Some(me);
        self
    }

    /// Sets the routing hint.
    #[inline]
    #[must_use]
    pub fn with_routing_info(mut self, routing_info: impl Into<Vec<u8>>) -> Self {
        self.routing_info = Some(routing_info.into());
        self
    }
}

// ============================================================================
// KeyStore
// ============================================================================

/// Typed key-value storage for signal keys and similar records.
///
/// Records are grouped by `kind` (e.g. `"pre-key"`, `"session"`).
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Reads the requested ids of one kind. Missing ids are omitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn get(&self, kind: &str, ids: &[String]) -> Result<FxHashMap<String, Vec<u8>>>;

    /// Writes records of one kind. `None` deletes the id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    async fn set(&self, kind: &str, records: FxHashMap<String, Option<Vec<u8>>>) -> Result<()>;
}

// ============================================================================
// MemoryKeyStore
// ============================================================================

/// Process-local [`KeyStore`].
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    records: Mutex<FxHashMap<String, FxHashMap<String, Vec<u8>>>>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records of one kind.
    #[must_use]
    pub fn len(&self, kind: &str) -> usize {
        self.records.lock().get(kind).map_or(0, FxHashMap::len)
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get(&self, kind: &str, ids: &[String]) -> Result<FxHashMap<String, Vec<u8>>> {
        let records = self.records.lock();
        let Some(bucket) = records.get(kind) else {
            return Ok(FxHashMap::default());
        };

        Ok(ids
            .iter()
            .filter_map(|id| bucket.get(id).map(|value| (id.clone(), value.clone())))
            .collect())
    }

    async fn set(&self, kind: &str, records: FxHashMap<String, Option<Vec<u8>>>) -> Result<()> {
        let mut store = self.records.lock();
        let bucket = store.entry(kind.to_string()).or_default();

        for (id, value) in records {
            match value {
                Some(value) => {
                    bucket.insert(id, value);
                }
                None => {
                    bucket.remove(&id);
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
