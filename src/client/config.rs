//! Connection configuration.
//!
//! Provides a type-safe configuration surface for a [`Connection`] such as
//! the endpoint, timeouts, keep-alive period and client description.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use noise_socket::ConnectionConfig;
//!
//! let config = ConnectionConfig::new()
//!     .with_connect_timeout(Duration::from_secs(10))
//!     .with_keep_alive_interval(Duration::from_secs(25))
//!     .with_mobile();
//! ```
//!
//! [`Connection`]: super::Connection

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::UserAgent;
use crate::transport::Transport;

// ============================================================================
// Constants
// ============================================================================

/// Default WebSocket endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://web.whatsapp.com/ws/chat";

/// Default `Origin` header for WebSocket upgrades.
pub const DEFAULT_ORIGIN: &str = "https://web.whatsapp.com";

/// Default bound for connects, sends and handshake waits (20s).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default bound for tagged queries (60s).
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default keep-alive period (30s).
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Browser
// ============================================================================

/// Client description presented during login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Browser {
    /// Operating system name.
    pub os: String,
    /// Browser or client name.
    pub name: String,
    /// Version string.
    pub version: String,
}

impl Browser {
    /// Creates a browser description.
    #[must_use]
    pub fn new(
        os: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            os: os.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Converts to the handshake user agent.
    #[must_use]
    pub fn user_agent(&self) -> UserAgent {
        UserAgent {
            os: self.os.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

impl Default for Browser {
    fn default() -> Self {
        Self::new("Ubuntu", "Chrome", "22.04.4")
    }
}

// ============================================================================
// TransactionOptions
// ============================================================================

/// Options forwarded unchanged to the key-storage collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Attempts before a commit is abandoned.
    pub max_commit_retries: u32,
    /// Pause between commit attempts.
    pub delay_between_tries: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            max_commit_retries: 10,
            delay_between_tries: Duration::from_secs(3),
        }
    }
}

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Configuration for one connection.
///
/// Normalized once during setup (mobile/endpoint rewrite), then read-only.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Endpoint URL. A `tcp://` scheme selects the raw stream transport.
    pub endpoint: String,

    /// Bound for transport connect, frame sends and handshake waits.
    pub connect_timeout: Duration,

    /// Bound for tagged waits when the caller passes none.
    pub default_query_timeout: Duration,

    /// Keep-alive period.
    pub keep_alive_interval: Duration,

    /// Client description.
    pub browser: Browser,

    /// Connect as a mobile primary device over the raw stream gateway.
    pub mobile: bool,

    /// `Origin` header for WebSocket upgrades.
    pub origin: Option<String>,

    /// Pre-built transport; used verbatim when set.
    pub transport: Option<Arc<dyn Transport>>,

    /// Key-storage transaction options.
    pub transaction: TransactionOptions,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .field("default_query_timeout", &self.default_query_timeout)
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("browser", &self.browser)
            .field("mobile", &self.mobile)
            .field("origin", &self.origin)
            .field("custom_transport", &self.transport.is_some())
            .field("transaction", &self.transaction)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            default_query_timeout: DEFAULT_QUERY_TIMEOUT,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            browser: Browser::default(),
            mobile: false,
            origin: Some(DEFAULT_ORIGIN.to_string()),
            transport: None,
            transaction: TransactionOptions::default(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoint URL.
    #[inline]
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the default query timeout.
    #[inline]
    #[must_use]
    pub fn with_default_query_timeout(mut self, timeout: Duration) -> Self {
        self.default_query_timeout = timeout;
        self
    }

    /// Sets the keep-alive period.
    #[inline]
    #[must_use]
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Sets the client description.
    #[inline]
    #[must_use]
    pub fn with_browser(mut self, browser: Browser) -> Self {
        self.browser = browser;
        self
    }

    /// Enables mobile mode.
    #[inline]
    #[must_use]
    pub fn with_mobile(mut self) -> Self {
        self.mobile = true;
        self
    }

    /// Sets or clears the `Origin` header.
    #[inline]
    #[must_use]
    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    /// Supplies a pre-built transport.
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets key-storage transaction options.
    #[inline]
    #[must_use]
    pub fn with_transaction(mut self, transaction: TransactionOptions) -> Self {
        self.transaction = transaction;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ConnectionConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero durations.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect timeout must be greater than zero"));
        }
        if self.default_query_timeout.is_zero() {
            return Err(Error::config("query timeout must be greater than zero"));
        }
        if self.keep_alive_interval.is_zero() {
            return Err(Error::config("keep-alive interval must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.default_query_timeout, Duration::from_secs(60));
        assert_eq!(config.keep_alive_interval, Duration::from_secs(30));
        assert!(!config.mobile);
        assert!(config.transport.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = ConnectionConfig::new()
            .with_endpoint("tcp://example.net:5222")
            .with_connect_timeout(Duration::from_secs(5))
            .with_mobile()
            .with_origin(None);

        assert_eq!(config.endpoint, "tcp://example.net:5222");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.mobile);
        assert!(config.origin.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let config = ConnectionConfig::new().with_keep_alive_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config { .. })));

        let config = ConnectionConfig::new().with_connect_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_transport_object() {
        let rendered = format!("{:?}", ConnectionConfig::default());
        assert!(rendered.contains("custom_transport: false"));
    }

    #[test]
    fn test_browser_user_agent() {
        let agent = Browser::new("Mac OS", "Safari", "17.0").user_agent();
        assert_eq!(agent.os, "Mac OS");
        assert_eq!(agent.name, "Safari");
        assert_eq!(agent.version, "17.0");
    }
}
