//! Transport selection.
//!
//! Configuration resolves to exactly one [`TransportPlan`] variant:
//!
//! | Condition | Plan |
//! |-----------|------|
//! | `config.transport` set | [`TransportPlan::Supplied`] |
//! | `config.mobile` or `tcp://` endpoint | [`TransportPlan::RawStream`] to the mobile gateway |
//! | otherwise | [`TransportPlan::WebSocket`], routing hint appended as `ED` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as Base64UrlSafe;
use tracing::debug;
use url::Url;

use crate::client::{ConnectionConfig, Credentials};
use crate::error::Result;

use super::{RawStreamTransport, Transport, WebSocketTransport};

// ============================================================================
// Constants
// ============================================================================

/// Host of the mobile gateway.
pub const MOBILE_GATEWAY_HOST: &str = "g.whatsapp.net";

/// Port of the mobile gateway.
pub const MOBILE_GATEWAY_PORT: u16 = 443;

/// Query parameter carrying the routing hint.
pub const ROUTING_INFO_PARAM: &str = "ED";

/// URL scheme selecting the raw stream transport.
const RAW_STREAM_SCHEME: &str = "tcp";

// ============================================================================
// TransportPlan
// ============================================================================

/// The transport variant a connection will use.
#[derive(Clone)]
pub enum TransportPlan {
    /// Caller-owned transport, used verbatim.
    Supplied(Arc<dyn Transport>),
    /// WebSocket against the given URL.
    WebSocket(Url),
    /// Raw TCP stream.
    RawStream {
        /// Remote host.
        host: String,
        /// Remote port.
        port: u16,
    },
}

impl fmt::Debug for TransportPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supplied(_) => f.write_str("Supplied"),
            Self::WebSocket(url) => f.debug_tuple("WebSocket").field(&url.as_str()).finish(),
            Self::RawStream { host, port } => f
                .debug_struct("RawStream")
                .field("host", host)
                .field("port", port)
                .finish(),
        }
    }
}

impl TransportPlan {
    /// Normalizes `config` and picks the transport variant.
    ///
    /// In mobile mode (or for a `tcp://` endpoint) the endpoint is rewritten
    /// to the mobile gateway and `config.mobile` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`](crate::Error::Url) if the endpoint is not a URL.
    pub fn resolve(config: &mut ConnectionConfig, credentials: &Credentials) -> Result<Self> {
        if let Some(transport) = &config.transport {
            debug!("Using supplied transport");
            return Ok(Self::Supplied(Arc::clone(transport)));
        }

        let mut url = Url::parse(&config.endpoint)?;

        if config.mobile || url.scheme() == RAW_STREAM_SCHEME {
            config.mobile = true;
            config.endpoint = format!("{RAW_STREAM_SCHEME}://{MOBILE_GATEWAY_HOST}:{MOBILE_GATEWAY_PORT}");
            debug!(endpoint = %config.endpoint, "Mobile mode, using gateway");
            return Ok(Self::RawStream {
                host: MOBILE_GATEWAY_HOST.to_string(),
                port: MOBILE_GATEWAY_PORT,
            });
        }

        if let Some(routing_info) = &credentials.routing_info {
            url.query_pairs_mut()
                .append_pair(ROUTING_INFO_PARAM, &Base64UrlSafe.encode(routing_info));
        }

        Ok(Self::WebSocket(url))
    }

    /// Returns a printable connect target.
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::Supplied(_) => "<supplied>".to_string(),
            Self::WebSocket(url) => url.to_string(),
            Self::RawStream { host, port } => format!("{host}:{port}"),
        }
    }

    /// Builds the transport instance.
    #[must_use]
    pub fn build(self, config: &ConnectionConfig) -> Arc<dyn Transport> {
        match self {
            Self::Supplied(transport) => transport,
            Self::WebSocket(url) => Arc::new(WebSocketTransport::new(
                url,
                config.origin.clone(),
                config.connect_timeout,
            )),
            Self::RawStream { host, port } => Arc::new(RawStreamTransport::new(
                host,
                port,
                config.connect_timeout,
            )),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
