//! Server endpoint description.
//!
//! An [`Endpoint`] is immutable once loaded from configuration. The pool
//! may reorder its preference between endpoints but never mutates one.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::EndpointId;

// ============================================================================
// Constants
// ============================================================================

/// URL schemes accepted for endpoints.
const SUPPORTED_SCHEMES: &[&str] = &["ws", "wss", "tcp", "tls", "memory"];

// ============================================================================
// TransportHints
// ============================================================================

/// Hints passed through to the network provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportHints {
    /// Overrides the broker-wide connect timeout for this endpoint.
    #[serde(default, rename = "connectTimeoutMs")]
    pub connect_timeout_ms: Option<u64>,

    /// Prefer IPv6 addresses when resolving the host.
    #[serde(default, rename = "preferIpv6")]
    pub prefer_ipv6: bool,
}

// ============================================================================
// Endpoint
// ============================================================================

/// One server address the client may connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Server address.
    url: Url,

    /// Transport hints.
    #[serde(default)]
    hints: TransportHints,
}

impl Endpoint {
    /// Parses an endpoint from a URL string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is invalid, has no host, or uses
    /// an unsupported scheme.
    pub fn parse(address: &str) -> Result<Self> {
        let url = Url::parse(address)
            .map_err(|e| Error::config(format!("Invalid endpoint '{address}': {e}")))?;
        Self::from_url(url)
    }

    /// Creates an endpoint from an already parsed URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL has no host or uses an
    /// unsupported scheme.
    pub fn from_url(url: Url) -> Result<Self> {
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(Error::config(format!(
                "Unsupported endpoint scheme '{}' (expected one of {})",
                url.scheme(),
                SUPPORTED_SCHEMES.join(", ")
            )));
        }

        if url.host_str().is_none() {
            return Err(Error::config(format!("Endpoint '{url}' has no host")));
        }

        Ok(Self {
            url,
            hints: TransportHints::default(),
        })
    }

    /// Returns a copy with the given transport hints.
    #[inline]
    #[must_use]
    pub fn with_hints(mut self, hints: TransportHints) -> Self {
        self.hints = hints;
        self
    }

    /// Returns the stable id keys are stored under.
    #[inline]
    #[must_use]
    pub fn id(&self) -> EndpointId {
        EndpointId::new(self.url.as_str())
    }

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the transport hints.
    #[inline]
    #[must_use]
    pub fn hints(&self) -> &TransportHints {
        &self.hints
    }

    /// Returns the connect timeout override, if any.
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.hints.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Returns `true` if the scheme implies TLS.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        matches!(self.url.scheme(), "wss" | "tls")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_websocket_endpoint() {
        let endpoint = Endpoint::parse("wss://front1.example.com:443").expect("valid");
        assert!(endpoint.is_secure());
        assert_eq!(endpoint.url().host_str(), Some("front1.example.com"));
        assert_eq!(endpoint.id().as_str(), "wss://front1.example.com/");
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        let err = Endpoint::parse("http://example.com").unwrap_err();
        assert!(err.to_string().contains("Unsupported endpoint scheme"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Endpoint::parse("not a url").is_err());
    }

    #[test]
    fn test_hints_connect_timeout() {
        let endpoint = Endpoint::parse("tcp://10.0.0.1:443")
            .expect("valid")
            .with_hints(TransportHints {
                connect_timeout_ms: Some(1500),
                prefer_ipv6: false,
            });
        assert_eq!(endpoint.connect_timeout(), Some(Duration::from_millis(1500)));
        assert!(!endpoint.is_secure());
    }

    #[test]
    fn test_endpoint_deserialize() {
        let json = r#"{"url": "ws://127.0.0.1:8080/", "hints": {"preferIpv6": true}}"#;
        let endpoint: Endpoint = serde_json::from_str(json).expect("parse");
        assert!(endpoint.hints().prefer_ipv6);
        assert_eq!(endpoint.connect_timeout(), None);
    }
}
