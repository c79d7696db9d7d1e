//! Broker configuration.
//!
//! All durations serialize as integer milliseconds.
//!
//! # Example
//!
//! ```
//! use session_broker::BrokerConfig;
//!
//! let config = BrokerConfig::from_json(r#"{
//!     "endpoints": [{"url": "wss://front1.example.com"}],
//!     "requestTimeoutMs": 5000
//! }"#).expect("valid config");
//!
//! assert_eq!(config.request_timeout.as_secs(), 5);
//! assert_eq!(config.max_attempts, 3);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::ReconnectPolicy;
use crate::transport::Endpoint;

// ============================================================================
// BrokerConfig
// ============================================================================

/// Tunables of a broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Ordered endpoint list; the first is tried first.
    pub endpoints: Vec<Endpoint>,

    /// Default per-request budget.
    #[serde(rename = "requestTimeoutMs", with = "duration_ms")]
    pub request_timeout: Duration,

    /// Default transmission attempts per request.
    pub max_attempts: u32,

    /// Handshake attempts per connection before giving up.
    pub handshake_attempts: u32,

    /// Budget for one handshake attempt, and for the server's welcome.
    #[serde(rename = "handshakeTimeoutMs", with = "duration_ms")]
    pub handshake_timeout: Duration,

    /// Dial budget when the endpoint has no hint.
    #[serde(rename = "connectTimeoutMs", with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Reconnect delay after the first failure.
    #[serde(rename = "reconnectBackoffBaseMs", with = "duration_ms")]
    pub reconnect_backoff_base: Duration,

    /// Reconnect delay cap.
    #[serde(rename = "reconnectBackoffCapMs", with = "duration_ms")]
    pub reconnect_backoff_cap: Duration,

    /// Reconnect jitter fraction.
    pub reconnect_jitter: f64,

    /// Per-endpoint backoff after its first failure.
    #[serde(rename = "endpointBackoffBaseMs", with = "duration_ms")]
    pub endpoint_backoff_base: Duration,

    /// Per-endpoint backoff cap.
    #[serde(rename = "endpointBackoffCapMs", with = "duration_ms")]
    pub endpoint_backoff_cap: Duration,

    /// Wait after connectivity returns before reconnecting.
    #[serde(rename = "reconnectDebounceMs", with = "duration_ms")]
    pub reconnect_debounce: Duration,

    /// Timeout sweep interval.
    #[serde(rename = "tickIntervalMs", with = "duration_ms")]
    pub tick_interval: Duration,

    /// Pending request limit.
    pub max_pending: usize,

    /// Send `updates.subscribe` on every new session.
    pub subscribe_updates: bool,

    /// Trace every frame sent and received.
    pub log_frames: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            handshake_attempts: 3,
            handshake_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            reconnect_backoff_base: Duration::from_secs(1),
            reconnect_backoff_cap: Duration::from_secs(30),
            reconnect_jitter: 0.2,
            endpoint_backoff_base: Duration::from_secs(1),
            endpoint_backoff_cap: Duration::from_secs(60),
            reconnect_debounce: Duration::from_millis(250),
            tick_interval: Duration::from_millis(100),
            max_pending: 1024,
            subscribe_updates: true,
            log_frames: false,
        }
    }
}

impl BrokerConfig {
    /// Parses a JSON configuration; missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the JSON is malformed or invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid broker config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the broker cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::config(
                "At least one endpoint is required.\n\
                 Example: Broker::builder().endpoint(\"wss://front1.example.com\")",
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }
        if self.handshake_attempts == 0 {
            return Err(Error::config("handshake_attempts must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.reconnect_jitter) {
            return Err(Error::config(format!(
                "reconnect_jitter must be in [0, 1), got {}",
                self.reconnect_jitter
            )));
        }
        if self.reconnect_backoff_cap < self.reconnect_backoff_base {
            return Err(Error::config("reconnect backoff cap is below its base"));
        }
        if self.endpoint_backoff_cap < self.endpoint_backoff_base {
            return Err(Error::config("endpoint backoff cap is below its base"));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::config("tick_interval must be non-zero"));
        }
        if self.max_pending == 0 {
            return Err(Error::config("max_pending must be at least 1"));
        }
        Ok(())
    }

    /// Returns the reconnect policy described by this configuration.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: self.reconnect_backoff_base,
            cap: self.reconnect_backoff_cap,
            jitter: self.reconnect_jitter,
            debounce: self.reconnect_debounce,
        }
    }
}

// ============================================================================
// Millisecond Durations
// ============================================================================

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================
