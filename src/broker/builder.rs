//! Builder pattern for broker configuration.
//!
//! Provides a fluent API for configuring and starting a [`Broker`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use session_broker::{Broker, FileKeyStorage};
//! use session_broker::testing::PassthroughCrypto;
//!
//! # async fn example() -> session_broker::Result<()> {
//! let broker = Broker::builder()
//!     .endpoint("wss://front1.example.com")
//!     .key_storage(FileKeyStorage::open("./keys")?)
//!     .crypto(PassthroughCrypto::new())
//!     .request_timeout(Duration::from_secs(10))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::auth::{CryptoProvider, KeyStorage, MemoryKeyStorage};
use crate::error::{Error, Result};
use crate::transport::{Endpoint, NetworkProvider, WebSocketNetwork};

use super::context::SessionContext;
use super::core::{Broker, BrokerParts};
use super::listener::{NoopListener, SessionListener};
use super::options::BrokerConfig;

// ============================================================================
// BrokerBuilder
// ============================================================================

/// Builder for configuring a [`Broker`] instance.
///
/// Use [`Broker::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct BrokerBuilder {
    /// Tunables.
    config: BrokerConfig,
    /// Endpoint strings that failed to parse.
    invalid_endpoints: Vec<String>,
    /// Application id for the session context.
    app_id: Option<u32>,
    /// Network provider; WebSocket when unset.
    network: Option<Arc<dyn NetworkProvider>>,
    /// Key storage; in-memory when unset.
    storage: Option<Arc<dyn KeyStorage>>,
    /// Crypto provider; required.
    crypto: Option<Arc<dyn CryptoProvider>>,
    /// Session listener; no-op when unset.
    listener: Option<Arc<dyn SessionListener>>,
}

impl fmt::Debug for BrokerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerBuilder")
            .field("config", &self.config)
            .field("invalid_endpoints", &self.invalid_endpoints)
            .field("app_id", &self.app_id)
            .field("network", &self.network.is_some())
            .field("storage", &self.storage.is_some())
            .field("crypto", &self.crypto.is_some())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

// ============================================================================
// BrokerBuilder Implementation
// ============================================================================

impl BrokerBuilder {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    ///
    /// Endpoints added earlier are kept after the configured ones.
    #[must_use]
    pub fn config(mut self, config: BrokerConfig) -> Self {
        let added = std::mem::take(&mut self.config.endpoints);
        self.config = config;
        self.config.endpoints.extend(added);
        self
    }

    /// Appends an endpoint by URL.
    ///
    /// Parse errors are reported by [`BrokerBuilder::build`].
    #[must_use]
    pub fn endpoint(mut self, address: &str) -> Self {
        match Endpoint::parse(address) {
            Ok(endpoint) => self.config.endpoints.push(endpoint),
            Err(_) => self.invalid_endpoints.push(address.to_string()),
        }
        self
    }

    /// Appends a parsed endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint_with(mut self, endpoint: Endpoint) -> Self {
        self.config.endpoints.push(endpoint);
        self
    }

    /// Sets the application id reported in the session context.
    #[inline]
    #[must_use]
    pub fn app_id(mut self, app_id: u32) -> Self {
        self.app_id = Some(app_id);
        self
    }

    /// Sets the default per-request budget.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the default transmission attempts per request.
    #[inline]
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Sets the handshake attempt cap per connection.
    #[inline]
    #[must_use]
    pub fn handshake_attempts(mut self, attempts: u32) -> Self {
        self.config.handshake_attempts = attempts;
        self
    }

    /// Sets the budget of one handshake attempt.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Sets the default dial budget.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the reconnect backoff base and cap.
    #[inline]
    #[must_use]
    pub fn reconnect_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.config.reconnect_backoff_base = base;
        self.config.reconnect_backoff_cap = cap;
        self
    }

    /// Sets the reconnect jitter fraction.
    #[inline]
    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.config.reconnect_jitter = jitter;
        self
    }

    /// Sets the per-endpoint backoff base and cap.
    #[inline]
    #[must_use]
    pub fn endpoint_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.config.endpoint_backoff_base = base;
        self.config.endpoint_backoff_cap = cap;
        self
    }

    /// Sets the wait after connectivity returns.
    #[inline]
    #[must_use]
    pub fn reconnect_debounce(mut self, debounce: Duration) -> Self {
        self.config.reconnect_debounce = debounce;
        self
    }

    /// Sets the timeout sweep interval.
    #[inline]
    #[must_use]
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Sets the pending request limit.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, max: usize) -> Self {
        self.config.max_pending = max;
        self
    }

    /// Enables or disables `updates.subscribe` on new sessions.
    #[inline]
    #[must_use]
    pub fn subscribe_updates(mut self, enabled: bool) -> Self {
        self.config.subscribe_updates = enabled;
        self
    }

    /// Enables per-frame trace logging.
    #[inline]
    #[must_use]
    pub fn log_frames(mut self, enabled: bool) -> Self {
        self.config.log_frames = enabled;
        self
    }

    /// Sets the network provider.
    #[must_use]
    pub fn network(mut self, network: impl NetworkProvider) -> Self {
        self.network = Some(Arc::new(network));
        self
    }

    /// Sets the key storage.
    #[must_use]
    pub fn key_storage(mut self, storage: impl KeyStorage) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Sets a shared key storage.
    #[must_use]
    pub fn shared_key_storage(mut self, storage: Arc<dyn KeyStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the crypto provider.
    #[must_use]
    pub fn crypto(mut self, crypto: impl CryptoProvider) -> Self {
        self.crypto = Some(Arc::new(crypto));
        self
    }

    /// Sets the session listener.
    #[must_use]
    pub fn listener(mut self, listener: impl SessionListener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Sets a shared session listener.
    #[must_use]
    pub fn shared_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Validates the configuration and starts the broker.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if an endpoint is invalid, none is set, the
    ///   crypto provider is missing, or a tunable is out of range
    /// - [`Error::Config`] outside a Tokio runtime
    pub fn build(self) -> Result<Broker> {
        self.validate_endpoints()?;
        let crypto = self.validate_crypto()?;
        self.config.validate()?;

        let storage = self.storage.unwrap_or_else(|| {
            warn!("No key storage configured, auth keys will not survive a restart");
            Arc::new(MemoryKeyStorage::new())
        });

        Broker::start(BrokerParts {
            config: self.config,
            context: SessionContext::new(self.app_id),
            network: self.network.unwrap_or_else(|| Arc::new(WebSocketNetwork::new())),
            storage,
            crypto,
            listener: self.listener.unwrap_or_else(|| Arc::new(NoopListener)),
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BrokerBuilder {
    /// Reports the first endpoint that failed to parse.
    fn validate_endpoints(&self) -> Result<()> {
        match self.invalid_endpoints.first() {
            Some(address) => Err(Error::config(format!(
                "Invalid endpoint: {address}\n\
                 Endpoints must be absolute ws://, wss://, tcp://, tls:// or memory:// URLs."
            ))),
            None => Ok(()),
        }
    }

    /// Requires a crypto provider.
    fn validate_crypto(&self) -> Result<Arc<dyn CryptoProvider>> {
        self.crypto.clone().ok_or_else(|| {
            Error::config(
                "A crypto provider is required. Use .crypto() to set it.\n\
                 Example: Broker::builder().crypto(MyCrypto::new())",
            )
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::PassthroughCrypto;

    #[test]
    fn test_new_creates_default_builder() {
        let builder = BrokerBuilder::new();
        assert!(builder.config.endpoints.is_empty());
        assert!(builder.crypto.is_none());
        assert_eq!(builder.config.max_attempts, 3);
    }

    #[test]
    fn test_endpoint_appends_in_order() {
        let builder = BrokerBuilder::new()
            .endpoint("ws://a.example")
            .endpoint("ws://b.example");
        let ids: Vec<_> = builder.config.endpoints.iter().map(Endpoint::id).collect();
        assert_eq!(ids[0].as_str(), "ws://a.example/");
        assert_eq!(ids[1].as_str(), "ws://b.example/");
    }

    #[test]
    fn test_config_keeps_added_endpoints() {
        let builder = BrokerBuilder::new()
            .endpoint("ws://a.example")
            .config(BrokerConfig {
                max_attempts: 7,
                ..BrokerConfig::default()
            });
        assert_eq!(builder.config.endpoints.len(), 1);
        assert_eq!(builder.config.max_attempts, 7);
    }

    #[test]
    fn test_build_rejects_invalid_endpoint() {
        let err = BrokerBuilder::new()
            .endpoint("not a url")
            .crypto(PassthroughCrypto::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_build_requires_crypto() {
        let err = BrokerBuilder::new()
            .endpoint("ws://a.example")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("crypto provider"));
    }

    #[test]
    fn test_build_requires_runtime() {
        let err = BrokerBuilder::new()
            .endpoint("ws://a.example")
            .crypto(PassthroughCrypto::new())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Tokio runtime"));
    }

    #[test]
    fn test_build_validates_tunables() {
        let err = BrokerBuilder::new()
            .endpoint("ws://a.example")
            .crypto(PassthroughCrypto::new())
            .max_attempts(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
