//! Auth key lifecycle for the broker's connection.
//!
//! Owns the per-endpoint key cache and the single in-progress handshake.
//! Only the broker's processor touches it, so no locking is involved.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::EndpointId;
use crate::transport::Endpoint;

use super::crypto::{CryptoProvider, ExchangeStep, KeyExchange};
use super::key::AuthKey;
use super::storage::KeyStorage;

// ============================================================================
// Types
// ============================================================================

/// Outcome of [`AuthKeyManager::ensure_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    /// A cached key exists and may be announced.
    Ready(AuthKey),
    /// A handshake started; send this as `handshake.init`.
    Exchanging(Vec<u8>),
}

/// Outcome of feeding a server reply into the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeProgress {
    /// Send this as the next `handshake.init`.
    Send(Vec<u8>),
    /// Key derived. It must be persisted before it is used.
    Derived(AuthKey),
}

/// The single in-progress handshake.
#[derive(Debug)]
struct Handshake {
    endpoint: Endpoint,
    attempt: u32,
    exchange: KeyExchange,
    /// `None` once the key is derived and awaiting persistence.
    deadline: Option<Instant>,
}

// ============================================================================
// AuthKeyManager
// ============================================================================

/// Manages auth keys per endpoint.
pub struct AuthKeyManager {
    storage: Arc<dyn KeyStorage>,
    crypto: Arc<dyn CryptoProvider>,
    keys: FxHashMap<EndpointId, AuthKey>,
    handshake: Option<Handshake>,
    max_attempts: u32,
    attempt_timeout: Duration,
}

impl AuthKeyManager {
    /// Creates a manager with an empty cache.
    #[must_use]
    pub fn new(
        storage: Arc<dyn KeyStorage>,
        crypto: Arc<dyn CryptoProvider>,
        max_attempts: u32,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            crypto,
            keys: FxHashMap::default(),
            handshake: None,
            max_attempts: max_attempts.max(1),
            attempt_timeout,
        }
    }

    /// Loads stored keys for the given endpoints into the cache.
    ///
    /// Unreadable entries are logged and skipped. Returns the number of keys
    /// loaded.
    pub fn load(&mut self, endpoints: &[Endpoint]) -> usize {
        let mut loaded = 0;

        for endpoint in endpoints {
            let id = endpoint.id();
            match self.storage.load(&id) {
                Ok(Some(key)) => {
                    debug!(endpoint = %id, key_id = %key.key_id(), "Auth key loaded");
                    self.keys.insert(id, key);
                    loaded += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(endpoint = %id, error = %e, "Failed to load auth key"),
            }
        }

        loaded
    }

    /// Returns the cached key for an endpoint.
    #[inline]
    #[must_use]
    pub fn cached(&self, endpoint: &EndpointId) -> Option<&AuthKey> {
        self.keys.get(endpoint)
    }

    /// Returns the storage backend.
    #[inline]
    #[must_use]
    pub fn storage(&self) -> Arc<dyn KeyStorage> {
        Arc::clone(&self.storage)
    }

    /// Returns `true` while a handshake is running or awaiting persistence.
    #[inline]
    #[must_use]
    pub fn is_handshaking(&self) -> bool {
        self.handshake.is_some()
    }

    /// Returns the deadline of the current handshake attempt.
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.handshake.as_ref().and_then(|h| h.deadline)
    }

    /// Returns the cached key, or starts a handshake if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if a handshake is already in
    /// progress, or the crypto provider's error if the exchange cannot start.
    pub fn ensure_key(&mut self, endpoint: &Endpoint, now: Instant) -> Result<KeyStatus> {
        if let Some(key) = self.keys.get(&endpoint.id()) {
            return Ok(KeyStatus::Ready(key.clone()));
        }

        if let Some(handshake) = &self.handshake {
            return Err(Error::protocol_violation(format!(
                "handshake with {} already in progress",
                handshake.endpoint
            )));
        }

        self.start_attempt(endpoint.clone(), 1, now)
            .map(KeyStatus::Exchanging)
    }

    /// Feeds a `handshake.reply` into the running exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if no exchange is waiting for a
    /// reply, or the crypto provider's error if the reply is invalid.
    pub fn on_reply(&mut self, reply: &[u8], now: Instant) -> Result<HandshakeProgress> {
        let handshake = self
            .handshake
            .as_mut()
            .filter(|h| h.deadline.is_some())
            .ok_or_else(|| Error::protocol_violation("unexpected handshake.reply"))?;

        match self.crypto.advance_exchange(&mut handshake.exchange, reply)? {
            ExchangeStep::Continue(message) => {
                handshake.deadline = Some(now + self.attempt_timeout);
                Ok(HandshakeProgress::Send(message))
            }
            ExchangeStep::Complete(material) => {
                handshake.deadline = None;
                let key = AuthKey::new(handshake.endpoint.id(), material);
                info!(
                    endpoint = %handshake.endpoint,
                    key_id = %key.key_id(),
                    attempt = handshake.attempt,
                    "Auth key derived"
                );
                Ok(HandshakeProgress::Derived(key))
            }
        }
    }

    /// Handles `handshake.rejected`: drops any cached key for the endpoint
    /// and retries while attempts remain.
    ///
    /// Returns the message opening the next attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeRejected`] once attempts are exhausted.
    pub fn on_rejected(&mut self, reason: &str, now: Instant) -> Result<Vec<u8>> {
        let handshake = self
            .handshake
            .take()
            .ok_or_else(|| Error::protocol_violation("unexpected handshake.rejected"))?;
        let id = handshake.endpoint.id();

        self.invalidate(&id);

        if handshake.attempt >= self.max_attempts {
            warn!(endpoint = %id, attempts = handshake.attempt, reason, "Handshake rejected, giving up");
            return Err(Error::handshake_rejected(id, reason));
        }

        warn!(endpoint = %id, attempt = handshake.attempt, reason, "Handshake rejected, retrying");
        self.start_attempt(handshake.endpoint, handshake.attempt + 1, now)
    }

    /// Retries or fails the handshake if its attempt deadline has passed.
    ///
    /// Returns `None` if nothing expired, otherwise the message opening the
    /// next attempt or the terminal error.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<Result<Vec<u8>>> {
        let expired = self
            .handshake
            .as_ref()
            .and_then(|h| h.deadline)
            .is_some_and(|deadline| deadline <= now);
        if !expired {
            return None;
        }

        let handshake = self.handshake.take()?;
        let id = handshake.endpoint.id();

        if handshake.attempt >= self.max_attempts {
            warn!(endpoint = %id, attempts = handshake.attempt, "Handshake timed out, giving up");
            return Some(Err(Error::handshake_timeout(id, handshake.attempt)));
        }

        warn!(endpoint = %id, attempt = handshake.attempt, "Handshake timed out, retrying");
        Some(self.start_attempt(handshake.endpoint, handshake.attempt + 1, now))
    }

    /// Completes persistence of a derived key.
    ///
    /// On success the key is cached and returned. A key whose handshake was
    /// aborted meanwhile is still cached, since it is durable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the key was not persisted; it is then
    /// never used.
    pub fn on_persisted(&mut self, key: AuthKey, result: Result<()>) -> Result<AuthKey> {
        let current = self
            .handshake
            .as_ref()
            .is_some_and(|h| h.deadline.is_none() && h.endpoint.id() == *key.endpoint());
        if current {
            self.handshake = None;
        }

        match result {
            Ok(()) => {
                debug!(endpoint = %key.endpoint(), key_id = %key.key_id(), "Auth key installed");
                self.keys.insert(key.endpoint().clone(), key.clone());
                Ok(key)
            }
            Err(e) => {
                warn!(endpoint = %key.endpoint(), error = %e, "Auth key not persisted, discarding");
                Err(Error::storage(format!("auth key not persisted: {e}")))
            }
        }
    }

    /// Drops the cached key for an endpoint.
    ///
    /// The stored copy is left alone; removing it is blocking I/O, which the
    /// caller runs on a worker through [`storage`](Self::storage).
    ///
    /// Returns `true` if a key was cached.
    pub fn invalidate(&mut self, endpoint: &EndpointId) -> bool {
        let removed = self.keys.remove(endpoint).is_some();
        if removed {
            info!(endpoint = %endpoint, "Auth key invalidated");
        }
        removed
    }

    /// Abandons the running handshake, if any.
    pub fn abort(&mut self) {
        if let Some(handshake) = self.handshake.take() {
            debug!(endpoint = %handshake.endpoint, attempt = handshake.attempt, "Handshake aborted");
        }
    }

    fn start_attempt(&mut self, endpoint: Endpoint, attempt: u32, now: Instant) -> Result<Vec<u8>> {
        let (exchange, message) = self.crypto.start_exchange(&endpoint)?;

        debug!(endpoint = %endpoint, attempt, "Handshake attempt started");
        self.handshake = Some(Handshake {
            endpoint,
            attempt,
            exchange,
            deadline: Some(now + self.attempt_timeout),
        });

        Ok(message)
    }
}

impl std::fmt::Debug for AuthKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthKeyManager")
            .field("keys", &self.keys.len())
            .field("handshake", &self.handshake)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
