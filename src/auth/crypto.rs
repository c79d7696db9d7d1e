//! Crypto/identity provider seam.
//!
//! The broker sequences the key exchange and decides when to seal; the math
//! lives behind [`CryptoProvider`].

// ============================================================================
// Imports
// ============================================================================

use crate::error::Result;
use crate::transport::Endpoint;

use super::AuthKey;

// ============================================================================
// KeyExchange
// ============================================================================

/// In-progress key exchange state, opaque to the broker.
#[derive(Debug, Clone, Default)]
pub struct KeyExchange {
    /// Provider-defined state carried between rounds.
    pub state: Vec<u8>,
    /// Rounds completed so far.
    pub round: u32,
}

/// Result of feeding a server message into an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeStep {
    /// Send this message and wait for the next server reply.
    Continue(Vec<u8>),
    /// Exchange finished with this key material.
    Complete(Vec<u8>),
}

// ============================================================================
// CryptoProvider
// ============================================================================

/// Performs the cryptographic steps of key exchange and message protection.
///
/// Invoked from the broker's processor; calls must not block for long.
pub trait CryptoProvider: Send + Sync + 'static {
    /// Begins an exchange with an endpoint.
    ///
    /// Returns the exchange state and the first message for the server.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Crypto`] if the exchange cannot start.
    fn start_exchange(&self, endpoint: &Endpoint) -> Result<(KeyExchange, Vec<u8>)>;

    /// Feeds a server reply into an exchange.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Crypto`] if the reply is invalid.
    fn advance_exchange(&self, exchange: &mut KeyExchange, reply: &[u8]) -> Result<ExchangeStep>;

    /// Encrypts and authenticates an outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Crypto`] on failure.
    fn seal(&self, key: &AuthKey, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Verifies and decrypts an inbound message.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Crypto`] if verification fails.
    fn open(&self, key: &AuthKey, ciphertext: &[u8]) -> Result<Vec<u8>>;
}
