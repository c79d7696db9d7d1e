//! Authentication key material.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::identifiers::{EndpointId, KeyId};
use crate::protocol::frame::base64_bytes;

// ============================================================================
// AuthKey
// ============================================================================

/// Key shared with one endpoint, established by a handshake.
///
/// Immutable: a new handshake produces a new value, never an update.
/// `Debug` never prints the material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthKey {
    /// Endpoint the key is valid for.
    endpoint: EndpointId,

    /// Identifier announced in `session.hello`.
    #[serde(rename = "keyId")]
    key_id: KeyId,

    /// Raw key material.
    #[serde(with = "base64_bytes")]
    material: Vec<u8>,

    /// Creation time, milliseconds since the Unix epoch.
    #[serde(rename = "createdAtMs")]
    created_at_ms: u64,
}

impl AuthKey {
    /// Creates a key for an endpoint from raw material.
    #[must_use]
    pub fn new(endpoint: EndpointId, material: Vec<u8>) -> Self {
        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);

        Self {
            endpoint,
            key_id: KeyId::derive(&material),
            material,
            created_at_ms,
        }
    }

    /// Returns the endpoint this key is valid for.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// Returns the key id.
    #[inline]
    #[must_use]
    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// Returns the raw material.
    #[inline]
    #[must_use]
    pub fn material(&self) -> &[u8] {
        &self.material
    }

    /// Returns the creation time in milliseconds since the Unix epoch.
    #[inline]
    #[must_use]
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthKey")
            .field("endpoint", &self.endpoint)
            .field("key_id", &self.key_id)
            .field("len", &self.material.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_id_follows_material() {
        let a = AuthKey::new(EndpointId::new("ws://a/"), vec![1, 2, 3]);
        let b = AuthKey::new(EndpointId::new("ws://a/"), vec![1, 2, 3]);
        assert_eq!(a.key_id(), b.key_id());
        assert_eq!(a.material(), &[1, 2, 3]);
    }

    #[test]
    fn test_debug_hides_material() {
        let key = AuthKey::new(EndpointId::new("ws://a/"), vec![0xde, 0xad]);
        let debug = format!("{key:?}");
        assert!(debug.contains("len: 2"));
        assert!(!debug.contains("material"));
    }

    #[test]
    fn test_serde_round_trip_preserves_identity() {
        let key = AuthKey::new(EndpointId::new("ws://a/"), vec![9; 32]);
        let json = serde_json::to_string(&key).expect("serialize");
        assert!(json.contains("keyId"));
        let back: AuthKey = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, key);
    }
}
