//! Auth keys: material, storage, crypto seam and lifecycle.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `key` | [`AuthKey`] value |
//! | `storage` | [`KeyStorage`] trait with memory and file backends |
//! | `crypto` | [`CryptoProvider`] seam for exchange and sealing |
//! | `manager` | [`AuthKeyManager`], cache plus the single handshake |

// ============================================================================
// Submodules
// ============================================================================

pub mod crypto;
pub mod key;
pub mod manager;
pub mod storage;

// ============================================================================
// Re-exports
// ============================================================================

pub use crypto::{CryptoProvider, ExchangeStep, KeyExchange};
pub use key::AuthKey;
pub use manager::{AuthKeyManager, HandshakeProgress, KeyStatus};
pub use storage::{FileKeyStorage, KeyStorage, MemoryKeyStorage};
