//! Wire protocol message types.
//!
//! This module defines what travels between the broker and a server
//! endpoint, and what the application layer hands to the broker.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Frame` | both | Plain envelope: handshake, hello, sealed traffic |
//! | `Message` | both | Sealed application traffic (RPC, push) |
//! | `Request` | caller → broker | RPC submission |
//! | `Response` | broker → caller | RPC result |
//! | `Update` | broker → listener | Server push |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Envelope, frames and sealed messages |
//! | `request` | Request, Response and Update types |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope, frames and sealed messages.
pub mod frame;

/// Request, Response and Update types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{API_MAJOR_VERSION, API_MINOR_VERSION, Frame, Message, PROTOCOL_VERSION};
pub use request::{Request, Response, Update};
