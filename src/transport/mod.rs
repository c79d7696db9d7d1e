//! Transport layer.
//!
//! This module owns everything between the broker and the network provider:
//! endpoint descriptions, failover selection, and the per-connection I/O task.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Broker         │                              │  Server         │
//! │  processor      │      NetworkProvider         │  endpoint       │
//! │  → Connection ──┼─────────── Link ────────────►│                 │
//! │  ← LinkEvent    │    (FrameSink/FrameSource)   │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `EndpointPool::next` - Pick a candidate endpoint
//! 2. `NetworkProvider::connect` - Open a framed link
//! 3. `Connection::spawn` - Start the I/O task for one epoch
//! 4. `LinkEvent` - Frames and closure flow back to the processor
//! 5. `Connection::shutdown` - Close when the supervisor leaves the epoch
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Per-link I/O task |
//! | `endpoint` | Endpoint address and hints |
//! | `link` | Network provider traits |
//! | `pool` | Endpoint failover and backoff |
//! | `websocket` | Default WebSocket provider |

// ============================================================================
// Submodules
// ============================================================================

/// Per-link I/O task.
pub mod connection;

/// Endpoint address and hints.
pub mod endpoint;

/// Network provider traits.
pub mod link;

/// Endpoint failover and backoff.
pub mod pool;

/// Default WebSocket provider.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, LinkEvent};
pub use endpoint::{Endpoint, TransportHints};
pub use link::{FrameSink, FrameSource, Link, NetworkProvider};
pub use pool::{EndpointPool, Outcome, Selection};
pub use websocket::WebSocketNetwork;
