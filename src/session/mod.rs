//! Session layer: connection state, supervision and request bookkeeping.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `state` | [`ConnectionState`], [`NetworkState`] |
//! | `supervisor` | State machine, reconnect schedule |
//! | `multiplexer` | Correlation ids and exactly-once completion |
//! | `queue` | Requests waiting for a session |
//! | `monitor` | Network transition classification |

// ============================================================================
// Submodules
// ============================================================================

pub mod monitor;
pub mod multiplexer;
pub mod queue;
pub mod state;
pub mod supervisor;

// ============================================================================
// Re-exports
// ============================================================================

pub use monitor::{NetworkMonitor, NetworkTransition};
pub use multiplexer::{Callback, Completion, IdSequence, Multiplexer, PendingRequest, Phase};
pub use queue::OutboundQueue;
pub use state::{ConnectionState, FailureKind, FailureReason, NetworkState, TransportClass};
pub use supervisor::{Attempt, ReconnectPolicy, Supervisor};
