//! Broker facade and its processor task.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `core` | [`Broker`] handle |
//! | `builder` | [`BrokerBuilder`] |
//! | `options` | [`BrokerConfig`] |
//! | `call` | [`PendingCall`] future |
//! | `listener` | [`SessionListener`] notifications |
//! | `context` | [`SessionContext`] identity |
//! | `processor` | Sequential event loop owning all session state |

// ============================================================================
// Submodules
// ============================================================================

pub mod builder;
pub mod call;
pub mod context;
pub mod core;
pub mod listener;
pub mod options;

mod event;
mod processor;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::BrokerBuilder;
pub use call::PendingCall;
pub use context::SessionContext;
pub use core::Broker;
pub use listener::{NoopListener, SessionListener};
pub use options::BrokerConfig;
