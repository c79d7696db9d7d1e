//! Endpoint pool with round-robin failover.
//!
//! Tracks health of every configured endpoint and picks the next candidate
//! for the connection supervisor.
//!
//! # Selection
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             EndpointPool                │
//! │  cursor ─┐                              │
//! │          ▼                              │
//! │  [A: backed off] [B: ok] [C: ok]        │
//! │                   ▲                     │
//! │                   └── next() returns B  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The cursor sits on the last endpoint that connected successfully. A
//! failure on the cursor endpoint moves the cursor past it, so the scan
//! continues round-robin instead of retrying the failed endpoint first.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::EndpointId;

use super::Endpoint;

// ============================================================================
// Selection
// ============================================================================

/// Result of asking the pool for a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Endpoint to connect to.
    Ready(Endpoint),
    /// Every endpoint is backed off; try again at `retry_at`.
    Exhausted {
        /// Earliest instant an endpoint leaves its backoff window.
        retry_at: Instant,
    },
}

/// Outcome of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Connected and authenticated.
    Success,
    /// Connect, handshake or session failed.
    Failure,
}

// ============================================================================
// EndpointHealth
// ============================================================================

/// Backoff bookkeeping for one endpoint.
#[derive(Debug, Clone, Copy, Default)]
struct EndpointHealth {
    /// Consecutive failures.
    failures: u32,
    /// End of the current backoff window.
    backoff_until: Option<Instant>,
}

impl EndpointHealth {
    #[inline]
    fn is_available(&self, now: Instant) -> bool {
        self.backoff_until.is_none_or(|until| until <= now)
    }
}

// ============================================================================
// EndpointPool
// ============================================================================

/// Ordered list of candidate endpoints with failover selection.
///
/// Only touched from the broker's processor, so it needs no locking.
#[derive(Debug)]
pub struct EndpointPool {
    /// Configured endpoints, in configuration order.
    endpoints: Vec<Endpoint>,
    /// Health, parallel to `endpoints`.
    health: Vec<EndpointHealth>,
    /// Index the next scan starts from.
    cursor: usize,
    /// First backoff step.
    base: Duration,
    /// Backoff ceiling.
    cap: Duration,
}

impl EndpointPool {
    /// Creates a pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `endpoints` is empty.
    pub fn new(endpoints: Vec<Endpoint>, base: Duration, cap: Duration) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::config("Endpoint pool requires at least one endpoint"));
        }

        let health = vec![EndpointHealth::default(); endpoints.len()];
        Ok(Self {
            endpoints,
            health,
            cursor: 0,
            base,
            cap,
        })
    }

    /// Returns the number of endpoints.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns `true` if the pool has no endpoints (never after construction).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Returns the configured endpoints.
    #[inline]
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Returns the consecutive failure count of an endpoint.
    #[must_use]
    pub fn failures(&self, id: &EndpointId) -> u32 {
        self.index_of(id).map_or(0, |i| self.health[i].failures)
    }

    /// Picks the next candidate endpoint.
    #[must_use]
    pub fn next(&self, now: Instant) -> Selection {
        let len = self.endpoints.len();

        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            if self.health[index].is_available(now) {
                return Selection::Ready(self.endpoints[index].clone());
            }
        }

        let retry_at = self
            .health
            .iter()
            .filter_map(|h| h.backoff_until)
            .min()
            .unwrap_or(now);

        debug!(
            wait_ms = retry_at.saturating_duration_since(now).as_millis() as u64,
            "All endpoints backed off"
        );

        Selection::Exhausted { retry_at }
    }

    /// Records the outcome of an attempt against an endpoint.
    pub fn report(&mut self, id: &EndpointId, outcome: Outcome, now: Instant) {
        let Some(index) = self.index_of(id) else {
            debug!(endpoint = %id, "Outcome reported for unknown endpoint");
            return;
        };

        match outcome {
            Outcome::Success => {
                self.health[index] = EndpointHealth::default();
                self.cursor = index;
            }
            Outcome::Failure => {
                let failures = self.health[index].failures.saturating_add(1);
                let backoff = self.backoff_for(failures);
                self.health[index] = EndpointHealth {
                    failures,
                    backoff_until: Some(now + backoff),
                };

                if self.cursor == index {
                    self.cursor = (index + 1) % self.endpoints.len();
                }

                info!(
                    endpoint = %id,
                    failures,
                    backoff_ms = backoff.as_millis() as u64,
                    "Endpoint demoted"
                );
            }
        }
    }

    /// Ends every backoff window. Failure counts and the cursor are kept, so
    /// the next failure still backs off from where it left.
    pub fn release_all(&mut self) {
        let released = self
            .health
            .iter_mut()
            .filter_map(|h| h.backoff_until.take())
            .count();
        if released > 0 {
            debug!(released, "Endpoint backoff windows released");
        }
    }

    /// Backoff after `failures` consecutive failures: `base * 2^(failures-1)`,
    /// capped.
    #[must_use]
    pub fn backoff_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(failures - 1);
        self.base.saturating_mul(multiplier).min(self.cap)
    }

    fn index_of(&self, id: &EndpointId) -> Option<usize> {
        self.endpoints.iter().position(|e| &e.id() == id)
    }
}

// ============================================================================
// Tests
// ============================================================================
