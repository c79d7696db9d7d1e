//! Request correlation and completion.
//!
//! Every submitted request gets a [`CorrelationId`] from a broker-scoped
//! [`IdSequence`] and is resolved exactly once: by a response, a server
//! error, a timeout, cancellation, retry exhaustion or shutdown. Resolution
//! removes the entry, so a late response for the same id is ignored.
//!
//! # Lifecycle
//!
//! ```text
//! submit ──► Queued ──► InFlight ──► resolved
//!              ▲           │
//!              └─ reclaim ─┘ (connection lost, attempts remain)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::protocol::{Request, Response};

// ============================================================================
// IdSequence
// ============================================================================

/// Monotonic correlation id source shared by one broker's handles.
///
/// Starts at 1 and never repeats for the lifetime of the broker.
#[derive(Debug, Clone)]
pub struct IdSequence(Arc<AtomicU64>);

impl IdSequence {
    /// Creates a sequence whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(1)))
    }

    /// Returns the next id.
    #[inline]
    #[must_use]
    pub fn next(&self) -> CorrelationId {
        CorrelationId::new(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Completion
// ============================================================================

/// Callback completion.
pub type Callback = Box<dyn FnOnce(Result<Response>) + Send + 'static>;

/// Where a request's result goes.
pub enum Completion {
    /// Awaited through a [`crate::PendingCall`].
    Channel(oneshot::Sender<Result<Response>>),
    /// Invoked once with the result.
    Callback(Callback),
}

impl Completion {
    /// Delivers the result. A dropped receiver is not an error.
    pub fn complete(self, result: Result<Response>) {
        match self {
            Self::Channel(tx) => {
                let _ = tx.send(result);
            }
            Self::Callback(callback) => callback(result),
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(_) => f.write_str("Completion::Channel"),
            Self::Callback(_) => f.write_str("Completion::Callback"),
        }
    }
}

// ============================================================================
// PendingRequest
// ============================================================================

/// Where a pending request currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting in the outbound queue.
    Queued,
    /// Written to the connection of this epoch.
    InFlight {
        /// Connection epoch.
        epoch: u64,
    },
}

/// A request that has not been resolved yet.
#[derive(Debug)]
pub struct PendingRequest {
    id: CorrelationId,
    request: Request,
    completion: Completion,
    submitted_at: Instant,
    timeout: Duration,
    max_attempts: u32,
    attempts: u32,
    phase: Phase,
}

impl PendingRequest {
    /// Returns the correlation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Returns the request.
    #[inline]
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns how many times the request has been transmitted.
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the current phase.
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the instant after which the request times out.
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.submitted_at + self.timeout
    }
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Tracks pending requests by correlation id.
#[derive(Debug)]
pub struct Multiplexer {
    pending: FxHashMap<CorrelationId, PendingRequest>,
    /// In-flight ids in transmission order.
    in_flight: Vec<CorrelationId>,
    max_pending: usize,
    default_timeout: Duration,
    default_max_attempts: u32,
}

impl Multiplexer {
    /// Creates an empty multiplexer.
    #[must_use]
    pub fn new(max_pending: usize, default_timeout: Duration, default_max_attempts: u32) -> Self {
        Self {
            pending: FxHashMap::default(),
            in_flight: Vec::new(),
            max_pending,
            default_timeout,
            default_max_attempts: default_max_attempts.max(1),
        }
    }

    /// Registers a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] when the pending limit is reached; the
    /// completion has then already been resolved with the same error.
    pub fn submit(
        &mut self,
        id: CorrelationId,
        request: Request,
        completion: Completion,
        now: Instant,
    ) -> Result<()> {
        let pending = self.pending.len();
        if pending >= self.max_pending {
            warn!(%id, pending, max = self.max_pending, "Request rejected, too many pending");
            completion.complete(Err(Error::Busy {
                pending,
                max: self.max_pending,
            }));
            return Err(Error::Busy {
                pending,
                max: self.max_pending,
            });
        }

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let max_attempts = request
            .max_attempts
            .unwrap_or(self.default_max_attempts)
            .max(1);

        trace!(%id, type_tag = request.type_tag, timeout_ms = timeout.as_millis() as u64, "Request submitted");
        self.pending.insert(
            id,
            PendingRequest {
                id,
                request,
                completion,
                submitted_at: now,
                timeout,
                max_attempts,
                attempts: 0,
                phase: Phase::Queued,
            },
        );

        Ok(())
    }

    /// Records a transmission on the connection of `epoch` and returns the
    /// request to encode. `None` if the id is no longer pending.
    pub fn mark_in_flight(&mut self, id: CorrelationId, epoch: u64) -> Option<&Request> {
        let entry = self.pending.get_mut(&id)?;
        entry.attempts += 1;
        if !matches!(entry.phase, Phase::InFlight { .. }) {
            self.in_flight.push(id);
        }
        entry.phase = Phase::InFlight { epoch };
        Some(&entry.request)
    }

    /// Reclaims in-flight requests after the connection was lost.
    ///
    /// Requests with attempts left are returned in transmission order for
    /// requeueing; the rest resolve with [`Error::MaxRetriesExceeded`].
    pub fn reclaim_in_flight(&mut self) -> Vec<CorrelationId> {
        let mut requeue = Vec::with_capacity(self.in_flight.len());

        for id in std::mem::take(&mut self.in_flight) {
            let Some(entry) = self.pending.get_mut(&id) else {
                continue;
            };

            if entry.attempts >= entry.max_attempts {
                let attempts = entry.attempts;
                if let Some(entry) = self.pending.remove(&id) {
                    warn!(%id, attempts, "Request out of attempts");
                    entry
                        .completion
                        .complete(Err(Error::max_retries_exceeded(id, attempts)));
                }
            } else {
                entry.phase = Phase::Queued;
                requeue.push(id);
            }
        }

        if !requeue.is_empty() {
            debug!(count = requeue.len(), "In-flight requests reclaimed");
        }
        requeue
    }

    /// Resolves a request with a response. Returns `false` for an unknown or
    /// already resolved id.
    pub fn on_response(&mut self, id: CorrelationId, response: Response) -> bool {
        self.resolve(id, Ok(response))
    }

    /// Resolves a request with an error. Returns `false` for an unknown or
    /// already resolved id.
    pub fn on_failure(&mut self, id: CorrelationId, error: Error) -> bool {
        self.resolve(id, Err(error))
    }

    /// Cancels a request, resolving it with [`Error::Cancelled`].
    pub fn cancel(&mut self, id: CorrelationId) -> bool {
        let cancelled = self.resolve(id, Err(Error::Cancelled));
        if cancelled {
            debug!(%id, "Request cancelled");
        }
        cancelled
    }

    /// Resolves every request whose deadline has passed with
    /// [`Error::RequestTimeout`]. Returns the expired ids so the caller can
    /// drop them from its outbound queue.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<CorrelationId> {
        let expired: Vec<(CorrelationId, Duration)> = self
            .pending
            .values()
            .filter(|entry| entry.deadline() <= now)
            .map(|entry| (entry.id, entry.timeout))
            .collect();

        for (id, timeout) in &expired {
            warn!(%id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
            self.resolve(*id, Err(Error::request_timeout(*id, timeout.as_millis() as u64)));
        }

        expired.into_iter().map(|(id, _)| id).collect()
    }

    /// Resolves every pending request with [`Error::Cancelled`].
    pub fn cancel_all(&mut self) -> usize {
        self.in_flight.clear();
        let drained: Vec<_> = self.pending.drain().collect();
        let count = drained.len();

        for (_, entry) in drained {
            entry.completion.complete(Err(Error::Cancelled));
        }

        count
    }

    /// Returns a pending request.
    #[inline]
    #[must_use]
    pub fn get(&self, id: CorrelationId) -> Option<&PendingRequest> {
        self.pending.get(&id)
    }

    /// Returns `true` if `id` is still pending.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: CorrelationId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns the in-flight ids in transmission order.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> &[CorrelationId] {
        &self.in_flight
    }

    fn resolve(&mut self, id: CorrelationId, result: Result<Response>) -> bool {
        let Some(entry) = self.pending.remove(&id) else {
            trace!(%id, "Result for unknown request ignored");
            return false;
        };

        if matches!(entry.phase, Phase::InFlight { .. }) {
            self.in_flight.retain(|in_flight| *in_flight != id);
        }

        entry.completion.complete(result);
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
