//! Connection supervisor.
//!
//! Owns the [`ConnectionState`] machine, the reconnect schedule and the
//! handle to the current physical connection. It makes no I/O calls itself:
//! the broker's processor asks it what to do next and reports outcomes back.
//!
//! # States
//!
//! ```text
//! Disconnected ──► Connecting ──► HandshakingAuth ──► Authenticated
//!      ▲               │    │              │                 │
//!      │               │    └──────────────┼──────────────►──┤ cached key
//!      │               └───────────────────┴──► Failed ◄─────┘
//!      │                                          │
//!      └──── offline / shutdown    backoff elapsed ──► Connecting
//! ```
//!
//! With a cached key the attempt stays in `Connecting` until the welcome.
//! A fresh key keeps it in `HandshakingAuth` through persistence and the
//! welcome.
//!
//! Each attempt gets a fresh epoch; events carrying an older epoch are
//! stale and must be ignored by the caller.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::AuthKey;
use crate::transport::{Connection, Endpoint, EndpointPool, Outcome, Selection};

use super::monitor::NetworkTransition;
use super::state::{ConnectionState, FailureReason};

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Reconnect backoff: `base * 2^retry`, capped, with proportional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound before jitter.
    pub cap: Duration,
    /// Jitter fraction in `[0, 1)`, applied as `±jitter`.
    pub jitter: f64,
    /// Delay before reconnecting after connectivity returns.
    pub debounce: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.2,
            debounce: Duration::from_millis(250),
        }
    }
}

impl ReconnectPolicy {
    /// Returns the un-jittered delay for a retry count.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Returns the delay for a retry count with jitter applied.
    pub fn jittered<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let delay = self.delay(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }

        let factor = rng.random_range(-jitter..=jitter);
        delay.mul_f64(1.0 + factor)
    }
}

// ============================================================================
// Attempt
// ============================================================================

/// What the processor should do when an attempt is due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Dial this endpoint; its events carry `epoch`.
    Dial {
        /// Epoch of the new attempt.
        epoch: u64,
        /// Endpoint to dial.
        endpoint: Endpoint,
    },
    /// Every endpoint is backed off until this instant.
    Wait(Instant),
    /// Offline, stopped or already connecting.
    Blocked,
}

// ============================================================================
// Supervisor
// ============================================================================

/// The attempt currently owning the connection.
#[derive(Debug)]
struct Active {
    epoch: u64,
    endpoint: Endpoint,
    connection: Option<Connection>,
    key: Option<AuthKey>,
    welcome_deadline: Option<Instant>,
}

/// Drives the single logical connection.
#[derive(Debug)]
pub struct Supervisor {
    state: ConnectionState,
    pool: EndpointPool,
    policy: ReconnectPolicy,
    retry: u32,
    epoch: u64,
    active: Option<Active>,
    wake_at: Option<Instant>,
    offline: bool,
    stopped: bool,
}

impl Supervisor {
    /// Creates a supervisor in [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn new(pool: EndpointPool, policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            pool,
            policy,
            retry: 0,
            epoch: 0,
            active: None,
            wake_at: None,
            offline: false,
            stopped: false,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Returns the consecutive failure count.
    #[inline]
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry
    }

    /// Returns the epoch of the most recent attempt.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns the endpoint pool.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    /// Returns `true` if `epoch` belongs to the live attempt.
    #[inline]
    #[must_use]
    pub fn is_current(&self, epoch: u64) -> bool {
        self.active.as_ref().is_some_and(|a| a.epoch == epoch)
    }

    /// Returns the endpoint of the live attempt.
    #[must_use]
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.active.as_ref().map(|a| &a.endpoint)
    }

    /// Returns the connection of the live attempt once the link is up.
    #[must_use]
    pub fn connection(&self) -> Option<&Connection> {
        self.active.as_ref().and_then(|a| a.connection.as_ref())
    }

    /// Returns the key announced on the live connection.
    #[must_use]
    pub fn session_key(&self) -> Option<&AuthKey> {
        self.active.as_ref().and_then(|a| a.key.as_ref())
    }

    /// Returns when the next attempt is due.
    #[inline]
    #[must_use]
    pub fn wake_at(&self) -> Option<Instant> {
        self.wake_at
    }

    /// Returns the deadline for the server's `session.welcome`.
    #[must_use]
    pub fn welcome_deadline(&self) -> Option<Instant> {
        self.active.as_ref().and_then(|a| a.welcome_deadline)
    }

    /// Returns `true` if an attempt is due at `now`.
    #[inline]
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.wake_at.is_some_and(|at| at <= now)
    }

    /// Returns `true` if the welcome deadline has passed.
    #[must_use]
    pub fn welcome_expired(&self, now: Instant) -> bool {
        self.welcome_deadline().is_some_and(|at| at <= now)
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    /// Schedules the first attempt.
    pub fn start(&mut self, now: Instant) {
        if !self.offline && !self.stopped {
            self.wake_at = Some(now);
        }
    }

    /// Requests an immediate attempt when idle. Returns `false` when the
    /// request has no effect.
    pub fn reconnect(&mut self, now: Instant) -> bool {
        if self.stopped || self.offline || self.active.is_some() {
            return false;
        }
        self.wake_at = Some(now);
        true
    }

    /// Starts an attempt if one is possible.
    pub fn begin_attempt(&mut self, now: Instant) -> Attempt {
        if self.stopped || self.offline || self.active.is_some() {
            self.wake_at = None;
            return Attempt::Blocked;
        }

        match self.pool.next(now) {
            Selection::Ready(endpoint) => {
                self.epoch += 1;
                self.wake_at = None;
                self.active = Some(Active {
                    epoch: self.epoch,
                    endpoint: endpoint.clone(),
                    connection: None,
                    key: None,
                    welcome_deadline: None,
                });
                self.state = ConnectionState::Connecting;

                info!(epoch = self.epoch, endpoint = %endpoint, retry = self.retry, "Connecting");
                Attempt::Dial {
                    epoch: self.epoch,
                    endpoint,
                }
            }
            Selection::Exhausted { retry_at } => {
                debug!(wait_ms = retry_at.saturating_duration_since(now).as_millis() as u64, "All endpoints backed off");
                self.wake_at = Some(retry_at);
                Attempt::Wait(retry_at)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------------

    /// Records the established link of the live attempt.
    pub fn link_up(&mut self, connection: Connection) {
        match self.active.as_mut() {
            Some(active) if active.epoch == connection.epoch() => active.connection = Some(connection),
            _ => connection.shutdown(),
        }
    }

    /// Records that `key` was announced and the server's welcome is awaited.
    /// The published state is left as is.
    pub fn await_welcome(&mut self, key: AuthKey, deadline: Instant) {
        if let Some(active) = self.active.as_mut() {
            active.key = Some(key);
            active.welcome_deadline = Some(deadline);
        }
    }

    /// Records that a key exchange is running.
    pub fn handshaking(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.key = None;
            active.welcome_deadline = None;
            self.state = ConnectionState::HandshakingAuth;
        }
    }

    /// Records an open session. Returns the session's endpoint.
    pub fn authenticated(&mut self, salt: u64, now: Instant) -> Option<Endpoint> {
        let active = self.active.as_mut()?;
        active.welcome_deadline = None;

        let endpoint = active.endpoint.clone();
        self.pool.report(&endpoint.id(), Outcome::Success, now);
        self.retry = 0;
        self.state = ConnectionState::Authenticated {
            endpoint: endpoint.clone(),
            salt,
        };

        info!(epoch = active.epoch, endpoint = %endpoint, "Session authenticated");
        Some(endpoint)
    }

    /// Records a failed attempt or a lost session and schedules the retry.
    ///
    /// Returns the end of the backoff window.
    pub fn fail<R: Rng + ?Sized>(&mut self, reason: FailureReason, now: Instant, rng: &mut R) -> Instant {
        if let Some(active) = self.active.take() {
            if let Some(connection) = &active.connection {
                connection.shutdown();
            }
            self.pool.report(&active.endpoint.id(), Outcome::Failure, now);
        }

        let delay = self.policy.jittered(self.retry, rng);
        self.retry = self.retry.saturating_add(1);
        let backoff_until = now + delay;

        warn!(
            reason = %reason,
            retry = self.retry,
            backoff_ms = delay.as_millis() as u64,
            "Connection failed"
        );

        self.state = ConnectionState::Failed {
            reason,
            backoff_until,
        };
        self.wake_at = (!self.offline && !self.stopped).then_some(backoff_until);

        backoff_until
    }

    /// Drops the connection without failure accounting.
    pub fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            if let Some(connection) = &active.connection {
                connection.shutdown();
            }
            debug!(epoch = active.epoch, "Connection dropped");
        }
        self.state = ConnectionState::Disconnected;
        self.wake_at = None;
    }

    /// Applies a network transition. Returns `true` if the live connection
    /// must be torn down.
    pub fn on_network(&mut self, transition: NetworkTransition, now: Instant) -> bool {
        match transition {
            NetworkTransition::CameOnline => {
                self.offline = false;
                self.retry = 0;
                self.pool.release_all();
                if self.active.is_none() && !self.stopped {
                    self.wake_at = Some(now + self.policy.debounce);
                    debug!(debounce_ms = self.policy.debounce.as_millis() as u64, "Reconnect scheduled");
                }
                false
            }
            NetworkTransition::WentOffline => {
                self.offline = true;
                self.wake_at = None;
                self.active.is_some()
            }
            NetworkTransition::TransportChanged => {
                self.retry = 0;
                false
            }
            NetworkTransition::Unchanged => false,
        }
    }

    /// Drops the connection and refuses further attempts.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.disconnect();
    }
}

// ============================================================================
// Tests
// ============================================================================
