//! Broker handle.
//!
//! The [`Broker`] is a cheap, cloneable handle to one processor task. Every
//! method only enqueues an event, so none of them block or wait on the
//! network.
//!
//! # Example
//!
//! ```no_run
//! use session_broker::{Broker, Request};
//! use session_broker::testing::PassthroughCrypto;
//!
//! # async fn example() -> session_broker::Result<()> {
//! let broker = Broker::builder()
//!     .endpoint("wss://front1.example.com")
//!     .endpoint("wss://front2.example.com")
//!     .crypto(PassthroughCrypto::new())
//!     .build()?;
//!
//! let response = broker.request(Request::new(0x10, b"ping".to_vec()))?.await?;
//! println!("{} bytes", response.payload.len());
//!
//! broker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, info, info_span};

use crate::auth::{AuthKeyManager, CryptoProvider, KeyStorage};
use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::protocol::{Request, Response};
use crate::session::{Completion, ConnectionState, IdSequence, NetworkState, Supervisor};
use crate::transport::{EndpointPool, NetworkProvider};

use super::builder::BrokerBuilder;
use super::call::PendingCall;
use super::context::SessionContext;
use super::event::Event;
use super::listener::SessionListener;
use super::options::BrokerConfig;
use super::processor::Processor;

// ============================================================================
// Types
// ============================================================================

/// Collaborators a broker is started with.
pub(crate) struct BrokerParts {
    pub config: BrokerConfig,
    pub context: SessionContext,
    pub network: Arc<dyn NetworkProvider>,
    pub storage: Arc<dyn KeyStorage>,
    pub crypto: Arc<dyn CryptoProvider>,
    pub listener: Arc<dyn SessionListener>,
}

/// Shared state behind every handle.
pub(crate) struct BrokerInner {
    /// Identity of this broker.
    context: SessionContext,
    /// Validated configuration.
    config: Arc<BrokerConfig>,
    /// Processor mailbox.
    events: mpsc::UnboundedSender<Event>,
    /// Correlation id source.
    ids: IdSequence,
    /// Snapshot published by the processor.
    state: Arc<RwLock<ConnectionState>>,
    /// Set once shutdown completed.
    closed: AtomicBool,
}

impl Drop for BrokerInner {
    fn drop(&mut self) {
        let (ack, _) = oneshot::channel();
        let _ = self.events.send(Event::Shutdown(ack));
    }
}

// ============================================================================
// Broker
// ============================================================================

/// Client-side session broker.
///
/// Owns one logical connection to a set of equivalent server endpoints,
/// establishes and caches auth keys, and multiplexes requests over the
/// connection, surviving reconnects. Dropping the last handle shuts the
/// broker down.
#[derive(Clone)]
pub struct Broker {
    pub(crate) inner: Arc<BrokerInner>,
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("instance", &self.inner.context.instance)
            .field("state", &self.state().name())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// Starts the processor task.
    pub(crate) fn start(parts: BrokerParts) -> Result<Self> {
        let BrokerParts {
            config,
            context,
            network,
            storage,
            crypto,
            listener,
        } = parts;

        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::config("Broker must be built inside a Tokio runtime"));
        }

        let config = Arc::new(config);
        let pool = EndpointPool::new(
            config.endpoints.clone(),
            config.endpoint_backoff_base,
            config.endpoint_backoff_cap,
        )?;
        let supervisor = Supervisor::new(pool, config.reconnect_policy());

        let mut auth = AuthKeyManager::new(
            storage,
            Arc::clone(&crypto),
            config.handshake_attempts,
            config.handshake_timeout,
        );
        let keys = auth.load(&config.endpoints);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let processor = Processor::new(
            context.clone(),
            Arc::clone(&config),
            supervisor,
            auth,
            network,
            crypto,
            listener,
            events_tx.clone(),
            Arc::clone(&state),
        );

        let span = info_span!("broker", instance = %context.instance);
        tokio::spawn(processor.run(events_rx).instrument(span));

        info!(
            instance = %context.instance,
            endpoints = config.endpoints.len(),
            cached_keys = keys,
            "Broker started"
        );

        Ok(Self {
            inner: Arc::new(BrokerInner {
                context,
                config,
                events: events_tx,
                ids: IdSequence::new(),
                state,
                closed: AtomicBool::new(false),
            }),
        })
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Submits a request and returns a future for its result.
    ///
    /// Requests submitted before a session is open are queued and sent, in
    /// submission order, once one is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokerClosed`] after shutdown.
    pub fn request(&self, request: Request) -> Result<PendingCall> {
        let id = self.inner.ids.next();
        let (tx, rx) = oneshot::channel();

        self.send(Event::Submit {
            id,
            request,
            completion: Completion::Channel(tx),
        })?;

        Ok(PendingCall::new(id, rx, self.inner.events.clone()))
    }

    /// Submits a request whose result is delivered to `callback`.
    ///
    /// The callback runs exactly once on the broker's processor task, unless
    /// this returns an error, in which case it never runs. A request that
    /// lands behind another handle's shutdown is completed with
    /// [`Error::BrokerClosed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokerClosed`] after shutdown.
    pub fn request_with<F>(&self, request: Request, callback: F) -> Result<CorrelationId>
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        let id = self.inner.ids.next();

        self.send(Event::Submit {
            id,
            request,
            completion: Completion::Callback(Box::new(callback)),
        })?;

        Ok(id)
    }

    /// Cancels a pending request; it resolves with [`Error::Cancelled`].
    ///
    /// Unknown or already resolved ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokerClosed`] after shutdown.
    pub fn cancel(&self, id: CorrelationId) -> Result<()> {
        self.send(Event::Cancel(id))
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Reports platform connectivity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokerClosed`] after shutdown.
    pub fn on_network_changed(&self, state: NetworkState) -> Result<()> {
        self.send(Event::NetworkChanged(state))
    }

    /// Starts an attempt now if the broker is idle or backing off.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokerClosed`] after shutdown.
    pub fn reconnect(&self) -> Result<()> {
        self.send(Event::Reconnect)
    }

    /// Returns the last published connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.read().clone()
    }

    /// Returns this broker's identity.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.inner.context
    }

    /// Returns the configuration the broker runs with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Returns `true` once the broker has shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.events.is_closed()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Cancels every pending request, closes the connection and stops the
    /// processor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokerClosed`] if already shut down.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Event::Shutdown(ack))?;

        let result = done.await.map_err(|_| Error::BrokerClosed);
        self.inner.closed.store(true, Ordering::Release);
        result
    }

    fn send(&self, event: Event) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::BrokerClosed);
        }
        self.inner
            .events
            .send(event)
            .map_err(|_| Error::BrokerClosed)
    }
}
