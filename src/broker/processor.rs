//! The broker's sequential processor.
//!
//! One tokio task owns every piece of mutable session state and consumes a
//! single ordered mailbox. Caller commands, dial results, inbound frames,
//! link closures and key persistence results all arrive there as [`Event`]s;
//! I/O results carry the epoch of the attempt that produced them and are
//! dropped when that attempt is no longer current.
//!
//! # Event Loop
//!
//! The task handles:
//!
//! - Mailbox events, in arrival order
//! - A periodic tick that expires timed-out requests
//! - A timer for the next scheduled attempt or handshake deadline
//!
//! Blocking key storage work runs on worker threads, chained so jobs
//! complete in the order they were issued.
//!
//! After shutdown the mailbox is closed and drained: requests that were
//! already enqueued resolve with [`Error::BrokerClosed`], later sends fail.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, error, info, trace, warn};

use crate::auth::{AuthKey, AuthKeyManager, CryptoProvider, HandshakeProgress, KeyStatus};
use crate::error::{Error, Result};
use crate::identifiers::{CorrelationId, EndpointId, KeyId, ServerSessionId};
use crate::protocol::{Frame, Message, Request, Response, Update};
use crate::session::{
    Attempt, Completion, ConnectionState, FailureReason, Multiplexer, NetworkMonitor,
    NetworkState, OutboundQueue, Supervisor,
};
use crate::transport::{Connection, Endpoint, Link, LinkEvent, NetworkProvider};

use super::context::SessionContext;
use super::event::Event;
use super::listener::SessionListener;
use super::options::BrokerConfig;

// ============================================================================
// Processor
// ============================================================================

/// State owned by the processor task.
pub(crate) struct Processor {
    pub(crate) ctx: SessionContext,
    pub(crate) config: Arc<BrokerConfig>,
    pub(crate) supervisor: Supervisor,
    pub(crate) auth: AuthKeyManager,
    pub(crate) mux: Multiplexer,
    pub(crate) queue: OutboundQueue,
    pub(crate) monitor: NetworkMonitor,
    pub(crate) network: Arc<dyn NetworkProvider>,
    pub(crate) crypto: Arc<dyn CryptoProvider>,
    pub(crate) listener: Arc<dyn SessionListener>,
    /// Sender handed to I/O workers.
    pub(crate) events: mpsc::UnboundedSender<Event>,
    /// Snapshot read by [`crate::Broker::state`].
    pub(crate) snapshot: Arc<RwLock<ConnectionState>>,
    pub(crate) published: ConnectionState,
    /// Last server session seen per endpoint.
    pub(crate) sessions: FxHashMap<EndpointId, ServerSessionId>,
    /// Set when the live attempt derived its key through a handshake.
    pub(crate) fresh_key: bool,
    /// Tail of the storage job chain.
    pub(crate) storage_jobs: Option<JoinHandle<()>>,
    pub(crate) rng: StdRng,
}

impl Processor {
    /// Creates a processor with nothing pending.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ctx: SessionContext,
        config: Arc<BrokerConfig>,
        supervisor: Supervisor,
        auth: AuthKeyManager,
        network: Arc<dyn NetworkProvider>,
        crypto: Arc<dyn CryptoProvider>,
        listener: Arc<dyn SessionListener>,
        events: mpsc::UnboundedSender<Event>,
        snapshot: Arc<RwLock<ConnectionState>>,
    ) -> Self {
        let mux = Multiplexer::new(config.max_pending, config.request_timeout, config.max_attempts);

        Self {
            ctx,
            config,
            supervisor,
            auth,
            mux,
            queue: OutboundQueue::new(),
            monitor: NetworkMonitor::new(),
            network,
            crypto,
            listener,
            events,
            snapshot,
            published: ConnectionState::Disconnected,
            sessions: FxHashMap::default(),
            fresh_key: false,
            storage_jobs: None,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Runs until shutdown.
    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        self.supervisor.start(Instant::now());

        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = self.next_wake();

            tokio::select! {
                // Commands and I/O results
                event = events.recv() => {
                    let Some(event) = event else {
                        self.shutdown();
                        break;
                    };
                    if !self.handle(event) {
                        break;
                    }
                }

                // Timeout sweep
                _ = tick.tick() => self.sweep(Instant::now()),

                // Scheduled attempt or handshake deadline
                () = sleep_until(wake) => self.on_timer(Instant::now()),
            }

            self.publish();
        }

        self.close_mailbox(&mut events);
        debug!(instance = %self.ctx.instance, "Processor terminated");
    }

    /// Handles one event. Returns `false` once the broker has stopped.
    fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Submit {
                id,
                request,
                completion,
            } => self.submit(id, request, completion),

            Event::Cancel(id) => {
                if self.mux.cancel(id) {
                    self.queue.remove(id);
                }
            }

            Event::NetworkChanged(state) => self.on_network(state),

            Event::Reconnect => {
                if self.supervisor.reconnect(Instant::now()) {
                    debug!("Reconnect requested");
                }
            }

            Event::Shutdown(ack) => {
                self.shutdown();
                let _ = ack.send(());
                return false;
            }

            Event::Connected { epoch, result } => self.on_connected(epoch, result),

            Event::Link(LinkEvent::Received { epoch, bytes }) => self.on_frame(epoch, &bytes),

            Event::Link(LinkEvent::Closed { epoch, error }) => {
                if self.supervisor.is_current(epoch) {
                    self.fail(error.unwrap_or_else(|| Error::transport("connection closed by server")));
                } else {
                    trace!(epoch, "Stale link closure ignored");
                }
            }

            Event::KeyPersisted { epoch, key, result } => self.on_key_persisted(epoch, key, result),
        }

        true
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    fn submit(&mut self, id: CorrelationId, request: Request, completion: Completion) {
        if self.mux.submit(id, request, completion, Instant::now()).is_err() {
            return;
        }

        if self.supervisor.state().is_authenticated() {
            self.transmit(id);
        } else {
            trace!(%id, state = self.supervisor.state().name(), "Request queued");
            self.queue.push_back(id);
        }
    }

    /// Writes one pending request. Returns `false` if the connection failed.
    fn transmit(&mut self, id: CorrelationId) -> bool {
        let Some(epoch) = self.supervisor.connection().map(Connection::epoch) else {
            self.queue.push_back(id);
            return true;
        };

        let Some(request) = self.mux.mark_in_flight(id, epoch) else {
            return true;
        };
        let message = Message::Rpc {
            id,
            type_tag: request.type_tag,
            payload: request.payload.clone(),
        };

        if let Err(e) = self.send_sealed(&message) {
            self.fail(e);
            return false;
        }

        trace!(%id, epoch, "Request sent");
        true
    }

    /// Expires timed-out requests and drops them from the outbound queue.
    fn sweep(&mut self, now: Instant) {
        let expired = self.mux.expire_stale(now);
        if expired.is_empty() {
            return;
        }

        for id in &expired {
            self.queue.remove(*id);
        }
        debug!(
            expired = expired.len(),
            pending = self.mux.len(),
            queued = self.queue.len(),
            "Requests expired"
        );
    }

    /// Transmits everything queued, oldest first.
    fn flush(&mut self) {
        let ids = self.queue.drain();
        if ids.is_empty() {
            return;
        }
        debug!(count = ids.len(), "Flushing outbound queue");

        let mut remaining = ids.into_iter();
        while let Some(id) = remaining.next() {
            if !self.mux.contains(id) {
                continue;
            }
            if !self.transmit(id) {
                for id in remaining.by_ref() {
                    self.queue.push_back(id);
                }
                break;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    fn on_timer(&mut self, now: Instant) {
        if let Some(result) = self.auth.poll_timeout(now) {
            match result {
                Ok(payload) => self.send_or_fail(Frame::HandshakeInit { payload }),
                Err(e) => self.fail(e),
            }
        }

        if self.supervisor.welcome_expired(now)
            && let Some(endpoint) = self.supervisor.endpoint()
        {
            let error = Error::connect_timeout(
                endpoint.id(),
                self.config.handshake_timeout.as_millis() as u64,
            );
            self.fail(error);
        }

        if self.supervisor.is_due(now) {
            self.attempt(now);
        }
    }

    fn attempt(&mut self, now: Instant) {
        let Attempt::Dial { epoch, endpoint } = self.supervisor.begin_attempt(now) else {
            return;
        };

        let network = Arc::clone(&self.network);
        let events = self.events.clone();
        let timeout = endpoint.connect_timeout().unwrap_or(self.config.connect_timeout);

        tokio::spawn(
            async move {
                let result = match tokio::time::timeout(timeout, network.connect(&endpoint)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::connect_timeout(endpoint.id(), timeout.as_millis() as u64)),
                };
                let _ = events.send(Event::Connected { epoch, result });
            }
            .in_current_span(),
        );
    }

    fn on_connected(&mut self, epoch: u64, result: Result<Link>) {
        if !self.supervisor.is_current(epoch) {
            trace!(epoch, "Stale dial result ignored");
            return;
        }

        match result {
            Ok(link) => {
                debug!(epoch, "Link established");
                let connection = Connection::spawn(epoch, link, self.events.clone());
                self.supervisor.link_up(connection);
                self.fresh_key = false;
                self.open_session(Instant::now());
            }
            Err(e) => self.fail(e),
        }
    }

    /// Announces the cached key, or starts a handshake if there is none.
    fn open_session(&mut self, now: Instant) {
        let Some(endpoint) = self.supervisor.endpoint().cloned() else {
            return;
        };

        match self.auth.ensure_key(&endpoint, now) {
            Ok(KeyStatus::Ready(key)) => self.send_hello(key, now),
            Ok(KeyStatus::Exchanging(payload)) => {
                info!(endpoint = %endpoint, "Negotiating auth key");
                self.supervisor.handshaking();
                self.send_or_fail(Frame::HandshakeInit { payload });
            }
            Err(e) => self.fail(e),
        }
    }

    fn send_hello(&mut self, key: AuthKey, now: Instant) {
        let frame = Frame::Hello {
            key_id: key.key_id(),
            api_major: self.ctx.api_layer.0,
            api_minor: self.ctx.api_layer.1,
        };
        self.supervisor
            .await_welcome(key, now + self.config.handshake_timeout);
        self.send_or_fail(frame);
    }

    fn persist(&mut self, epoch: u64, key: AuthKey) {
        self.fresh_key = true;

        let storage = self.auth.storage();
        let events = self.events.clone();
        self.storage_job(move || {
            let result = storage.save(key.endpoint(), &key);
            let _ = events.send(Event::KeyPersisted { epoch, key, result });
        });
    }

    fn remove_stored_key(&mut self, endpoint: EndpointId) {
        let storage = self.auth.storage();
        self.storage_job(move || match storage.invalidate(&endpoint) {
            Ok(()) => debug!(endpoint = %endpoint, "Stored auth key removed"),
            Err(e) => warn!(endpoint = %endpoint, error = %e, "Failed to remove stored auth key"),
        });
    }

    /// Runs blocking storage work on a worker once every earlier job is done.
    fn storage_job<F>(&mut self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let previous = self.storage_jobs.take();
        let handle = tokio::spawn(
            async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    error!(error = %e, "Storage job panicked");
                }
            }
            .in_current_span(),
        );
        self.storage_jobs = Some(handle);
    }

    fn on_key_persisted(&mut self, epoch: u64, key: AuthKey, result: Result<()>) {
        let outcome = self.auth.on_persisted(key, result);

        if !self.supervisor.is_current(epoch) {
            trace!(epoch, "Key persisted for a stale attempt");
            return;
        }

        match outcome {
            Ok(key) => self.send_hello(key, Instant::now()),
            Err(e) => self.fail(e),
        }
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    fn on_frame(&mut self, epoch: u64, bytes: &[u8]) {
        if !self.supervisor.is_current(epoch) {
            trace!(epoch, "Stale frame ignored");
            return;
        }

        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        if self.config.log_frames {
            trace!(epoch, kind = frame.kind(), len = bytes.len(), "Frame received");
        }

        let now = Instant::now();
        match frame {
            Frame::HandshakeReply { payload } => match self.auth.on_reply(&payload, now) {
                Ok(HandshakeProgress::Send(payload)) => {
                    self.send_or_fail(Frame::HandshakeInit { payload });
                }
                Ok(HandshakeProgress::Derived(key)) => self.persist(epoch, key),
                Err(e) => self.fail(e),
            },

            Frame::HandshakeRejected { reason } => {
                let result = self.auth.on_rejected(&reason, now);
                if !matches!(result, Err(Error::ProtocolViolation { .. }))
                    && let Some(id) = self.supervisor.endpoint().map(Endpoint::id)
                {
                    self.remove_stored_key(id);
                }

                match result {
                    Ok(payload) => self.send_or_fail(Frame::HandshakeInit { payload }),
                    Err(e) => self.fail(e),
                }
            }

            Frame::Welcome { salt, session } => self.on_welcome(salt, session, now),

            Frame::UnknownAuthKey { key_id } => self.on_unknown_key(key_id, now),

            Frame::Sealed { key_id, data } => self.on_sealed(key_id, &data),

            other @ (Frame::HandshakeInit { .. } | Frame::Hello { .. }) => {
                self.fail(Error::protocol_violation(format!(
                    "unexpected {} from server",
                    other.kind()
                )));
            }
        }
    }

    fn on_welcome(&mut self, salt: u64, session: ServerSessionId, now: Instant) {
        if self.supervisor.welcome_deadline().is_none() {
            self.fail(Error::protocol_violation("unexpected session.welcome"));
            return;
        }

        let Some(endpoint) = self.supervisor.authenticated(salt, now) else {
            return;
        };

        let previous = self.sessions.insert(endpoint.id(), session);
        if previous != Some(session) {
            info!(endpoint = %endpoint, session = %session, "New server session");
            self.listener.on_new_session(&endpoint, session);
        }
        self.publish();

        if self.config.subscribe_updates
            && let Err(e) = self.send_sealed(&Message::Subscribe)
        {
            self.fail(e);
            return;
        }

        self.flush();
    }

    fn on_unknown_key(&mut self, key_id: KeyId, now: Instant) {
        if self.supervisor.welcome_deadline().is_none() {
            self.fail(Error::protocol_violation("unexpected session.unknownKey"));
            return;
        }
        if self.fresh_key {
            self.fail(Error::protocol_violation(
                "server refused a freshly negotiated auth key",
            ));
            return;
        }

        let Some(endpoint) = self.supervisor.endpoint().cloned() else {
            return;
        };

        warn!(endpoint = %endpoint, key_id = %key_id, "Server does not know auth key");
        if self.auth.invalidate(&endpoint.id()) {
            self.listener.on_auth_key_invalidated(&endpoint);
        }
        self.remove_stored_key(endpoint.id());

        self.open_session(now);
    }

    fn on_sealed(&mut self, key_id: KeyId, data: &[u8]) {
        let opened = match self.supervisor.session_key() {
            _ if !self.supervisor.state().is_authenticated() => {
                Err(Error::protocol_violation("sealed frame before session"))
            }
            Some(key) if key.key_id() == key_id => self.crypto.open(key, data),
            _ => Err(Error::protocol_violation(format!(
                "frame sealed with unknown key {key_id}"
            ))),
        };

        let message = match opened.and_then(|plaintext| Message::from_bytes(&plaintext)) {
            Ok(message) => message,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        match message {
            Message::RpcResult {
                id,
                type_tag,
                payload,
            } => {
                if !self.mux.on_response(id, Response::new(type_tag, payload)) {
                    debug!(%id, "Response for unknown request dropped");
                }
            }

            Message::RpcError { id, code, message } => {
                debug!(%id, code, message = %message, "Server error");
                self.mux.on_failure(id, Error::rpc(code, message));
            }

            Message::Push { type_tag, payload } => {
                trace!(type_tag, len = payload.len(), "Update received");
                self.listener.on_update(Update { type_tag, payload });
            }

            Message::Rpc { .. } | Message::Subscribe => {
                self.fail(Error::protocol_violation("client message received from server"));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    fn send_frame(&self, frame: &Frame) -> Result<()> {
        let connection = self
            .supervisor
            .connection()
            .ok_or_else(|| Error::transport("no connection"))?;

        if self.config.log_frames {
            trace!(epoch = connection.epoch(), kind = frame.kind(), "Frame sent");
        }
        connection.send(frame.encode()?)
    }

    fn send_sealed(&self, message: &Message) -> Result<()> {
        let key = self
            .supervisor
            .session_key()
            .ok_or_else(|| Error::protocol_violation("no session key"))?;

        let data = self.crypto.seal(key, &message.to_bytes()?)?;
        self.send_frame(&Frame::Sealed {
            key_id: key.key_id(),
            data,
        })
    }

    fn send_or_fail(&mut self, frame: Frame) {
        if let Err(e) = self.send_frame(&frame) {
            self.fail(e);
        }
    }

    // ------------------------------------------------------------------------
    // Failure, Network, Shutdown
    // ------------------------------------------------------------------------

    /// Drops the live attempt, requeues in-flight requests and schedules the
    /// next attempt.
    fn fail(&mut self, error: Error) {
        if matches!(error, Error::ProtocolViolation { .. }) {
            error!(error = %error, "Protocol violation");
        }

        self.auth.abort();
        self.fresh_key = false;
        self.reclaim();

        self.supervisor
            .fail(FailureReason::from(&error), Instant::now(), &mut self.rng);
    }

    fn on_network(&mut self, state: NetworkState) {
        let transition = self.monitor.observe(state);

        if self.supervisor.on_network(transition, Instant::now()) {
            info!("Network lost, dropping connection");
            self.auth.abort();
            self.fresh_key = false;
            self.reclaim();
            self.supervisor.disconnect();
        }
    }

    /// Moves in-flight requests back to the front of the queue.
    fn reclaim(&mut self) {
        let reclaimed = self.mux.reclaim_in_flight();
        self.queue.requeue_front(reclaimed);
    }

    fn shutdown(&mut self) {
        let cancelled = self.mux.cancel_all();
        self.queue.clear();
        self.auth.abort();
        self.supervisor.stop();
        self.publish();

        info!(cancelled, "Broker shut down");
    }

    /// Refuses further events and resolves whatever was enqueued behind the
    /// shutdown.
    fn close_mailbox(&self, events: &mut mpsc::UnboundedReceiver<Event>) {
        events.close();

        let mut refused = 0usize;
        while let Ok(event) = events.try_recv() {
            match event {
                Event::Submit { completion, .. } => {
                    completion.complete(Err(Error::BrokerClosed));
                    refused += 1;
                }
                Event::Shutdown(ack) => {
                    let _ = ack.send(());
                }
                _ => {}
            }
        }

        if refused > 0 {
            debug!(refused, "Requests refused after shutdown");
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn next_wake(&self) -> Option<Instant> {
        [
            self.supervisor.wake_at(),
            self.supervisor.welcome_deadline(),
            self.auth.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Publishes the state snapshot and notifies the listener on change.
    fn publish(&mut self) {
        let state = self.supervisor.state();
        if *state == self.published {
            return;
        }

        debug!(from = self.published.name(), to = %state, "Connection state changed");
        self.published = state.clone();
        *self.snapshot.write() = state.clone();
        self.listener.on_state_changed(state);
    }
}

/// Sleeps until `at`, or forever when nothing is scheduled.
async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread::{self, ThreadId};
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    use crate::auth::{KeyStorage, MemoryKeyStorage};
    use crate::broker::listener::NoopListener;
    use crate::transport::EndpointPool;
    use crate::testing::{MemoryNetwork, PassthroughCrypto};

    /// Memory storage that records which thread touched it.
    #[derive(Debug, Default)]
    struct ThreadRecordingStorage {
        inner: MemoryKeyStorage,
        threads: Mutex<Vec<ThreadId>>,
    }

    impl KeyStorage for ThreadRecordingStorage {
        fn load(&self, endpoint: &EndpointId) -> Result<Option<AuthKey>> {
            self.inner.load(endpoint)
        }

        fn save(&self, endpoint: &EndpointId, key: &AuthKey) -> Result<()> {
            self.threads.lock().push(thread::current().id());
            self.inner.save(endpoint, key)
        }

        fn invalidate(&self, endpoint: &EndpointId) -> Result<()> {
            self.threads.lock().push(thread::current().id());
            self.inner.invalidate(endpoint)
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::parse("memory://a").expect("valid endpoint")
    }

    fn processor(
        storage: Arc<dyn KeyStorage>,
    ) -> (Processor, mpsc::UnboundedSender<Event>, mpsc::UnboundedReceiver<Event>) {
        let config = Arc::new(BrokerConfig {
            endpoints: vec![endpoint()],
            max_pending: 4,
            ..BrokerConfig::default()
        });
        let pool = EndpointPool::new(
            config.endpoints.clone(),
            config.endpoint_backoff_base,
            config.endpoint_backoff_cap,
        )
        .expect("pool");
        let supervisor = Supervisor::new(pool, config.reconnect_policy());
        let crypto: Arc<dyn CryptoProvider> = Arc::new(PassthroughCrypto::new());
        let mut auth = AuthKeyManager::new(
            storage,
            Arc::clone(&crypto),
            config.handshake_attempts,
            config.handshake_timeout,
        );
        auth.load(&config.endpoints);

        let (tx, rx) = mpsc::unbounded_channel();
        let processor = Processor::new(
            SessionContext::default(),
            config,
            supervisor,
            auth,
            Arc::new(MemoryNetwork::new()),
            crypto,
            Arc::new(NoopListener),
            tx.clone(),
            Arc::new(RwLock::new(ConnectionState::Disconnected)),
        );
        (processor, tx, rx)
    }

    async fn settle_storage(processor: &mut Processor) {
        let jobs = processor.storage_jobs.take().expect("storage job issued");
        jobs.await.expect("storage chain");
    }

    // ------------------------------------------------------------------------
    // Timeout Sweep
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_expired_requests_leave_outbound_queue_while_offline() {
        let (mut processor, _events, _rx) = processor(Arc::new(MemoryKeyStorage::new()));
        processor.on_network(NetworkState::Offline);

        let mut next_id = 0u64;
        for _ in 0..50 {
            for _ in 0..4 {
                next_id += 1;
                let (tx, _rx) = oneshot::channel();
                processor.submit(
                    CorrelationId::new(next_id),
                    Request::new(1, Vec::new()).with_timeout(Duration::from_millis(10)),
                    Completion::Channel(tx),
                );
            }
            assert_eq!(processor.queue.len(), 4);

            tokio::time::advance(Duration::from_millis(20)).await;
            processor.sweep(Instant::now());

            assert!(processor.queue.is_empty());
            assert_eq!(processor.mux.len(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_live_requests_queued_in_order() {
        let (mut processor, _events, _rx) = processor(Arc::new(MemoryKeyStorage::new()));
        let timeouts = [10, 1_000, 10, 1_000];

        let mut receivers = Vec::new();
        for (i, ms) in timeouts.into_iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            processor.submit(
                CorrelationId::new(i as u64 + 1),
                Request::new(1, Vec::new()).with_timeout(Duration::from_millis(ms)),
                Completion::Channel(tx),
            );
            receivers.push(rx);
        }

        tokio::time::advance(Duration::from_millis(20)).await;
        processor.sweep(Instant::now());

        assert_eq!(processor.queue.drain(), vec![CorrelationId::new(2), CorrelationId::new(4)]);
        let first = receivers.remove(0).await.expect("resolved");
        assert!(matches!(first, Err(Error::RequestTimeout { timeout_ms: 10, .. })));
    }

    // ------------------------------------------------------------------------
    // Key Storage
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_stored_key_removed_off_processor_thread() {
        let storage = Arc::new(ThreadRecordingStorage::default());
        let key = AuthKey::new(endpoint().id(), vec![7; 32]);
        storage.inner.save(&endpoint().id(), &key).expect("seed");

        let (mut processor, _events, _rx) = processor(storage.clone());
        assert!(processor.auth.cached(&endpoint().id()).is_some());

        assert!(processor.auth.invalidate(&endpoint().id()));
        processor.remove_stored_key(endpoint().id());
        assert!(processor.auth.cached(&endpoint().id()).is_none());

        settle_storage(&mut processor).await;
        assert!(storage.inner.is_empty());

        let threads = storage.threads.lock().clone();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], thread::current().id());
    }

    #[tokio::test]
    async fn test_storage_jobs_complete_in_issue_order() {
        let storage = Arc::new(MemoryKeyStorage::new());
        let (mut processor, _events, mut rx) = processor(storage.clone());
        let fresh = AuthKey::new(endpoint().id(), vec![9; 32]);

        processor.remove_stored_key(endpoint().id());
        processor.persist(1, fresh.clone());
        settle_storage(&mut processor).await;

        assert_eq!(storage.load(&endpoint().id()).expect("load"), Some(fresh));
        assert!(matches!(
            rx.recv().await,
            Some(Event::KeyPersisted { epoch: 1, result: Ok(()), .. })
        ));
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_submit_behind_shutdown_completes_with_broker_closed() {
        let (processor, events, rx) = processor(Arc::new(MemoryKeyStorage::new()));

        let (ack, acked) = oneshot::channel();
        events.send(Event::Shutdown(ack)).expect("mailbox open");

        let (tx, result) = oneshot::channel();
        events
            .send(Event::Submit {
                id: CorrelationId::new(1),
                request: Request::new(1, Vec::new()),
                completion: Completion::Callback(Box::new(move |r| {
                    let _ = tx.send(r);
                })),
            })
            .expect("mailbox open");

        let (late_ack, late_acked) = oneshot::channel();
        events.send(Event::Shutdown(late_ack)).expect("mailbox open");

        processor.run(rx).await;

        acked.await.expect("shutdown acknowledged");
        late_acked.await.expect("second shutdown acknowledged");
        assert!(matches!(result.await.expect("callback ran"), Err(Error::BrokerClosed)));
        assert!(events.send(Event::Reconnect).is_err());
    }
}
