//! In-process collaborators for tests and examples.
//!
//! | Type | Stands in for |
//! |------|---------------|
//! | [`channel_link`] | A connected socket |
//! | [`MemoryNetwork`] / [`MemoryServer`] | The network and a scripted server endpoint |
//! | [`PassthroughCrypto`] | A real key exchange (not secure) |
//! | [`FailingKeyStorage`] | Durable storage that can refuse writes |
//! | [`RecordingListener`] | An application observing the session |
//!
//! Nothing here is suitable for production use.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, trace};

use crate::auth::{AuthKey, CryptoProvider, ExchangeStep, KeyExchange, KeyStorage, MemoryKeyStorage};
use crate::broker::SessionListener;
use crate::error::{Error, Result};
use crate::identifiers::{CorrelationId, EndpointId, KeyId, ServerSessionId};
use crate::protocol::{Frame, Message, Update};
use crate::session::ConnectionState;
use crate::transport::{Endpoint, FrameSink, FrameSource, Link, NetworkProvider};

// ============================================================================
// Channel Link
// ============================================================================

/// Creates a connected in-memory link and the remote end driving it.
#[must_use]
pub fn channel_link() -> (Link, RemoteEnd) {
    let (to_remote_tx, to_remote_rx) = mpsc::unbounded_channel();
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

    let link = Link::new(
        ChannelSink {
            tx: Some(to_remote_tx),
        },
        ChannelSource { rx: to_client_rx },
    );
    let remote = RemoteEnd {
        tx: to_client_tx,
        rx: to_remote_rx,
    };

    (link, remote)
}

/// Server side of a [`channel_link`]. Dropping it closes the link.
#[derive(Debug)]
pub struct RemoteEnd {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl RemoteEnd {
    /// Sends raw bytes to the client. Returns `false` if the client is gone.
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        self.tx.send(bytes).is_ok()
    }

    /// Sends a frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the client is gone.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        if self.send(frame.encode()?) {
            Ok(())
        } else {
            Err(Error::transport("client side of link closed"))
        }
    }

    /// Receives the next frame the client wrote; `None` once it closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::transport("link closed"))?;
        tx.send(frame)
            .map_err(|_| Error::transport("remote end dropped"))
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn recv(&mut self) -> Option<Result<Vec<u8>>> {
        self.rx.recv().await.map(Ok)
    }
}

// ============================================================================
// PassthroughCrypto
// ============================================================================

/// Toy crypto: the key is both nonces concatenated, sealing is XOR.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCrypto;

impl PassthroughCrypto {
    /// Creates the provider.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Derives key material from both nonces, as both sides do.
    #[must_use]
    pub fn derive_material(client_nonce: &[u8], server_nonce: &[u8]) -> Vec<u8> {
        [client_nonce, server_nonce].concat()
    }

    /// XORs `data` with the repeated key material. Symmetric.
    #[must_use]
    pub fn apply(material: &[u8], data: &[u8]) -> Vec<u8> {
        if material.is_empty() {
            return data.to_vec();
        }
        data.iter()
            .zip(material.iter().cycle())
            .map(|(byte, key)| byte ^ key)
            .collect()
    }

    fn nonce() -> Vec<u8> {
        rand::random::<[u8; 16]>().to_vec()
    }
}

impl CryptoProvider for PassthroughCrypto {
    fn start_exchange(&self, _endpoint: &Endpoint) -> Result<(KeyExchange, Vec<u8>)> {
        let nonce = Self::nonce();
        let exchange = KeyExchange {
            state: nonce.clone(),
            round: 0,
        };
        Ok((exchange, nonce))
    }

    fn advance_exchange(&self, exchange: &mut KeyExchange, reply: &[u8]) -> Result<ExchangeStep> {
        if exchange.round > 0 {
            return Err(Error::crypto("exchange already complete"));
        }
        if reply.is_empty() {
            return Err(Error::crypto("empty server nonce"));
        }

        exchange.round += 1;
        Ok(ExchangeStep::Complete(Self::derive_material(&exchange.state, reply)))
    }

    fn seal(&self, key: &AuthKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(Self::apply(key.material(), plaintext))
    }

    fn open(&self, key: &AuthKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(Self::apply(key.material(), ciphertext))
    }
}

// ============================================================================
// FailingKeyStorage
// ============================================================================

/// In-memory storage whose writes fail while `fail_saves` is set (the
/// default).
#[derive(Debug)]
pub struct FailingKeyStorage {
    inner: MemoryKeyStorage,
    fail_saves: AtomicBool,
}

impl FailingKeyStorage {
    /// Creates a storage that refuses every save.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: MemoryKeyStorage::new(),
            fail_saves: AtomicBool::new(true),
        }
    }

    /// Makes saves fail or succeed.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Returns `true` if no key is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for FailingKeyStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStorage for FailingKeyStorage {
    fn load(&self, endpoint: &EndpointId) -> Result<Option<AuthKey>> {
        self.inner.load(endpoint)
    }

    fn save(&self, endpoint: &EndpointId, key: &AuthKey) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::storage("disk full"));
        }
        self.inner.save(endpoint, key)
    }

    fn invalidate(&self, endpoint: &EndpointId) -> Result<()> {
        self.inner.invalidate(endpoint)
    }
}

// ============================================================================
// MemoryNetwork
// ============================================================================

/// Network of [`MemoryServer`]s keyed by endpoint.
///
/// Dialing an endpoint without a server is refused.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    servers: Arc<Mutex<FxHashMap<EndpointId, MemoryServer>>>,
    dials: Arc<Mutex<Vec<EndpointId>>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the server for an endpoint, creating it if needed.
    #[must_use]
    pub fn server(&self, endpoint: &Endpoint) -> MemoryServer {
        self.servers
            .lock()
            .entry(endpoint.id())
            .or_default()
            .clone()
    }

    /// Returns every endpoint dialed so far, in order.
    #[must_use]
    pub fn dials(&self) -> Vec<EndpointId> {
        self.dials.lock().clone()
    }
}

#[async_trait]
impl NetworkProvider for MemoryNetwork {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Link> {
        self.dials.lock().push(endpoint.id());

        let server = self.servers.lock().get(&endpoint.id()).cloned();
        match server {
            Some(server) => server.accept(),
            None => Err(Error::transport(format!("connection refused by {endpoint}"))),
        }
    }
}

// ============================================================================
// MemoryServer
// ============================================================================

/// How a [`MemoryServer`] answers `rpc.request`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RpcMode {
    /// Answer with `rpc.result` carrying the request payload.
    #[default]
    Echo,
    /// Record but do not answer; see [`MemoryServer::respond`].
    Hold,
    /// Answer with `rpc.error`.
    Fail {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },
}

/// A request as the server received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRpc {
    /// Server-side connection number, starting at 1.
    pub connection: usize,
    /// Correlation id.
    pub id: CorrelationId,
    /// Payload type.
    pub type_tag: u32,
    /// Payload.
    pub payload: Vec<u8>,
}

#[derive(Debug)]
enum ServerCommand {
    Push { type_tag: u32, payload: Vec<u8> },
    Respond { id: CorrelationId, type_tag: u32, payload: Vec<u8> },
    Close,
}

#[derive(Debug)]
struct ServerState {
    accepting: bool,
    refuse_handshakes: bool,
    mode: RpcMode,
    keys: FxHashMap<KeyId, Vec<u8>>,
    session: ServerSessionId,
    salt: u64,
    connections: usize,
    handshakes: usize,
    subscriptions: usize,
    received: Vec<ReceivedRpc>,
    live: Vec<mpsc::UnboundedSender<ServerCommand>>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            accepting: true,
            refuse_handshakes: false,
            mode: RpcMode::Echo,
            keys: FxHashMap::default(),
            session: ServerSessionId::new(1),
            salt: 0x5a17,
            connections: 0,
            handshakes: 0,
            subscriptions: 0,
            received: Vec::new(),
            live: Vec::new(),
        }
    }
}

/// Scripted server endpoint speaking the broker's wire protocol.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
    changed: Arc<Notify>,
}

impl MemoryServer {
    // ------------------------------------------------------------------------
    // Scripting
    // ------------------------------------------------------------------------

    /// Accepts or refuses new connections.
    pub fn set_accepting(&self, accepting: bool) {
        self.state.lock().accepting = accepting;
    }

    /// Answers `handshake.init` with `handshake.rejected` while set.
    pub fn refuse_handshakes(&self, refuse: bool) {
        self.state.lock().refuse_handshakes = refuse;
    }

    /// Sets how requests are answered.
    pub fn set_rpc_mode(&self, mode: RpcMode) {
        self.state.lock().mode = mode;
    }

    /// Forgets every negotiated key; the next `session.hello` is refused.
    pub fn forget_keys(&self) {
        self.state.lock().keys.clear();
    }

    /// Starts a new server session id for subsequent welcomes.
    pub fn new_session(&self) {
        let mut state = self.state.lock();
        state.session = ServerSessionId::new(state.session.as_u64() + 1);
    }

    /// Closes every live connection from the server side.
    pub fn drop_connections(&self) {
        for tx in self.state.lock().live.drain(..) {
            let _ = tx.send(ServerCommand::Close);
        }
    }

    /// Pushes an update on every live session.
    pub fn push(&self, type_tag: u32, payload: impl Into<Vec<u8>>) {
        let payload = payload.into();
        for tx in &self.state.lock().live {
            let _ = tx.send(ServerCommand::Push {
                type_tag,
                payload: payload.clone(),
            });
        }
    }

    /// Answers a held request on the newest live connection.
    pub fn respond(&self, id: CorrelationId, type_tag: u32, payload: impl Into<Vec<u8>>) {
        let mut state = self.state.lock();
        state.live.retain(|tx| !tx.is_closed());
        if let Some(tx) = state.live.last() {
            let _ = tx.send(ServerCommand::Respond {
                id,
                type_tag,
                payload: payload.into(),
            });
        }
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Returns every request received, in arrival order.
    #[must_use]
    pub fn received(&self) -> Vec<ReceivedRpc> {
        self.state.lock().received.clone()
    }

    /// Returns the number of connections accepted.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Returns the number of `handshake.init` frames received.
    #[must_use]
    pub fn handshakes(&self) -> usize {
        self.state.lock().handshakes
    }

    /// Returns the number of `updates.subscribe` messages received.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.state.lock().subscriptions
    }

    /// Waits until at least `count` requests were received.
    pub async fn wait_for_requests(&self, count: usize) {
        self.wait_until(|state| state.received.len() >= count).await;
    }

    /// Waits until at least `count` connections were accepted.
    pub async fn wait_for_connections(&self, count: usize) {
        self.wait_until(|state| state.connections >= count).await;
    }

    async fn wait_until(&self, ready: impl Fn(&ServerState) -> bool) {
        loop {
            let notified = self.changed.notified();
            if ready(&*self.state.lock()) {
                return;
            }
            notified.await;
        }
    }

    // ------------------------------------------------------------------------
    // Serving
    // ------------------------------------------------------------------------

    fn accept(&self) -> Result<Link> {
        let mut state = self.state.lock();
        if !state.accepting {
            return Err(Error::transport("connection refused"));
        }

        state.connections += 1;
        let connection = state.connections;
        let (link, remote) = channel_link();
        let (tx, rx) = mpsc::unbounded_channel();
        state.live.push(tx);
        drop(state);

        debug!(connection, "Memory server accepted connection");
        self.changed.notify_waiters();
        tokio::spawn(self.clone().serve(connection, remote, rx));

        Ok(link)
    }

    async fn serve(
        self,
        connection: usize,
        mut remote: RemoteEnd,
        mut commands: mpsc::UnboundedReceiver<ServerCommand>,
    ) {
        let mut material: Option<Vec<u8>> = None;

        loop {
            tokio::select! {
                bytes = remote.recv() => {
                    let Some(bytes) = bytes else { break };
                    if !self.on_frame(connection, &bytes, &mut material, &remote) {
                        break;
                    }
                    self.changed.notify_waiters();
                }

                command = commands.recv() => {
                    match command {
                        Some(ServerCommand::Push { type_tag, payload }) => {
                            if let Some(material) = &material {
                                send_sealed(&remote, material, &Message::Push { type_tag, payload });
                            }
                        }
                        Some(ServerCommand::Respond { id, type_tag, payload }) => {
                            if let Some(material) = &material {
                                send_sealed(&remote, material, &Message::RpcResult { id, type_tag, payload });
                            }
                        }
                        Some(ServerCommand::Close) | None => break,
                    }
                }
            }
        }

        debug!(connection, "Memory server closed connection");
    }

    /// Handles one client frame. Returns `false` to close the connection.
    fn on_frame(
        &self,
        connection: usize,
        bytes: &[u8],
        material: &mut Option<Vec<u8>>,
        remote: &RemoteEnd,
    ) -> bool {
        let Ok(frame) = Frame::decode(bytes) else {
            return false;
        };
        trace!(connection, kind = frame.kind(), "Memory server received frame");

        let mut state = self.state.lock();
        let reply = match frame {
            Frame::HandshakeInit { payload } => {
                state.handshakes += 1;
                if state.refuse_handshakes {
                    Frame::HandshakeRejected {
                        reason: "handshake refused".to_string(),
                    }
                } else {
                    let server_nonce = rand::random::<[u8; 16]>().to_vec();
                    let derived = PassthroughCrypto::derive_material(&payload, &server_nonce);
                    state.keys.insert(KeyId::derive(&derived), derived);
                    Frame::HandshakeReply {
                        payload: server_nonce,
                    }
                }
            }

            Frame::Hello { key_id, .. } => match state.keys.get(&key_id) {
                Some(key) => {
                    *material = Some(key.clone());
                    Frame::Welcome {
                        salt: state.salt,
                        session: state.session,
                    }
                }
                None => Frame::UnknownAuthKey { key_id },
            },

            Frame::Sealed { data, .. } => {
                let Some(key) = material.as_ref() else {
                    return false;
                };
                let Ok(message) = Message::from_bytes(&PassthroughCrypto::apply(key, &data)) else {
                    return false;
                };

                match message {
                    Message::Rpc {
                        id,
                        type_tag,
                        payload,
                    } => {
                        state.received.push(ReceivedRpc {
                            connection,
                            id,
                            type_tag,
                            payload: payload.clone(),
                        });
                        let answer = match &state.mode {
                            RpcMode::Echo => Some(Message::RpcResult {
                                id,
                                type_tag,
                                payload,
                            }),
                            RpcMode::Hold => None,
                            RpcMode::Fail { code, message } => Some(Message::RpcError {
                                id,
                                code: *code,
                                message: message.clone(),
                            }),
                        };
                        if let Some(answer) = answer {
                            send_sealed(remote, key, &answer);
                        }
                    }
                    Message::Subscribe => state.subscriptions += 1,
                    _ => return false,
                }
                return true;
            }

            _ => return false,
        };

        drop(state);
        remote.send_frame(&reply).is_ok()
    }
}

fn send_sealed(remote: &RemoteEnd, material: &[u8], message: &Message) {
    let Ok(plaintext) = message.to_bytes() else {
        return;
    };
    let frame = Frame::Sealed {
        key_id: KeyId::derive(material),
        data: PassthroughCrypto::apply(material, &plaintext),
    };
    let _ = remote.send_frame(&frame);
}

// ============================================================================
// RecordingListener
// ============================================================================

/// Records every notification.
#[derive(Debug, Default)]
pub struct RecordingListener {
    states: Mutex<Vec<ConnectionState>>,
    updates: Mutex<Vec<Update>>,
    invalidated: Mutex<Vec<EndpointId>>,
    sessions: Mutex<Vec<(EndpointId, ServerSessionId)>>,
}

impl RecordingListener {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns every state change, in order.
    #[must_use]
    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().clone()
    }

    /// Returns every pushed update, in order.
    #[must_use]
    pub fn updates(&self) -> Vec<Update> {
        self.updates.lock().clone()
    }

    /// Returns endpoints whose key was invalidated.
    #[must_use]
    pub fn invalidated(&self) -> Vec<EndpointId> {
        self.invalidated.lock().clone()
    }

    /// Returns every new server session reported.
    #[must_use]
    pub fn sessions(&self) -> Vec<(EndpointId, ServerSessionId)> {
        self.sessions.lock().clone()
    }
}

impl SessionListener for RecordingListener {
    fn on_state_changed(&self, state: &ConnectionState) {
        self.states.lock().push(state.clone());
    }

    fn on_update(&self, update: Update) {
        self.updates.lock().push(update);
    }

    fn on_auth_key_invalidated(&self, endpoint: &Endpoint) {
        self.invalidated.lock().push(endpoint.id());
    }

    fn on_new_session(&self, endpoint: &Endpoint, session: ServerSessionId) {
        self.sessions.lock().push((endpoint.id(), session));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_is_symmetric() {
        let material = PassthroughCrypto::derive_material(b"client", b"server");
        let sealed = PassthroughCrypto::apply(&material, b"hello");
        assert_ne!(sealed, b"hello");
        assert_eq!(PassthroughCrypto::apply(&material, &sealed), b"hello");
    }

    #[test]
    fn test_exchange_completes_once() {
        let crypto = PassthroughCrypto::new();
        let endpoint = Endpoint::parse("memory://a").expect("valid");
        let (mut exchange, nonce) = crypto.start_exchange(&endpoint).expect("start");
        assert_eq!(nonce.len(), 16);

        let step = crypto.advance_exchange(&mut exchange, b"srv").expect("advance");
        let ExchangeStep::Complete(material) = step else {
            panic!("expected completion");
        };
        assert_eq!(&material[16..], b"srv");
        assert!(crypto.advance_exchange(&mut exchange, b"srv").is_err());
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_refused() {
        let network = MemoryNetwork::new();
        let endpoint = Endpoint::parse("memory://nowhere").expect("valid");
        assert!(network.connect(&endpoint).await.is_err());
        assert_eq!(network.dials(), vec![endpoint.id()]);
    }

    #[tokio::test]
    async fn test_server_handshake_then_hello() {
        let network = MemoryNetwork::new();
        let endpoint = Endpoint::parse("memory://a").expect("valid");
        let server = network.server(&endpoint);
        let crypto = PassthroughCrypto::new();

        let link = network.connect(&endpoint).await.expect("connect");
        let Link { mut sink, mut source } = link;

        let (mut exchange, nonce) = crypto.start_exchange(&endpoint).expect("start");
        sink.send(Frame::HandshakeInit { payload: nonce }.encode().expect("encode"))
            .await
            .expect("send");

        let reply = Frame::decode(&source.recv().await.expect("frame").expect("ok")).expect("decode");
        let Frame::HandshakeReply { payload } = reply else {
            panic!("unexpected {reply:?}");
        };
        let ExchangeStep::Complete(material) =
            crypto.advance_exchange(&mut exchange, &payload).expect("advance")
        else {
            panic!("expected completion");
        };

        let hello = Frame::Hello {
            key_id: KeyId::derive(&material),
            api_major: 1,
            api_minor: 0,
        };
        sink.send(hello.encode().expect("encode")).await.expect("send");

        let welcome = Frame::decode(&source.recv().await.expect("frame").expect("ok")).expect("decode");
        assert!(matches!(welcome, Frame::Welcome { .. }));
        assert_eq!(server.handshakes(), 1);
        assert_eq!(server.connections(), 1);
    }
}
