//! Session Broker - client-side session and transport broker.
//!
//! This library keeps one authenticated, multiplexed session to a set of
//! equivalent server endpoints and lets the application issue RPC requests
//! over it without caring about reconnects.
//!
//! # Architecture
//!
//! The broker follows a single-owner model:
//!
//! - **Processor**: one task owns all session state and consumes an ordered mailbox
//! - **Connection task**: one per physical link, reports frames back tagged with an epoch
//! - **Blocking worker**: persists freshly negotiated auth keys
//!
//! Key design principles:
//!
//! - At most one physical connection and at most one handshake at a time
//! - Every request resolves exactly once
//! - Requests in flight when a connection drops are resent first, in order
//! - Network recovery bypasses backoff after a short debounce
//!
//! # Quick Start
//!
//! ```no_run
//! use session_broker::{Broker, FileKeyStorage, NetworkState, Request, Result, TransportClass};
//! use session_broker::testing::PassthroughCrypto;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let broker = Broker::builder()
//!         .endpoint("wss://front1.example.com")
//!         .endpoint("wss://front2.example.com")
//!         .key_storage(FileKeyStorage::open("./keys")?)
//!         .crypto(PassthroughCrypto::new())
//!         .build()?;
//!
//!     broker.on_network_changed(NetworkState::Connected(TransportClass::Wifi))?;
//!
//!     let response = broker.request(Request::new(0x10, b"ping".to_vec()))?.await?;
//!     println!("Got {} bytes", response.payload.len());
//!
//!     broker.shutdown().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`broker`] | [`Broker`] facade, builder, configuration |
//! | [`session`] | Connection state machine, multiplexer, outbound queue |
//! | [`auth`] | Auth keys, storage and crypto seams |
//! | [`transport`] | Endpoints, failover pool, connection I/O |
//! | [`protocol`] | Wire frames and request types |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`testing`] | In-memory network, server and crypto for tests |

// ============================================================================
// Modules
// ============================================================================

/// Auth keys: material, storage, crypto seam and lifecycle.
pub mod auth;

/// Broker facade and processor.
///
/// Use [`Broker::builder()`] to create a configured broker.
pub mod broker;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire protocol types.
pub mod protocol;

/// Session layer: state machine and request bookkeeping.
pub mod session;

/// In-process collaborators for tests.
pub mod testing;

/// Transport layer.
///
/// Endpoint selection and per-connection I/O.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Broker types
pub use broker::{Broker, BrokerBuilder, BrokerConfig, NoopListener, PendingCall, SessionContext, SessionListener};

// Auth types
pub use auth::{AuthKey, CryptoProvider, ExchangeStep, FileKeyStorage, KeyExchange, KeyStorage, MemoryKeyStorage};

// Session types
pub use session::{ConnectionState, FailureKind, FailureReason, NetworkState, TransportClass};

// Transport types
pub use transport::{Endpoint, FrameSink, FrameSource, Link, NetworkProvider, TransportHints, WebSocketNetwork};

// Protocol types
pub use protocol::{Request, Response, Update};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CorrelationId, EndpointId, InstanceId, KeyId, ServerSessionId};
