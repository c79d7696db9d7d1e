//! Shared helpers for broker integration tests.

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use session_broker::testing::{MemoryNetwork, MemoryServer, PassthroughCrypto, RecordingListener};
use session_broker::{Broker, BrokerBuilder, ConnectionState, Endpoint};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

/// Virtual time budget for waiting on a condition.
pub const WAIT_LIMIT: Duration = Duration::from_secs(120);

/// Polling step while waiting on a condition.
pub const POLL_STEP: Duration = Duration::from_millis(10);

// ============================================================================
// Harness
// ============================================================================

/// A network, its servers and a listener, ready to build brokers against.
pub struct Harness {
    pub network: MemoryNetwork,
    pub listener: Arc<RecordingListener>,
    pub endpoints: Vec<Endpoint>,
}

impl Harness {
    /// Creates a harness with one server per address.
    pub fn new(addresses: &[&str]) -> Self {
        init_logging();

        let network = MemoryNetwork::new();
        let endpoints: Vec<_> = addresses.iter().map(|a| endpoint(a)).collect();
        for endpoint in &endpoints {
            let _ = network.server(endpoint);
        }

        Self {
            network,
            listener: RecordingListener::new(),
            endpoints,
        }
    }

    /// Creates a harness where only `served` addresses have a server.
    pub fn partial(addresses: &[&str], served: &[&str]) -> Self {
        init_logging();

        let network = MemoryNetwork::new();
        let endpoints: Vec<_> = addresses.iter().map(|a| endpoint(a)).collect();
        for address in served {
            let _ = network.server(&endpoint(address));
        }

        Self {
            network,
            listener: RecordingListener::new(),
            endpoints,
        }
    }

    /// Returns the server at `index` in configuration order.
    pub fn server(&self, index: usize) -> MemoryServer {
        self.network.server(&self.endpoints[index])
    }

    /// Returns a builder wired to this harness.
    pub fn builder(&self) -> BrokerBuilder {
        let mut builder = Broker::builder()
            .network(self.network.clone())
            .crypto(PassthroughCrypto::new())
            .shared_listener(self.listener.clone());
        for endpoint in &self.endpoints {
            builder = builder.endpoint_with(endpoint.clone());
        }
        builder
    }

    /// Builds a broker with default settings.
    pub fn broker(&self) -> Broker {
        self.builder().build().expect("broker")
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initializes test logging once; honors `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Parses an endpoint address.
pub fn endpoint(address: &str) -> Endpoint {
    Endpoint::parse(address).expect("valid endpoint")
}

/// Polls until `ready` holds, advancing virtual time.
pub async fn wait_until(mut ready: impl FnMut() -> bool) {
    let mut waited = Duration::ZERO;
    while !ready() {
        assert!(waited < WAIT_LIMIT, "condition not met within {WAIT_LIMIT:?}");
        tokio::time::sleep(POLL_STEP).await;
        waited += POLL_STEP;
    }
}

/// Waits until the broker publishes a state matching `predicate`.
pub async fn wait_for_state(broker: &Broker, predicate: impl Fn(&ConnectionState) -> bool) {
    wait_until(|| predicate(&broker.state())).await;
}

/// Waits until the broker has an open session.
pub async fn wait_authenticated(broker: &Broker) {
    wait_for_state(broker, ConnectionState::is_authenticated).await;
}

/// Waits until the broker is backing off after a failure.
pub async fn wait_failed(broker: &Broker) {
    wait_for_state(broker, |state| matches!(state, ConnectionState::Failed { .. })).await;
}
