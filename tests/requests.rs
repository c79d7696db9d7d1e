//! Request lifecycle: delivery, timeouts, cancellation and shutdown.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use session_broker::testing::RpcMode;
use session_broker::{ConnectionState, Error, Request};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use common::{Harness, wait_authenticated, wait_failed};

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_request_before_session_is_delivered() {
    let harness = Harness::new(&["memory://a"]);
    let server = harness.server(0);
    let broker = harness.broker();
    assert!(!broker.state().is_authenticated());

    let call = broker.request(Request::new(0x10, b"ping".to_vec())).unwrap();
    let id = call.id();
    let response = assert_ok!(call.await);

    assert_eq!(response.type_tag, 0x10);
    assert_eq!(response.payload, b"ping");
    let received = server.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, id);
}

#[tokio::test(start_paused = true)]
async fn test_queued_requests_keep_submission_order() {
    let harness = Harness::new(&["memory://a"]);
    let server = harness.server(0);
    let broker = harness.broker();

    let calls: Vec<_> = (0..10u8)
        .map(|i| broker.request(Request::new(1, vec![i])).unwrap())
        .collect();
    for call in calls {
        assert_ok!(call.await);
    }

    let order: Vec<_> = server.received().iter().map(|rpc| rpc.payload[0]).collect();
    assert_eq!(order, (0..10).collect::<Vec<u8>>());
}

#[tokio::test(start_paused = true)]
async fn test_callback_runs_once_with_result() {
    let harness = Harness::new(&["memory://a"]);
    let broker = harness.broker();

    let (tx, rx) = oneshot::channel();
    let id = broker
        .request_with(Request::new(2, b"cb".to_vec()), move |result| {
            let _ = tx.send(result);
        })
        .unwrap();

    let response = assert_ok!(rx.await.expect("callback ran"));
    assert_eq!(response.payload, b"cb");
    assert_eq!(harness.server(0).received()[0].id, id);
}

#[tokio::test(start_paused = true)]
async fn test_correlation_ids_are_never_reused() {
    let harness = Harness::new(&["memory://a"]);
    let server = harness.server(0);
    let broker = harness.broker();

    let mut ids = Vec::new();
    for round in 0..3 {
        let calls: Vec<_> = (0..20)
            .map(|_| broker.request(Request::new(1, Vec::new())).unwrap())
            .collect();
        ids.extend(calls.iter().map(|call| call.id()));
        for call in calls {
            assert_ok!(call.await);
        }

        if round < 2 {
            server.drop_connections();
            wait_failed(&broker).await;
        }
    }

    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    let unique: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());
}

#[tokio::test(start_paused = true)]
async fn test_server_error_maps_to_rpc_error() {
    let harness = Harness::new(&["memory://a"]);
    harness.server(0).set_rpc_mode(RpcMode::Fail {
        code: 420,
        message: "FLOOD_WAIT".to_string(),
    });
    let broker = harness.broker();

    let err = assert_err!(broker.request(Request::new(1, Vec::new())).unwrap().await);
    match err {
        Error::Rpc { code, message } => {
            assert_eq!(code, 420);
            assert_eq!(message, "FLOOD_WAIT");
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(broker.state().is_authenticated());
}

// ============================================================================
// Timeouts and Retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_request_times_out_while_session_stays_up() {
    let harness = Harness::new(&["memory://a"]);
    let server = harness.server(0);
    server.set_rpc_mode(RpcMode::Hold);
    let broker = harness.broker();
    wait_authenticated(&broker).await;

    let started = Instant::now();
    let call = broker
        .request(Request::new(1, Vec::new()).with_timeout(Duration::from_secs(5)))
        .unwrap();
    let err = assert_err!(call.await);

    assert!(matches!(err, Error::RequestTimeout { timeout_ms: 5000, .. }));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));
    assert!(broker.state().is_authenticated());
    assert_eq!(server.connections(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_queued_request_times_out_without_session() {
    let harness = Harness::new(&["memory://a"]);
    harness.server(0).set_accepting(false);
    let broker = harness.broker();

    let call = broker
        .request(Request::new(1, Vec::new()).with_timeout(Duration::from_secs(2)))
        .unwrap();
    let err = assert_err!(call.await);
    assert!(err.is_timeout());
    assert!(harness.server(0).received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_request_gives_up_after_max_attempts() {
    let harness = Harness::new(&["memory://a"]);
    let server = harness.server(0);
    server.set_rpc_mode(RpcMode::Hold);
    let broker = harness.broker();

    let call = broker
        .request(Request::new(1, Vec::new()).with_max_attempts(1))
        .unwrap();
    server.wait_for_requests(1).await;
    server.drop_connections();

    let err = assert_err!(call.await);
    assert!(matches!(err, Error::MaxRetriesExceeded { attempts: 1, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_pending_limit_reports_busy() {
    let harness = Harness::new(&["memory://a"]);
    harness.server(0).set_rpc_mode(RpcMode::Hold);
    let broker = harness.builder().max_pending(1).build().unwrap();

    let _first = broker.request(Request::new(1, Vec::new())).unwrap();
    let second = broker.request(Request::new(1, Vec::new())).unwrap();

    let err = assert_err!(second.await);
    assert!(matches!(err, Error::Busy { pending: 1, max: 1 }));
}

// ============================================================================
// Cancellation and Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_resolves_cancelled_and_late_response_is_dropped() {
    let harness = Harness::new(&["memory://a"]);
    let server = harness.server(0);
    server.set_rpc_mode(RpcMode::Hold);
    let broker = harness.broker();

    let call = broker.request(Request::new(1, b"slow".to_vec())).unwrap();
    let id = call.id();
    server.wait_for_requests(1).await;

    call.cancel().unwrap();
    let err = assert_err!(call.await);
    assert!(matches!(err, Error::Cancelled));

    server.respond(id, 1, b"late".to_vec());
    server.set_rpc_mode(RpcMode::Echo);
    let response = assert_ok!(broker.request(Request::new(1, b"next".to_vec())).unwrap().await);
    assert_eq!(response.payload, b"next");
    assert!(broker.state().is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_queued_request_is_never_sent() {
    let harness = Harness::new(&["memory://a"]);
    let server = harness.server(0);
    server.set_accepting(false);
    let broker = harness.broker();

    let call = broker.request(Request::new(1, b"never".to_vec())).unwrap();
    broker.cancel(call.id()).unwrap();
    assert!(matches!(assert_err!(call.await), Error::Cancelled));

    server.set_accepting(true);
    broker.reconnect().unwrap();
    assert_ok!(broker.request(Request::new(1, b"after".to_vec())).unwrap().await);

    let payloads: Vec<_> = server.received().into_iter().map(|rpc| rpc.payload).collect();
    assert_eq!(payloads, vec![b"after".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_everything() {
    let harness = Harness::new(&["memory://a"]);
    let server = harness.server(0);
    server.set_rpc_mode(RpcMode::Hold);
    let broker = harness.broker();

    let in_flight: Vec<_> = (0..2)
        .map(|_| broker.request(Request::new(1, Vec::new())).unwrap())
        .collect();
    let (tx, rx) = oneshot::channel();
    broker
        .request_with(Request::new(1, Vec::new()), move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    server.wait_for_requests(3).await;

    assert_ok!(broker.shutdown().await);

    for call in in_flight {
        assert!(matches!(assert_err!(call.await), Error::Cancelled));
    }
    assert!(matches!(rx.await.expect("callback ran"), Err(Error::Cancelled)));

    assert!(broker.is_closed());
    assert_eq!(broker.state(), ConnectionState::Disconnected);
    assert!(matches!(broker.request(Request::new(1, Vec::new())), Err(Error::BrokerClosed)));
    assert!(matches!(broker.shutdown().await, Err(Error::BrokerClosed)));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_last_handle_shuts_down() {
    let harness = Harness::new(&["memory://a"]);
    harness.server(0).set_accepting(false);
    let broker = harness.broker();

    let call = broker.request(Request::new(1, Vec::new())).unwrap();
    drop(broker);

    assert!(matches!(assert_err!(call.await), Error::Cancelled));
}
