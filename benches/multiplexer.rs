//! Multiplexer and broker throughput benchmarks.
//!
//! Benchmarks request bookkeeping and end-to-end round trips:
//! - Submit/transmit/resolve cycles on a bare multiplexer
//! - Timeout sweeps over large pending sets
//! - Round trips through a broker against an in-memory server
//!
//! Run with: cargo bench --bench multiplexer
//! Results saved to: target/criterion/

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use tokio::time::Instant;

use session_broker::session::{Completion, IdSequence, Multiplexer};
use session_broker::testing::{MemoryNetwork, PassthroughCrypto};
use session_broker::{Broker, Endpoint, Request, Response};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BATCH_SIZES: &[usize] = &[100, 1_000, 10_000];
const ROUND_TRIPS: &[usize] = &[10, 100];

// ============================================================================
// Benchmark: Submit and Resolve
// ============================================================================

fn bench_submit_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("multiplexer_cycle");

    for &count in BATCH_SIZES {
        group.bench_with_input(BenchmarkId::new("submit_resolve", count), &count, |b, &count| {
            b.iter(|| {
                let mut mux = Multiplexer::new(count, Duration::from_secs(30), 3);
                let ids = IdSequence::new();
                let now = Instant::now();

                for _ in 0..count {
                    let id = ids.next();
                    mux.submit(id, Request::new(1, vec![0; 32]), Completion::Callback(Box::new(|_| {})), now)
                        .expect("capacity");
                    mux.mark_in_flight(id, 1);
                    mux.on_response(id, Response::new(1, vec![0; 32]));
                }
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Timeout Sweep
// ============================================================================

fn bench_expire_stale(c: &mut Criterion) {
    let mut group = c.benchmark_group("multiplexer_sweep");

    for &count in BATCH_SIZES {
        group.bench_with_input(BenchmarkId::new("expire_none", count), &count, |b, &count| {
            let mut mux = Multiplexer::new(count, Duration::from_secs(30), 3);
            let ids = IdSequence::new();
            let now = Instant::now();
            for _ in 0..count {
                mux.submit(ids.next(), Request::new(1, Vec::new()), Completion::Callback(Box::new(|_| {})), now)
                    .expect("capacity");
            }

            b.iter(|| mux.expire_stale(now));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Broker Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("broker_round_trip");
    group.sample_size(20);

    for &count in ROUND_TRIPS {
        group.bench_with_input(BenchmarkId::new("echo", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async move {
                let network = MemoryNetwork::new();
                let endpoint = Endpoint::parse("memory://bench").expect("endpoint");
                let _server = network.server(&endpoint);

                let broker = Broker::builder()
                    .endpoint_with(endpoint)
                    .network(network)
                    .crypto(PassthroughCrypto::new())
                    .build()
                    .expect("broker");

                let calls: Vec<_> = (0..count)
                    .map(|i| broker.request(Request::new(1, vec![i as u8; 64])).expect("submit"))
                    .collect();
                for call in calls {
                    call.await.expect("response");
                }

                broker.shutdown().await.expect("shutdown");
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_submit_resolve, bench_expire_stale, bench_round_trip);
criterion_main!(benches);
