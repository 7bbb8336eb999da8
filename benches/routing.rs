//! Routing benchmark suite.
//!
//! Measures inbound dispatch at different fan-out widths:
//! - Subscriptions per identifier: 1, 10, 100
//! - Background identifiers: 1000
//!
//! Run with: cargo bench --bench routing
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cable_simulator::{Callbacks, ChannelIdentifier, Consumer};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const FAN_OUT: &[usize] = &[1, 10, 100];
const BACKGROUND_CHANNELS: usize = 1000;

// ============================================================================
// Setup
// ============================================================================

fn connected_consumer(rt: &Runtime, fan_out: usize, hits: &Arc<AtomicU64>) -> Consumer {
    rt.block_on(async {
        let consumer = Consumer::builder()
            .build()
            .expect("Failed to build consumer");
        consumer.connect().expect("Failed to connect");
        consumer
            .wait_until_connected(Duration::from_secs(1))
            .await
            .expect("Connection timed out");

        for room in 0..BACKGROUND_CHANNELS {
            consumer.subscribe(
                ChannelIdentifier::new("Background").param("room", room),
                Callbacks::new(),
            );
        }
        for _ in 0..fan_out {
            let hits = Arc::clone(hits);
            consumer.subscribe(
                ChannelIdentifier::new("ChatChannel").param("room", 1),
                Callbacks::new().on_received(move |_| {
                    hits.fetch_add(1, Ordering::Relaxed);
                }),
            );
        }

        // Let the automatic confirmations run.
        tokio::time::sleep(Duration::from_millis(10)).await;
        consumer
    })
}

// ============================================================================
// Benchmark: Fan-out Dispatch
// ============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create runtime");
    let mut group = c.benchmark_group("dispatch_fan_out");

    for &fan_out in FAN_OUT {
        let hits = Arc::new(AtomicU64::new(0));
        let consumer = connected_consumer(&rt, fan_out, &hits);
        consumer.set_record_history(false);
        let room = ChannelIdentifier::new("ChatChannel").param("room", 1);

        group.bench_with_input(BenchmarkId::new("subscriptions", fan_out), &fan_out, |b, _| {
            b.iter(|| {
                black_box(
                    consumer.simulate_incoming_message(room.clone(), json!({"text": "hi"})),
                )
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Raw Frame Decode + Route
// ============================================================================

fn bench_raw_frame(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create runtime");
    let hits = Arc::new(AtomicU64::new(0));
    let consumer = connected_consumer(&rt, 10, &hits);
    consumer.set_record_history(false);

    let frame = r#"{"identifier":"{\"room\":1,\"channel\":\"ChatChannel\"}","message":{"text":"hi"}}"#;

    c.bench_function("raw_frame_route", |b| {
        b.iter(|| consumer.simulate_raw_frame(black_box(frame)));
    });
}

criterion_group!(benches, bench_fan_out, bench_raw_frame);
criterion_main!(benches);
