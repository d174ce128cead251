use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use blackrock_core::{ExpectedVersion, RetryBudget, RockAction, RockId, RockRecord};
use blackrock_events::{EventBus, EventEnvelope, InMemoryEventBus};
use blackrock_infra::{Blackrock, BlackrockConfig, CommandRegistry, InMemoryRockStore, RockStore};
use serde_json::{json, Value as JsonValue};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build bench runtime")
}

fn armed(base: String, retries: RetryBudget) -> RockRecord {
    let mut record = RockRecord::new(RockId::from_base(base));
    record
        .upsert("bench", RockAction::new("bench.run").with_args(json!({"n": 1})), retries)
        .expect("valid action");
    record
}

/// Seed `total` rocks, every other one already processed.
fn seeded_store(rt: &Runtime, total: usize) -> InMemoryRockStore {
    let store = InMemoryRockStore::new();
    rt.block_on(async {
        for i in 0..total {
            let mut record = armed(format!("rock-{i}"), RetryBudget::Remaining(3));
            if i % 2 == 0 {
                record.done();
            }
            store
                .append(&record, ExpectedVersion::Exact(0))
                .await
                .expect("seed append");
        }
    });
    store
}

fn bench_record_append_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("record_append_throughput");

    for versions in [1u64, 10, 100].iter() {
        group.throughput(Throughput::Elements(*versions));
        group.bench_with_input(
            BenchmarkId::new("versions_per_rock", versions),
            versions,
            |b, &count| {
                let mut n = 0u64;
                b.iter(|| {
                    let store = InMemoryRockStore::new();
                    n += 1;
                    let mut record = armed(format!("rock-{n}"), RetryBudget::Unlimited);
                    rt.block_on(async {
                        for v in 0..count {
                            let stored = store
                                .append(&record, ExpectedVersion::Exact(v))
                                .await
                                .expect("append");
                            record = stored.into_record();
                        }
                    });
                    black_box(record.clone());
                });
            },
        );
    }

    group.finish();
}

fn bench_recovery_scan(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("recovery_scan");

    for total in [100usize, 1_000, 10_000].iter() {
        let store = seeded_store(&rt, *total);
        group.throughput(Throughput::Elements(*total as u64));
        group.bench_with_input(BenchmarkId::new("pending_ids", total), total, |b, _| {
            b.iter(|| black_box(rt.block_on(store.pending_ids()).expect("scan")));
        });
    }

    group.finish();
}

fn bench_hurl_to_notification(c: &mut Criterion) {
    let rt = runtime();
    let notifications: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    let mut events = notifications.subscribe();
    let registry = CommandRegistry::new().with_handler("*", |args| async move { Ok(args.unwrap_or(JsonValue::Null)) });
    let queue = Blackrock::new(
        Arc::new(InMemoryRockStore::new()),
        Arc::new(registry),
        notifications,
        BlackrockConfig::default().with_auto_recover(false),
    );
    rt.block_on(queue.init()).expect("init");

    let mut n = 0u64;
    c.bench_function("hurl_to_notification_latency", |b| {
        b.iter(|| {
            n += 1;
            let base = format!("rock-{n}");
            rt.block_on(async {
                queue
                    .hurl(&base, "bench", "bench.run", Some(json!({"n": n})), None)
                    .await
                    .expect("hurl");
                black_box(events.recv().await.expect("notification"));
            });
        });
    });
}

criterion_group!(
    benches,
    bench_record_append_throughput,
    bench_recovery_scan,
    bench_hurl_to_notification
);
criterion_main!(benches);
