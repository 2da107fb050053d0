//! Bucket Assignment Benchmarks
//!
//! Measures insert throughput through the catalog and assigner on a single
//! hot key, across many keys, and end to end through the persistence queue.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kuba_buckets::bucket::Bucket;
use kuba_buckets::collection::Collection;
use kuba_buckets::storage::{BucketSink, PersistTicket};
use kuba_buckets::types::{GroupingKey, Measurement};
use kuba_buckets::{EngineConfig, Granularity, TimeseriesDatabase, TimeseriesOptions};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;

const BATCH: usize = 10_000;

/// Sink that drops closed buckets
struct NullSink;

impl BucketSink for NullSink {
    fn hand_off(&self, bucket: Bucket) -> PersistTicket {
        PersistTicket::completed(bucket.id(), Ok(()))
    }
}

// =============================================================================
// Test Data Generators
// =============================================================================

/// One measurement per second on a single key
fn create_hot_key(count: usize) -> Vec<Measurement> {
    (0..count)
        .map(|i| Measurement::new(GroupingKey::Global, i as i64 * 1000))
        .collect()
}

/// Round-robin over `keys` sensors, one measurement per second each
fn create_many_keys(count: usize, keys: usize) -> Vec<Measurement> {
    (0..count)
        .map(|i| {
            let key = GroupingKey::from_meta(&json!({ "sensor": i % keys }));
            Measurement::new(key, (i / keys) as i64 * 1000)
        })
        .collect()
}

fn collection(granularity: Granularity) -> Collection {
    Collection::new(
        "bench",
        TimeseriesOptions::new("t").with_granularity(granularity),
        Arc::new(NullSink),
    )
    .expect("create collection")
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_hot_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("hot_key");
    group.throughput(Throughput::Elements(BATCH as u64));

    for granularity in Granularity::ALL {
        let data = create_hot_key(BATCH);
        group.bench_with_input(
            BenchmarkId::from_parameter(granularity),
            &data,
            |b, data| {
                b.iter(|| {
                    let coll = collection(granularity);
                    for m in data.iter().cloned() {
                        black_box(coll.insert(m).expect("insert"));
                    }
                    coll.bucket_count()
                })
            },
        );
    }
    group.finish();
}

fn bench_many_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("many_keys");
    group.throughput(Throughput::Elements(BATCH as u64));

    for keys in [10usize, 100, 1000] {
        let data = create_many_keys(BATCH, keys);
        group.bench_with_input(BenchmarkId::from_parameter(keys), &data, |b, data| {
            b.iter(|| {
                let coll = collection(Granularity::Seconds);
                for m in data.iter().cloned() {
                    black_box(coll.insert(m).expect("insert"));
                }
                coll.bucket_count()
            })
        });
    }
    group.finish();
}

fn bench_documents(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let docs: Vec<_> = (0..BATCH)
        .map(|i| json!({ "t": i as i64 * 1000, "host": format!("h{}", i % 16), "cpu": 0.5 }))
        .collect();

    let mut group = c.benchmark_group("documents");
    group.throughput(Throughput::Elements(BATCH as u64));
    group.bench_function("insert_and_flush", |b| {
        b.to_async(&rt).iter(|| async {
            let db = TimeseriesDatabase::in_memory(EngineConfig::default());
            db.create_collection("bench", TimeseriesOptions::new("t").with_meta_field("host"))
                .expect("create collection");
            for doc in &docs {
                black_box(db.insert("bench", doc).expect("insert"));
            }
            db.flush("bench").await.expect("flush");
            db.shutdown().await;
        })
    });
    group.finish();
}

criterion_group!(benches, bench_hot_key, bench_many_keys, bench_documents);
criterion_main!(benches);
