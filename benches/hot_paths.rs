//! Hot path benchmarks for the recording path.
//!
//! Run with: `cargo bench --bench hot_paths`
//!
//! Measures tag signature encoding and `Registry::record` fan-out, which run
//! on every instrumented call site.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use viewstats::stats::{
    AggregationDesc, MeasureDesc, MeasureKind, Measurement, Registry, TagSet, ViewDesc,
};

/// Benchmark TagSet::values_signature with growing key lists
fn bench_signature(c: &mut Criterion) {
    let mut group = c.benchmark_group("values_signature");
    group.throughput(Throughput::Elements(1));

    for key_count in [1, 4, 16] {
        let keys: Vec<String> = (0..key_count).map(|i| format!("key{}", i)).collect();
        let tags: TagSet = keys
            .iter()
            .map(|k| (k.clone(), format!("value-of-{}", k)))
            .collect();

        group.bench_function(format!("keys_{}", key_count), |b| {
            b.iter(|| black_box(&tags).values_signature(black_box(&keys)))
        });
    }

    group.finish();
}

/// Benchmark Registry::record against one to many views
fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("record");
    group.throughput(Throughput::Elements(1));

    for view_count in [1, 8] {
        let mut registry = Registry::new();
        let latency = MeasureDesc::new("rpc.latency", "", "ms", MeasureKind::Float64);
        registry.register_measure(latency.clone()).unwrap();
        for i in 0..view_count {
            let view = ViewDesc::new(
                format!("view{}", i),
                "",
                "rpc.latency",
                vec!["method".to_string(), "status".to_string()],
                AggregationDesc::Distribution {
                    bounds: vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0],
                },
            );
            registry.register_view(view, 0).unwrap();
        }

        let tags = TagSet::from_pairs(&[("method", "GET"), ("status", "200"), ("host", "web01")]);
        let m = Measurement::new(&latency, 42.0).unwrap();

        group.bench_function(format!("views_{}", view_count), |b| {
            b.iter(|| registry.record(black_box(1), black_box(&tags), black_box(&m)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_signature, bench_record);
criterion_main!(benches);
