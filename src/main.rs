//! viewstats demo driver
//!
//! Usage:
//!   cargo run --bin viewstats-demo [config.toml]
//!
//! Registers an RPC latency measure with a per-method distribution view and
//! an untagged count view, records randomized samples through the worker,
//! forces one report round and prints the delivered snapshots as JSON.

use rand::Rng;
use tracing::info;

use viewstats::observability::init_tracing;
use viewstats::stats::{
    spawn_worker, AggregationDesc, MeasureDesc, MeasureKind, Measurement, TagSet, ViewDesc,
};
use viewstats::StatsConfig;

const METHODS: [&str; 3] = ["GET", "PUT", "DELETE"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => StatsConfig::from_file(path)?,
        None => StatsConfig::from_env(),
    };
    init_tracing(&config.log);

    let (stats, worker) = spawn_worker(&config)?;

    let latency = MeasureDesc::new(
        "rpc.latency",
        "RPC round-trip time",
        "ms",
        MeasureKind::Float64,
    );
    stats.register_measure(latency.clone()).await?;

    let by_method = ViewDesc::new(
        "rpc.latency.by_method",
        "Latency distribution per RPC method",
        "rpc.latency",
        vec!["method".to_string()],
        AggregationDesc::Distribution {
            bounds: vec![1.0, 5.0, 10.0, 50.0, 100.0],
        },
    );
    let total = ViewDesc::new(
        "rpc.latency.count",
        "Number of RPCs",
        "rpc.latency",
        vec![],
        AggregationDesc::Count,
    );
    stats.register_view(by_method.clone()).await?;
    stats.register_view(total.clone()).await?;

    let (tx, mut rx) = stats.subscriber_channel();
    stats.subscribe(by_method.name(), tx.clone()).await?;
    stats.subscribe(total.name(), tx).await?;

    let mut rng = rand::thread_rng();
    for i in 0..1000 {
        let method = METHODS[rng.gen_range(0..METHODS.len())];
        let tags = TagSet::empty()
            .with("method", method)
            .with("host", format!("web{:02}", i % 4));
        let value: f64 = rng.gen_range(0.1..120.0);
        stats.record(tags, vec![Measurement::new(&latency, value)?])?;
    }

    let delivered = stats.report_now().await?;
    info!(delivered, "report round complete");

    for _ in 0..delivered {
        if let Some(view) = rx.recv().await {
            println!("{}", serde_json::to_string_pretty(&*view)?);
        }
    }

    stats.shutdown().await?;
    worker.await?;
    Ok(())
}
