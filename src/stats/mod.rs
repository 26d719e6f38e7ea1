//! View-Based Stats Aggregation
//!
//! Application code declares *measures* (quantities it records) and *views*
//! (aggregations over a measure, broken down by tag keys). The registry routes
//! each measurement to one aggregator per view, chosen by the tag signature of
//! the view's keys, and produces immutable [`View`] snapshots on demand.
//!
//! - [`Registry`] - single-writer registry and recording path
//! - [`SharedRegistry`] - mutex-guarded handle for multi-threaded callers
//! - [`StatsHandle`] - message-passing front end to a [`StatsWorker`]

mod aggregator;
mod error;
mod measure;
mod registry;
mod tags;
mod view;
mod worker;

pub use aggregator::{
    Aggregator, AggregatorKind, AggregatorStats, CountAggregator, CountStats,
    DistributionAggregator, DistributionStats, GaugeAggregator, GaugeStats, SumAggregator,
    SumStats,
};
pub use error::StatsError;
pub use measure::{MeasureDesc, MeasureKind, MeasureValue, Measurement};
pub use registry::{Registry, SharedRegistry};
pub use tags::{SignatureError, TagSet};
pub use view::{Aggregation, AggregationDesc, View, ViewDesc, ViewSender, ViewState};
pub use worker::{now_ms, spawn_worker, StatsHandle, StatsMessage, StatsWorker};
