pub mod config;
pub mod observability;
pub mod stats;

pub use config::{ConfigError, LogConfig, LogFormat, StatsConfig};
pub use stats::{
    AggregationDesc, MeasureDesc, MeasureKind, Measurement, Registry, StatsError, StatsHandle,
    TagSet, View, ViewDesc,
};
