//! Aggregators
//!
//! One aggregator exists per (view, tag signature). Each folds samples into a
//! running summary and never keeps raw samples. `retrieve_collected` returns
//! an owned snapshot that later samples do not affect.

use super::error::StatsError;
use super::measure::{MeasureKind, MeasureValue, Measurement};
use serde::{Deserialize, Serialize};

/// Kind of aggregator, used to check an aggregator against its view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorKind {
    Count,
    Sum,
    Distribution,
    GaugeBool,
    GaugeString,
    GaugeInt64,
    GaugeFloat64,
}

impl std::fmt::Display for AggregatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregatorKind::Count => "count",
            AggregatorKind::Sum => "sum",
            AggregatorKind::Distribution => "distribution",
            AggregatorKind::GaugeBool => "gauge_bool",
            AggregatorKind::GaugeString => "gauge_string",
            AggregatorKind::GaugeInt64 => "gauge_int64",
            AggregatorKind::GaugeFloat64 => "gauge_float64",
        };
        f.write_str(name)
    }
}

/// Result of a count aggregation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountStats {
    pub count: u64,
}

/// Result of a sum aggregation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SumStats {
    pub sum: f64,
    pub count: u64,
}

/// Distribution of numeric samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionStats {
    pub count: u64,
    pub min: f64,
    /// `sum / count`, computed at snapshot time; 0 when empty
    pub mean: f64,
    pub max: f64,
    pub sum: f64,
    /// Occurrences per bucket. With bounds `b1 < .. < bm` there are `m + 1`
    /// buckets: `(-inf, b1)`, `[b1, b2)`, .., `[bm, +inf)`.
    pub count_per_bucket: Vec<u64>,
}

/// Last value seen by a gauge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeStats<T> {
    pub value: T,
    pub count: u64,
    /// Timestamp of the sample that set `value`
    pub updated_ms: u64,
}

/// Snapshot produced by an [`Aggregator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregatorStats {
    Count(CountStats),
    Sum(SumStats),
    Distribution(DistributionStats),
    GaugeBool(GaugeStats<bool>),
    GaugeString(GaugeStats<String>),
    GaugeInt64(GaugeStats<i64>),
    GaugeFloat64(GaugeStats<f64>),
}

impl AggregatorStats {
    pub fn kind(&self) -> AggregatorKind {
        match self {
            AggregatorStats::Count(_) => AggregatorKind::Count,
            AggregatorStats::Sum(_) => AggregatorKind::Sum,
            AggregatorStats::Distribution(_) => AggregatorKind::Distribution,
            AggregatorStats::GaugeBool(_) => AggregatorKind::GaugeBool,
            AggregatorStats::GaugeString(_) => AggregatorKind::GaugeString,
            AggregatorStats::GaugeInt64(_) => AggregatorKind::GaugeInt64,
            AggregatorStats::GaugeFloat64(_) => AggregatorKind::GaugeFloat64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CountAggregator {
    count: u64,
}

impl CountAggregator {
    pub fn add_sample(&mut self) {
        self.count += 1;
    }

    pub fn retrieve_collected(&self) -> CountStats {
        CountStats { count: self.count }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SumAggregator {
    sum: f64,
    count: u64,
}

impl SumAggregator {
    pub fn add_sample(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
    }

    pub fn retrieve_collected(&self) -> SumStats {
        SumStats {
            sum: self.sum,
            count: self.count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DistributionAggregator {
    bounds: Vec<f64>,
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
    count_per_bucket: Vec<u64>,
}

impl DistributionAggregator {
    /// `bounds` must be strictly ascending; views check this at registration
    pub fn new(bounds: Vec<f64>) -> Self {
        let buckets = bounds.len() + 1;
        DistributionAggregator {
            bounds,
            count: 0,
            min: f64::MAX,
            max: f64::MIN,
            sum: 0.0,
            count_per_bucket: vec![0; buckets],
        }
    }

    pub fn add_sample(&mut self, v: f64) {
        if v < self.min {
            self.min = v;
        }
        if v > self.max {
            self.max = v;
        }
        self.sum += v;
        self.count += 1;

        // First bound strictly greater than the value wins; a value equal to
        // a bound lands in the bucket that bound opens.
        let bucket = self
            .bounds
            .iter()
            .position(|&b| v < b)
            .unwrap_or(self.bounds.len());
        self.count_per_bucket[bucket] += 1;
    }

    pub fn retrieve_collected(&self) -> DistributionStats {
        let mean = if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        };
        DistributionStats {
            count: self.count,
            min: self.min,
            mean,
            max: self.max,
            sum: self.sum,
            count_per_bucket: self.count_per_bucket.clone(),
        }
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }
}

/// Last-value aggregator, generic over the gauge's value type
#[derive(Debug, Clone, Default)]
pub struct GaugeAggregator<T> {
    last: Option<T>,
    count: u64,
    updated_ms: u64,
}

impl<T: Clone + Default> GaugeAggregator<T> {
    pub fn add_sample(&mut self, value: T, now_ms: u64) {
        self.last = Some(value);
        self.count += 1;
        self.updated_ms = now_ms;
    }

    pub fn retrieve_collected(&self) -> GaugeStats<T> {
        GaugeStats {
            value: self.last.clone().unwrap_or_default(),
            count: self.count,
            updated_ms: self.updated_ms,
        }
    }
}

/// Running aggregation state for one tag signature of one view
#[derive(Debug, Clone)]
pub enum Aggregator {
    Count(CountAggregator),
    Sum(SumAggregator),
    Distribution(DistributionAggregator),
    GaugeBool(GaugeAggregator<bool>),
    GaugeString(GaugeAggregator<String>),
    GaugeInt64(GaugeAggregator<i64>),
    GaugeFloat64(GaugeAggregator<f64>),
}

impl Aggregator {
    pub fn kind(&self) -> AggregatorKind {
        match self {
            Aggregator::Count(_) => AggregatorKind::Count,
            Aggregator::Sum(_) => AggregatorKind::Sum,
            Aggregator::Distribution(_) => AggregatorKind::Distribution,
            Aggregator::GaugeBool(_) => AggregatorKind::GaugeBool,
            Aggregator::GaugeString(_) => AggregatorKind::GaugeString,
            Aggregator::GaugeInt64(_) => AggregatorKind::GaugeInt64,
            Aggregator::GaugeFloat64(_) => AggregatorKind::GaugeFloat64,
        }
    }

    /// Fold one measurement into the running state
    ///
    /// Fails without mutating if the measurement's value cannot feed this
    /// aggregator.
    pub fn add_sample(&mut self, m: &Measurement, now_ms: u64) -> Result<(), StatsError> {
        let value = m.value();
        match self {
            Aggregator::Count(agg) => agg.add_sample(),
            Aggregator::Sum(agg) => agg.add_sample(numeric(m, value)?),
            Aggregator::Distribution(agg) => agg.add_sample(numeric(m, value)?),
            Aggregator::GaugeBool(agg) => match value {
                MeasureValue::Bool(b) => agg.add_sample(*b, now_ms),
                other => return Err(mismatch(m, MeasureKind::Bool, other)),
            },
            Aggregator::GaugeString(agg) => match value {
                MeasureValue::String(s) => agg.add_sample(s.clone(), now_ms),
                other => return Err(mismatch(m, MeasureKind::String, other)),
            },
            Aggregator::GaugeInt64(agg) => match value {
                MeasureValue::Int64(i) => agg.add_sample(*i, now_ms),
                other => return Err(mismatch(m, MeasureKind::Int64, other)),
            },
            Aggregator::GaugeFloat64(agg) => agg.add_sample(numeric(m, value)?, now_ms),
        }
        Ok(())
    }

    pub fn retrieve_collected(&self) -> AggregatorStats {
        match self {
            Aggregator::Count(agg) => AggregatorStats::Count(agg.retrieve_collected()),
            Aggregator::Sum(agg) => AggregatorStats::Sum(agg.retrieve_collected()),
            Aggregator::Distribution(agg) => {
                AggregatorStats::Distribution(agg.retrieve_collected())
            }
            Aggregator::GaugeBool(agg) => AggregatorStats::GaugeBool(agg.retrieve_collected()),
            Aggregator::GaugeString(agg) => AggregatorStats::GaugeString(agg.retrieve_collected()),
            Aggregator::GaugeInt64(agg) => AggregatorStats::GaugeInt64(agg.retrieve_collected()),
            Aggregator::GaugeFloat64(agg) => {
                AggregatorStats::GaugeFloat64(agg.retrieve_collected())
            }
        }
    }
}

fn numeric(m: &Measurement, value: &MeasureValue) -> Result<f64, StatsError> {
    value
        .as_f64()
        .ok_or_else(|| mismatch(m, MeasureKind::Float64, value))
}

fn mismatch(m: &Measurement, expected: MeasureKind, actual: &MeasureValue) -> StatsError {
    StatsError::ValueKindMismatch {
        measure: m.measure().name().to_string(),
        expected,
        actual: actual.kind(),
    }
}
