//! Views
//!
//! A [`ViewDesc`] is the immutable configuration of an aggregation over one
//! measure. Once registered, the registry pairs it with a [`ViewState`] that
//! holds the registration time, the live signature -> aggregator map and the
//! subscriber channels. A [`View`] is an owned snapshot of that state.

use super::aggregator::{
    Aggregator, AggregatorKind, AggregatorStats, CountAggregator, DistributionAggregator,
    GaugeAggregator, SumAggregator,
};
use super::error::StatsError;
use super::measure::{MeasureDesc, MeasureKind, Measurement};
use super::tags::TagSet;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Channel a subscriber receives view snapshots on
pub type ViewSender = mpsc::Sender<Arc<View>>;

/// How a view aggregates the samples of each tag signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationDesc {
    Count,
    Sum,
    /// Histogram with strictly ascending bucket bounds
    Distribution { bounds: Vec<f64> },
    GaugeBool,
    GaugeString,
    GaugeInt64,
    GaugeFloat64,
}

impl AggregationDesc {
    pub fn kind(&self) -> AggregatorKind {
        match self {
            AggregationDesc::Count => AggregatorKind::Count,
            AggregationDesc::Sum => AggregatorKind::Sum,
            AggregationDesc::Distribution { .. } => AggregatorKind::Distribution,
            AggregationDesc::GaugeBool => AggregatorKind::GaugeBool,
            AggregationDesc::GaugeString => AggregatorKind::GaugeString,
            AggregationDesc::GaugeInt64 => AggregatorKind::GaugeInt64,
            AggregationDesc::GaugeFloat64 => AggregatorKind::GaugeFloat64,
        }
    }

    /// Create a fresh aggregator for a new tag signature
    pub fn create_aggregator(&self) -> Aggregator {
        match self {
            AggregationDesc::Count => Aggregator::Count(CountAggregator::default()),
            AggregationDesc::Sum => Aggregator::Sum(SumAggregator::default()),
            AggregationDesc::Distribution { bounds } => {
                Aggregator::Distribution(DistributionAggregator::new(bounds.clone()))
            }
            AggregationDesc::GaugeBool => Aggregator::GaugeBool(GaugeAggregator::default()),
            AggregationDesc::GaugeString => Aggregator::GaugeString(GaugeAggregator::default()),
            AggregationDesc::GaugeInt64 => Aggregator::GaugeInt64(GaugeAggregator::default()),
            AggregationDesc::GaugeFloat64 => Aggregator::GaugeFloat64(GaugeAggregator::default()),
        }
    }

    fn accepts(&self, kind: MeasureKind) -> bool {
        match self {
            AggregationDesc::Count => true,
            AggregationDesc::Sum | AggregationDesc::Distribution { .. } => kind.is_numeric(),
            AggregationDesc::GaugeBool => kind == MeasureKind::Bool,
            AggregationDesc::GaugeString => kind == MeasureKind::String,
            AggregationDesc::GaugeInt64 => kind == MeasureKind::Int64,
            AggregationDesc::GaugeFloat64 => kind == MeasureKind::Float64,
        }
    }
}

/// Immutable view configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDesc {
    name: String,
    description: String,
    measure_name: String,
    tag_keys: Vec<String>,
    aggregation: AggregationDesc,
}

impl ViewDesc {
    /// Create a view; an empty `tag_keys` aggregates every sample together
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        measure_name: impl Into<String>,
        tag_keys: Vec<String>,
        aggregation: AggregationDesc,
    ) -> Arc<Self> {
        Arc::new(ViewDesc {
            name: name.into(),
            description: description.into(),
            measure_name: measure_name.into(),
            tag_keys,
            aggregation,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn measure_name(&self) -> &str {
        &self.measure_name
    }

    pub fn tag_keys(&self) -> &[String] {
        &self.tag_keys
    }

    pub fn aggregation(&self) -> &AggregationDesc {
        &self.aggregation
    }

    /// Check the configuration against the measure it will aggregate
    pub fn validate(&self, measure: &MeasureDesc) -> Result<(), StatsError> {
        if !self.aggregation.accepts(measure.kind()) {
            return Err(self.invalid(format!(
                "{} aggregation cannot consume {} measure {}",
                self.aggregation.kind(),
                measure.kind(),
                measure.name()
            )));
        }

        if let AggregationDesc::Distribution { bounds } = &self.aggregation {
            if let Some(b) = bounds.iter().find(|b| !b.is_finite()) {
                return Err(self.invalid(format!("bucket bound {} is not finite", b)));
            }
            if let Some(w) = bounds.windows(2).find(|w| w[0] >= w[1]) {
                return Err(self.invalid(format!(
                    "bucket bounds must be strictly ascending, got {} before {}",
                    w[0], w[1]
                )));
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> StatsError {
        StatsError::InvalidView {
            name: self.name.clone(),
            reason,
        }
    }
}

/// Live state of a registered view
#[derive(Debug)]
pub struct ViewState {
    desc: Arc<ViewDesc>,
    start_ms: u64,
    signatures: AHashMap<Vec<u8>, Aggregator>,
    subscribers: Vec<ViewSender>,
}

impl ViewState {
    pub(crate) fn new(desc: Arc<ViewDesc>, start_ms: u64) -> Self {
        ViewState {
            desc,
            start_ms,
            signatures: AHashMap::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn desc(&self) -> &Arc<ViewDesc> {
        &self.desc
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    /// Number of distinct tag signatures seen so far
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn subscribers(&self) -> &[ViewSender] {
        &self.subscribers
    }

    /// Route a measurement to the aggregator for its tag signature,
    /// creating the aggregator on first use
    pub(crate) fn add(
        &mut self,
        tags: &TagSet,
        m: &Measurement,
        now_ms: u64,
    ) -> Result<(), StatsError> {
        let sig = tags.values_signature(&self.desc.tag_keys);
        let aggregation = &self.desc.aggregation;
        self.signatures
            .entry(sig)
            .or_insert_with(|| aggregation.create_aggregator())
            .add_sample(m, now_ms)
    }

    pub(crate) fn subscribe(&mut self, tx: ViewSender) -> Result<(), StatsError> {
        if self.subscribers.iter().any(|s| s.same_channel(&tx)) {
            return Err(StatsError::AlreadySubscribed {
                view: self.desc.name.clone(),
            });
        }
        self.subscribers.push(tx);
        Ok(())
    }

    pub(crate) fn unsubscribe(&mut self, tx: &ViewSender) -> Result<(), StatsError> {
        let pos = self
            .subscribers
            .iter()
            .position(|s| s.same_channel(tx))
            .ok_or_else(|| StatsError::NotSubscribed {
                view: self.desc.name.clone(),
            })?;
        self.subscribers.swap_remove(pos);
        Ok(())
    }

    /// Drop subscribers whose receiver has gone away; returns how many
    pub(crate) fn prune_closed(&mut self) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| !s.is_closed());
        before - self.subscribers.len()
    }

    /// Snapshot every aggregation of this view
    pub fn retrieve_view(&self, now_ms: u64) -> Result<View, StatsError> {
        let expected = self.desc.aggregation.kind();
        let mut entries: Vec<(&Vec<u8>, &Aggregator)> = self.signatures.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let mut aggregations = Vec::with_capacity(entries.len());
        for (sig, agg) in entries {
            let tags = TagSet::from_values_signature(sig, &self.desc.tag_keys)?;
            if agg.kind() != expected {
                return Err(StatsError::AggregatorMismatch {
                    view: self.desc.name.clone(),
                    expected,
                    actual: agg.kind(),
                });
            }
            aggregations.push(Aggregation {
                tags,
                stats: agg.retrieve_collected(),
            });
        }

        Ok(View {
            desc: Arc::clone(&self.desc),
            start_ms: self.start_ms,
            end_ms: now_ms,
            aggregations,
        })
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, sig: Vec<u8>, agg: Aggregator) {
        self.signatures.insert(sig, agg);
    }
}

/// Statistics for one distinct tag combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub tags: TagSet,
    pub stats: AggregatorStats,
}

/// Point-in-time snapshot of a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub desc: Arc<ViewDesc>,
    /// Registration time of the view (aggregation window start)
    pub start_ms: u64,
    /// Time the snapshot was taken
    pub end_ms: u64,
    pub aggregations: Vec<Aggregation>,
}

impl View {
    /// Find the aggregation whose tags equal `tags`
    pub fn aggregation_for(&self, tags: &TagSet) -> Option<&Aggregation> {
        self.aggregations.iter().find(|a| &a.tags == tags)
    }
}
