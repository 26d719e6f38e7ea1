//! Measures and measurements
//!
//! A [`MeasureDesc`] names a quantity the application records. Descriptors are
//! shared as `Arc<MeasureDesc>` and compared by pointer identity, so a
//! different descriptor that happens to reuse a registered name is rejected
//! when recording.

use super::error::StatsError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Value kind of a measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKind {
    Int64,
    Float64,
    Bool,
    String,
}

impl MeasureKind {
    /// True for kinds that can feed sum and distribution aggregations
    pub fn is_numeric(&self) -> bool {
        matches!(self, MeasureKind::Int64 | MeasureKind::Float64)
    }
}

impl std::fmt::Display for MeasureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MeasureKind::Int64 => "int64",
            MeasureKind::Float64 => "float64",
            MeasureKind::Bool => "bool",
            MeasureKind::String => "string",
        };
        f.write_str(name)
    }
}

/// Payload of a single measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasureValue {
    Int64(i64),
    Float64(f64),
    Bool(bool),
    String(String),
}

impl MeasureValue {
    pub fn kind(&self) -> MeasureKind {
        match self {
            MeasureValue::Int64(_) => MeasureKind::Int64,
            MeasureValue::Float64(_) => MeasureKind::Float64,
            MeasureValue::Bool(_) => MeasureKind::Bool,
            MeasureValue::String(_) => MeasureKind::String,
        }
    }

    /// Numeric value as f64; `None` for bool and string payloads
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MeasureValue::Int64(i) => Some(*i as f64),
            MeasureValue::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MeasureValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MeasureValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MeasureValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for MeasureValue {
    fn from(v: i64) -> Self {
        MeasureValue::Int64(v)
    }
}

impl From<f64> for MeasureValue {
    fn from(v: f64) -> Self {
        MeasureValue::Float64(v)
    }
}

impl From<bool> for MeasureValue {
    fn from(v: bool) -> Self {
        MeasureValue::Bool(v)
    }
}

impl From<String> for MeasureValue {
    fn from(v: String) -> Self {
        MeasureValue::String(v)
    }
}

impl From<&str> for MeasureValue {
    fn from(v: &str) -> Self {
        MeasureValue::String(v.to_string())
    }
}

/// Descriptor of a recorded quantity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureDesc {
    name: String,
    description: String,
    unit: String,
    kind: MeasureKind,
}

impl MeasureDesc {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        kind: MeasureKind,
    ) -> Arc<Self> {
        Arc::new(MeasureDesc {
            name: name.into(),
            description: description.into(),
            unit: unit.into(),
            kind,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn kind(&self) -> MeasureKind {
        self.kind
    }
}

/// One value recorded against a measure
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    measure: Arc<MeasureDesc>,
    value: MeasureValue,
}

impl Measurement {
    /// Create a measurement, checking the value against the measure's kind
    ///
    /// Float64 measures also accept Int64 values, which are widened.
    pub fn new(
        measure: &Arc<MeasureDesc>,
        value: impl Into<MeasureValue>,
    ) -> Result<Self, StatsError> {
        let value = match (measure.kind, value.into()) {
            (MeasureKind::Float64, MeasureValue::Int64(i)) => MeasureValue::Float64(i as f64),
            (expected, value) if value.kind() != expected => {
                return Err(StatsError::ValueKindMismatch {
                    measure: measure.name.clone(),
                    expected,
                    actual: value.kind(),
                });
            }
            (_, value) => value,
        };
        Ok(Measurement {
            measure: Arc::clone(measure),
            value,
        })
    }

    pub fn measure(&self) -> &Arc<MeasureDesc> {
        &self.measure
    }

    pub fn value(&self) -> &MeasureValue {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_kind_checked() {
        let latency = MeasureDesc::new("rpc.latency", "RPC latency", "ms", MeasureKind::Float64);
        let m = Measurement::new(&latency, 12.5).unwrap();
        assert_eq!(m.value().as_f64(), Some(12.5));
        assert!(Arc::ptr_eq(m.measure(), &latency));

        let err = Measurement::new(&latency, "slow").unwrap_err();
        assert!(matches!(
            err,
            StatsError::ValueKindMismatch {
                expected: MeasureKind::Float64,
                actual: MeasureKind::String,
                ..
            }
        ));
    }

    #[test]
    fn test_int_widened_for_float_measure() {
        let latency = MeasureDesc::new("rpc.latency", "", "ms", MeasureKind::Float64);
        let m = Measurement::new(&latency, 7i64).unwrap();
        assert_eq!(m.value(), &MeasureValue::Float64(7.0));

        let bytes = MeasureDesc::new("rpc.bytes", "", "By", MeasureKind::Int64);
        assert!(Measurement::new(&bytes, 7.0).is_err());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(MeasureValue::Int64(3).as_f64(), Some(3.0));
        assert_eq!(MeasureValue::Bool(true).as_f64(), None);
        assert_eq!(MeasureValue::from("up").as_str(), Some("up"));
        assert_eq!(MeasureValue::from(false).as_bool(), Some(false));
        assert!(MeasureKind::Int64.is_numeric());
        assert!(!MeasureKind::Bool.is_numeric());
    }
}
