//! Error types for the stats engine
//!
//! Every public registry operation returns `Result<_, StatsError>`. Failed
//! operations leave the registry untouched.

use super::aggregator::AggregatorKind;
use super::measure::MeasureKind;
use super::tags::SignatureError;

/// Error returned by registry, view and worker operations
#[derive(Debug, Clone, PartialEq)]
pub enum StatsError {
    /// A measure with this name is already registered
    DuplicateMeasure { name: String },
    /// A view with this name is already registered
    DuplicateView { name: String },
    /// No measure with this name is registered
    UnknownMeasure { name: String },
    /// No view with this name is registered
    UnknownView { name: String },
    /// The measure registered under this name is not the one the caller holds
    MeasureMismatch { name: String },
    /// The view registered under this name is not the one the caller holds
    ViewMismatch { name: String },
    /// The view configuration was rejected at registration
    InvalidView { name: String, reason: String },
    /// A stored tag signature could not be decoded
    Signature(SignatureError),
    /// An aggregator's kind differs from what its view declares
    AggregatorMismatch {
        view: String,
        expected: AggregatorKind,
        actual: AggregatorKind,
    },
    /// A value does not fit the measure or aggregator it was handed to
    ValueKindMismatch {
        measure: String,
        expected: MeasureKind,
        actual: MeasureKind,
    },
    /// The channel is already subscribed to this view
    AlreadySubscribed { view: String },
    /// The channel is not subscribed to this view
    NotSubscribed { view: String },
    /// The stats worker has stopped
    WorkerClosed,
}

impl std::fmt::Display for StatsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsError::DuplicateMeasure { name } => {
                write!(f, "a measure with the name {} is already registered", name)
            }
            StatsError::DuplicateView { name } => {
                write!(f, "a view with the name {} is already registered", name)
            }
            StatsError::UnknownMeasure { name } => {
                write!(f, "no measure with the name {} is registered", name)
            }
            StatsError::UnknownView { name } => {
                write!(f, "no view with the name {} is registered", name)
            }
            StatsError::MeasureMismatch { name } => write!(
                f,
                "measure {} was not registered or was replaced after registration",
                name
            ),
            StatsError::ViewMismatch { name } => {
                write!(f, "a different view was registered with the name {}", name)
            }
            StatsError::InvalidView { name, reason } => {
                write!(f, "invalid view {}: {}", name, reason)
            }
            StatsError::Signature(e) => write!(f, "malformed tag signature: {}", e),
            StatsError::AggregatorMismatch {
                view,
                expected,
                actual,
            } => write!(
                f,
                "unexpected aggregator in view {}: got {}, want {}",
                view, actual, expected
            ),
            StatsError::ValueKindMismatch {
                measure,
                expected,
                actual,
            } => write!(
                f,
                "measure {} expects {} values, got {}",
                measure, expected, actual
            ),
            StatsError::AlreadySubscribed { view } => {
                write!(f, "channel is already subscribed to view {}", view)
            }
            StatsError::NotSubscribed { view } => {
                write!(f, "channel is not subscribed to view {}", view)
            }
            StatsError::WorkerClosed => write!(f, "stats worker is not running"),
        }
    }
}

impl std::error::Error for StatsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatsError::Signature(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SignatureError> for StatsError {
    fn from(e: SignatureError) -> Self {
        StatsError::Signature(e)
    }
}
