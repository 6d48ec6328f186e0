//! Error types for observe-core.
//!
//! Contract violations fail fast: invalid histogram plans and metric
//! registration conflicts are returned to the caller, never degraded.

use std::time::Duration;

use thiserror::Error;

/// Rejected inputs to the bucket planner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Bucket count must be at least 1, got {0}")]
    InvalidBucketCount(usize),

    #[error("Bucket count {requested} exceeds the limit of {max}")]
    TooManyBuckets { requested: usize, max: usize },

    #[error("Log-linear spacing requires a positive minimum duration")]
    NonPositiveMinimum,

    #[error("Maximum duration {max:?} is below minimum duration {min:?}")]
    InvertedRange { min: Duration, max: Duration },
}

/// Errors reported by a metrics backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("Metric {name} already registered with incompatible metadata: {reason}")]
    Conflict { name: String, reason: String },

    #[error("Label set rejected for {name}: {reason}")]
    LabelRejected { name: String, reason: String },

    #[error("Metrics backend error: {0}")]
    Backend(String),
}

/// Errors surfaced when building observations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserveError {
    #[error("Invalid histogram plan for {name}: {source}")]
    Plan {
        name: String,
        #[source]
        source: PlanError,
    },

    #[error("Failed to register metrics for {name}: {source}")]
    Registration {
        name: String,
        #[source]
        source: SinkError,
    },

    #[error("Operation name is empty")]
    EmptyName,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ObserveError {
    /// Returns true if the error came from the metrics backend rather than
    /// from the caller's own plan or configuration.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Registration { .. })
    }
}
