//! Metrics collaborator and the `metrics`-facade backed default.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::Label;

use crate::error::SinkError;

/// A monotonically increasing counter with a fixed label schema.
pub trait CounterHandle: Send + Sync {
    fn increment(&self, labels: &[Label]) -> Result<(), SinkError>;
}

/// A distribution of observed values with fixed bucket boundaries.
pub trait HistogramHandle: Send + Sync {
    fn observe(&self, value: f64, labels: &[Label]) -> Result<(), SinkError>;
}

/// Registers metrics with a backend.
///
/// Registering a name twice with identical metadata returns a handle to the
/// same series; any mismatch is a [`SinkError::Conflict`].
pub trait MetricsSink: Send + Sync {
    fn counter(
        &self,
        name: &str,
        label_names: &[&'static str],
    ) -> Result<Arc<dyn CounterHandle>, SinkError>;

    fn histogram(
        &self,
        name: &str,
        label_names: &[&'static str],
        boundaries: &[f64],
    ) -> Result<Arc<dyn HistogramHandle>, SinkError>;
}

/// Check that `labels` carries exactly the declared keys, in order.
pub(crate) fn check_labels(
    name: &str,
    label_names: &[&'static str],
    labels: &[Label],
) -> Result<(), SinkError> {
    let matches = labels.len() == label_names.len()
        && labels.iter().zip(label_names).all(|(l, n)| l.key() == *n);
    if matches {
        Ok(())
    } else {
        let got: Vec<&str> = labels.iter().map(|l| l.key()).collect();
        Err(SinkError::LabelRejected {
            name: name.to_string(),
            reason: format!("expected labels {label_names:?}, got {got:?}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Registered {
    Counter { labels: Vec<&'static str> },
    Histogram { labels: Vec<&'static str>, boundaries: Vec<f64> },
}

impl Registered {
    fn kind(&self) -> &'static str {
        match self {
            Self::Counter { .. } => "counter",
            Self::Histogram { .. } => "histogram",
        }
    }
}

/// Sink that forwards to whatever recorder is installed for the `metrics` crate.
///
/// Bucket boundaries cannot be pushed through the facade; they are kept here
/// and exposed through [`FacadeSink::boundaries`] for exporter setup. The
/// process-wide instance is `MetricRegistry::global_sink()`.
#[derive(Debug, Default)]
pub struct FacadeSink {
    registered: DashMap<String, Registered>,
}

impl FacadeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boundaries a histogram was registered with.
    pub fn boundaries(&self, name: &str) -> Option<Vec<f64>> {
        match self.registered.get(name)?.value() {
            Registered::Histogram { boundaries, .. } => Some(boundaries.clone()),
            Registered::Counter { .. } => None,
        }
    }

    fn register(&self, name: &str, wanted: Registered) -> Result<bool, SinkError> {
        match self.registered.entry(name.to_string()) {
            Entry::Occupied(existing) if *existing.get() == wanted => Ok(false),
            Entry::Occupied(existing) => Err(SinkError::Conflict {
                name: name.to_string(),
                reason: format!(
                    "registered as {} with different metadata, requested {}",
                    existing.get().kind(),
                    wanted.kind()
                ),
            }),
            Entry::Vacant(slot) => {
                slot.insert(wanted);
                Ok(true)
            }
        }
    }
}

impl MetricsSink for FacadeSink {
    fn counter(
        &self,
        name: &str,
        label_names: &[&'static str],
    ) -> Result<Arc<dyn CounterHandle>, SinkError> {
        let fresh = self.register(name, Registered::Counter { labels: label_names.to_vec() })?;
        if fresh {
            metrics::describe_counter!(name.to_string(), "Total observations by outcome");
        }
        Ok(Arc::new(FacadeCounter {
            name: name.to_string(),
            label_names: label_names.to_vec(),
        }))
    }

    fn histogram(
        &self,
        name: &str,
        label_names: &[&'static str],
        boundaries: &[f64],
    ) -> Result<Arc<dyn HistogramHandle>, SinkError> {
        let fresh = self.register(
            name,
            Registered::Histogram {
                labels: label_names.to_vec(),
                boundaries: boundaries.to_vec(),
            },
        )?;
        if fresh {
            metrics::describe_histogram!(
                name.to_string(),
                metrics::Unit::Seconds,
                "Observation duration by outcome"
            );
        }
        Ok(Arc::new(FacadeHistogram {
            name: name.to_string(),
            label_names: label_names.to_vec(),
        }))
    }
}

struct FacadeCounter {
    name: String,
    label_names: Vec<&'static str>,
}

impl CounterHandle for FacadeCounter {
    fn increment(&self, labels: &[Label]) -> Result<(), SinkError> {
        check_labels(&self.name, &self.label_names, labels)?;
        metrics::counter!(self.name.clone(), labels.to_vec()).increment(1);
        Ok(())
    }
}

struct FacadeHistogram {
    name: String,
    label_names: Vec<&'static str>,
}

impl HistogramHandle for FacadeHistogram {
    fn observe(&self, value: f64, labels: &[Label]) -> Result<(), SinkError> {
        check_labels(&self.name, &self.label_names, labels)?;
        metrics::histogram!(self.name.clone(), labels.to_vec()).record(value);
        Ok(())
    }
}
