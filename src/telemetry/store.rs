//! In-memory metrics sink with bucketed histograms.
//!
//! Each registered metric owns a map of label series. Series values are
//! atomics, so recording only takes a shard read on the series map after the
//! first observation of a label set.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use metrics::Label;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::telemetry::sink::{check_labels, CounterHandle, HistogramHandle, MetricsSink};

/// Snapshot of all metrics at a point in time.
///
/// Series are keyed by their rendered label set, e.g. `error=""`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, BTreeMap<String, u64>>,
    pub histograms: BTreeMap<String, BTreeMap<String, HistogramSummary>>,
}

impl MetricsSnapshot {
    /// Sum of a counter across all of its series.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters.get(name).map(|s| s.values().sum()).unwrap_or(0)
    }
}

/// Summary statistics for one histogram series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    /// Upper bounds, as registered.
    pub boundaries: Vec<f64>,
    /// Non-cumulative counts; one more entry than `boundaries` for overflow.
    pub buckets: Vec<u64>,
}

/// Render a label set as a stable series key.
pub fn series_key(labels: &[Label]) -> String {
    labels
        .iter()
        .map(|l| format!("{}={:?}", l.key(), l.value()))
        .collect::<Vec<_>>()
        .join(",")
}

struct HistogramData {
    count: AtomicU64,
    sum: AtomicU64, // f64 bits stored as u64
    min: AtomicU64, // f64 bits stored as u64
    max: AtomicU64, // f64 bits stored as u64
    buckets: Vec<AtomicU64>,
}

impl HistogramData {
    fn new(bucket_slots: usize) -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(f64::to_bits(0.0)),
            min: AtomicU64::new(f64::to_bits(f64::MAX)),
            max: AtomicU64::new(f64::to_bits(f64::MIN)),
            buckets: (0..bucket_slots).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn record(&self, value: f64, boundaries: &[f64]) {
        // First bucket whose upper bound admits the value; overflow otherwise.
        let slot = boundaries.partition_point(|b| *b < value);
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        update_f64(&self.sum, |current| Some(current + value));
        update_f64(&self.min, |current| (value < current).then_some(value));
        update_f64(&self.max, |current| (value > current).then_some(value));
    }

    fn to_summary(&self, boundaries: &[f64]) -> HistogramSummary {
        let count = self.count.load(Ordering::Relaxed);
        let sum = f64::from_bits(self.sum.load(Ordering::Relaxed));
        let min = f64::from_bits(self.min.load(Ordering::Relaxed));
        let max = f64::from_bits(self.max.load(Ordering::Relaxed));

        HistogramSummary {
            count,
            sum,
            min: if count == 0 { 0.0 } else { min },
            max: if count == 0 { 0.0 } else { max },
            boundaries: boundaries.to_vec(),
            buckets: self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect(),
        }
    }
}

/// CAS loop over an f64 stored as bits. `next` returns `None` to stop early.
fn update_f64(atomic: &AtomicU64, next: impl Fn(f64) -> Option<f64>) {
    let _ = atomic.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
        next(f64::from_bits(bits)).map(f64::to_bits)
    });
}

struct CounterSeries {
    name: String,
    label_names: Vec<&'static str>,
    series: DashMap<String, AtomicU64>,
}

impl CounterHandle for CounterSeries {
    fn increment(&self, labels: &[Label]) -> Result<(), SinkError> {
        check_labels(&self.name, &self.label_names, labels)?;
        let key = series_key(labels);
        if let Some(value) = self.series.get(&key) {
            value.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.series
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

struct HistogramSeries {
    name: String,
    label_names: Vec<&'static str>,
    boundaries: Vec<f64>,
    series: DashMap<String, HistogramData>,
}

impl HistogramHandle for HistogramSeries {
    fn observe(&self, value: f64, labels: &[Label]) -> Result<(), SinkError> {
        check_labels(&self.name, &self.label_names, labels)?;
        if !value.is_finite() {
            return Err(SinkError::Backend(format!(
                "non-finite observation {value} for {}",
                self.name
            )));
        }
        let key = series_key(labels);
        if let Some(data) = self.series.get(&key) {
            data.record(value, &self.boundaries);
            return Ok(());
        }
        self.series
            .entry(key)
            .or_insert_with(|| HistogramData::new(self.boundaries.len() + 1))
            .record(value, &self.boundaries);
        Ok(())
    }
}

enum StoredMetric {
    Counter(Arc<CounterSeries>),
    Histogram(Arc<HistogramSeries>),
}

/// Thread-safe in-memory metrics backend.
#[derive(Default)]
pub struct MetricsStore {
    metrics: RwLock<BTreeMap<String, StoredMetric>>,
    registrations: AtomicU64,
}

impl MetricsStore {
    /// Create a new empty metrics store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct metrics registered so far.
    pub fn registration_count(&self) -> u64 {
        self.registrations.load(Ordering::Relaxed)
    }

    /// Current value of one counter series.
    pub fn counter_value(&self, name: &str, labels: &[Label]) -> u64 {
        match self.metrics.read().get(name) {
            Some(StoredMetric::Counter(c)) => c
                .series
                .get(&series_key(labels))
                .map(|v| v.load(Ordering::Relaxed))
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Summary of one histogram series.
    pub fn histogram_summary(&self, name: &str, labels: &[Label]) -> Option<HistogramSummary> {
        match self.metrics.read().get(name) {
            Some(StoredMetric::Histogram(h)) => h
                .series
                .get(&series_key(labels))
                .map(|data| data.to_summary(&h.boundaries)),
            _ => None,
        }
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let metrics = self.metrics.read();
        let mut snapshot = MetricsSnapshot::default();

        for (name, metric) in metrics.iter() {
            match metric {
                StoredMetric::Counter(c) => {
                    let series = c
                        .series
                        .iter()
                        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                        .collect();
                    snapshot.counters.insert(name.clone(), series);
                }
                StoredMetric::Histogram(h) => {
                    let series = h
                        .series
                        .iter()
                        .map(|e| (e.key().clone(), e.value().to_summary(&h.boundaries)))
                        .collect();
                    snapshot.histograms.insert(name.clone(), series);
                }
            }
        }
        snapshot
    }
}

fn conflict(name: &str, reason: impl Into<String>) -> SinkError {
    SinkError::Conflict { name: name.to_string(), reason: reason.into() }
}

impl MetricsSink for MetricsStore {
    fn counter(
        &self,
        name: &str,
        label_names: &[&'static str],
    ) -> Result<Arc<dyn CounterHandle>, SinkError> {
        let mut metrics = self.metrics.write();
        match metrics.get(name) {
            Some(StoredMetric::Counter(c)) if c.label_names == label_names => Ok(c.clone()),
            Some(StoredMetric::Counter(c)) => Err(conflict(
                name,
                format!("counter labels {:?} differ from {label_names:?}", c.label_names),
            )),
            Some(StoredMetric::Histogram(_)) => Err(conflict(name, "already a histogram")),
            None => {
                let counter = Arc::new(CounterSeries {
                    name: name.to_string(),
                    label_names: label_names.to_vec(),
                    series: DashMap::new(),
                });
                metrics.insert(name.to_string(), StoredMetric::Counter(counter.clone()));
                self.registrations.fetch_add(1, Ordering::Relaxed);
                Ok(counter)
            }
        }
    }

    fn histogram(
        &self,
        name: &str,
        label_names: &[&'static str],
        boundaries: &[f64],
    ) -> Result<Arc<dyn HistogramHandle>, SinkError> {
        if boundaries.windows(2).any(|w| w[0] > w[1]) {
            return Err(SinkError::Backend(format!("boundaries for {name} are not sorted")));
        }
        let mut metrics = self.metrics.write();
        match metrics.get(name) {
            Some(StoredMetric::Histogram(h))
                if h.label_names == label_names && h.boundaries == boundaries =>
            {
                Ok(h.clone())
            }
            Some(StoredMetric::Histogram(_)) => {
                Err(conflict(name, "histogram labels or boundaries differ"))
            }
            Some(StoredMetric::Counter(_)) => Err(conflict(name, "already a counter")),
            None => {
                let histogram = Arc::new(HistogramSeries {
                    name: name.to_string(),
                    label_names: label_names.to_vec(),
                    boundaries: boundaries.to_vec(),
                    series: DashMap::new(),
                });
                metrics.insert(name.to_string(), StoredMetric::Histogram(histogram.clone()));
                self.registrations.fetch_add(1, Ordering::Relaxed);
                Ok(histogram)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_label() -> Vec<Label> {
        vec![Label::new("error", "")]
    }

    #[test]
    fn counter_increments_per_series() {
        let store = MetricsStore::new();
        let counter = store.counter("ops_total", &["error"]).unwrap();
        counter.increment(&ok_label()).unwrap();
        counter.increment(&ok_label()).unwrap();
        counter.increment(&[Label::new("error", "Timeout")]).unwrap();

        assert_eq!(store.counter_value("ops_total", &ok_label()), 2);
        assert_eq!(store.counter_value("ops_total", &[Label::new("error", "Timeout")]), 1);
        assert_eq!(store.snapshot().counter_total("ops_total"), 3);
    }

    #[test]
    fn histogram_places_values_in_buckets() {
        let store = MetricsStore::new();
        let hist = store.histogram("ops_duration_seconds", &["error"], &[0.0, 1.0, 2.0]).unwrap();
        for v in [0.0, 0.5, 1.0, 1.5, 3.0] {
            hist.observe(v, &ok_label()).unwrap();
        }

        let summary = store.histogram_summary("ops_duration_seconds", &ok_label()).unwrap();
        assert_eq!(summary.count, 5);
        assert_eq!(summary.sum, 6.0);
        assert_eq!(summary.min, 0.0);
        assert_eq!(summary.max, 3.0);
        assert_eq!(summary.buckets, vec![1, 2, 1, 1]);
    }

    #[test]
    fn reregistering_identical_metric_shares_series() {
        let store = MetricsStore::new();
        let a = store.counter("ops_total", &["error"]).unwrap();
        let b = store.counter("ops_total", &["error"]).unwrap();
        a.increment(&ok_label()).unwrap();
        b.increment(&ok_label()).unwrap();
        assert_eq!(store.counter_value("ops_total", &ok_label()), 2);
        assert_eq!(store.registration_count(), 1);
    }

    #[test]
    fn incompatible_registration_is_conflict() {
        let store = MetricsStore::new();
        store.histogram("ops_total", &["error"], &[0.0, 1.0]).unwrap();
        let err = store.counter("ops_total", &["error"]).err().unwrap();
        assert!(matches!(err, SinkError::Conflict { .. }));
    }

    #[test]
    fn non_finite_observation_rejected() {
        let store = MetricsStore::new();
        let hist = store.histogram("lat", &["error"], &[0.0, 1.0]).unwrap();
        assert!(hist.observe(f64::NAN, &ok_label()).is_err());
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = MetricsStore::new().snapshot();
        assert!(snapshot.counters.is_empty());
        assert!(snapshot.histograms.is_empty());
    }
}
