//! Process-wide cache of per-operation metric handles.
//!
//! Lookups use a double-checked pattern: a shared read lock serves names
//! that are already registered. A first caller takes the write lock only
//! long enough to insert a one-shot cell for its name; registration itself
//! runs inside that cell, so it blocks concurrent first callers of the same
//! name and nobody else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::buckets::HistogramPlan;
use crate::error::ObserveError;
use crate::telemetry::{CounterHandle, FacadeSink, HistogramHandle, MetricsSink};

/// Label key carrying the outcome of an observation.
pub const ERROR_LABEL: &str = "error";

/// Registered metrics for one operation.
pub struct MetricHandles {
    pub counter: Arc<dyn CounterHandle>,
    pub duration: Arc<dyn HistogramHandle>,
    pub counter_name: String,
    pub duration_name: String,
    pub boundaries: Vec<f64>,
}

impl std::fmt::Debug for MetricHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricHandles")
            .field("counter_name", &self.counter_name)
            .field("duration_name", &self.duration_name)
            .field("boundaries", &self.boundaries)
            .finish_non_exhaustive()
    }
}

type Slot = Arc<OnceLock<Result<Arc<MetricHandles>, ObserveError>>>;

/// Replace path separators and other characters metric backends reject.
///
/// The mapping is lossy: `a-b`, `a.b` and `a/b` all become `a_b` and so
/// share one set of metrics.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect()
}

/// Thread-safe registry mapping operation names to metric handles.
pub struct MetricRegistry {
    sink: Arc<dyn MetricsSink>,
    entries: RwLock<HashMap<String, Slot>>,
    registrations: AtomicU64,
}

impl MetricRegistry {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            entries: RwLock::new(HashMap::new()),
            registrations: AtomicU64::new(0),
        }
    }

    /// Registry shared by factories that are not given one explicitly.
    /// Records through [`global_sink`](Self::global_sink).
    pub fn global() -> Arc<MetricRegistry> {
        static GLOBAL: OnceLock<Arc<MetricRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(MetricRegistry::new(Self::global_sink())))
            .clone()
    }

    /// The `metrics` facade sink behind [`global`](Self::global). Exporters
    /// read histogram boundaries from it.
    pub fn global_sink() -> Arc<FacadeSink> {
        static SINK: OnceLock<Arc<FacadeSink>> = OnceLock::new();
        SINK.get_or_init(|| Arc::new(FacadeSink::new())).clone()
    }

    /// Return the handles for `name`, registering them on first use.
    ///
    /// Every caller for the same (normalised) name receives the same handles.
    /// `plan` is only consulted by the call that performs registration.
    /// A failed registration is remembered and returned to all later callers.
    /// An empty name is rejected before anything is registered.
    pub fn resolve(
        &self,
        name: &str,
        plan: &HistogramPlan,
    ) -> Result<Arc<MetricHandles>, ObserveError> {
        let key = normalize_name(name);
        if key.is_empty() {
            return Err(ObserveError::EmptyName);
        }

        // Fast path
        let slot = self.entries.read().get(&key).cloned();
        if let Some(result) = slot.as_ref().and_then(|s| s.get()) {
            return result.clone();
        }

        let slot = match slot {
            Some(slot) => slot,
            None => self.entries.write().entry(key.clone()).or_default().clone(),
        };

        slot.get_or_init(|| self.register(&key, plan)).clone()
    }

    fn register(&self, key: &str, plan: &HistogramPlan) -> Result<Arc<MetricHandles>, ObserveError> {
        self.registrations.fetch_add(1, Ordering::Relaxed);

        let boundaries = plan.boundaries().map_err(|source| ObserveError::Plan {
            name: key.to_string(),
            source,
        })?;
        let registration = |source| ObserveError::Registration { name: key.to_string(), source };

        let counter_name = format!("{key}_total");
        let duration_name = format!("{key}_duration_seconds");
        let counter = self.sink.counter(&counter_name, &[ERROR_LABEL]).map_err(registration)?;
        let duration = self
            .sink
            .histogram(&duration_name, &[ERROR_LABEL], &boundaries)
            .map_err(registration)?;

        tracing::debug!(
            operation = key,
            counter = %counter_name,
            histogram = %duration_name,
            buckets = boundaries.len() - 1,
            "Registered observation metrics"
        );

        Ok(Arc::new(MetricHandles {
            counter,
            duration,
            counter_name,
            duration_name,
            boundaries,
        }))
    }

    /// Number of registration attempts performed (successful or not).
    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::Relaxed)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(&normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("names", &self.names())
            .field("registrations", &self.registrations())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buckets::Spacing;
    use crate::error::PlanError;
    use crate::telemetry::MetricsStore;
    use std::time::Duration;

    #[test]
    fn normalizes_path_separators() {
        assert_eq!(normalize_name("serious/function"), "serious_function");
        assert_eq!(normalize_name("a\\b.c-d"), "a_b_c_d");
        assert_eq!(normalize_name("ns:op_1"), "ns:op_1");
    }

    #[test]
    fn resolve_is_memoized() {
        let registry = MetricRegistry::new(Arc::new(MetricsStore::new()));
        let a = registry.resolve("checkout", &HistogramPlan::simple()).unwrap();
        let b = registry.resolve("checkout", &HistogramPlan::simple()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.registrations(), 1);
        assert_eq!(a.counter_name, "checkout_total");
        assert_eq!(a.duration_name, "checkout_duration_seconds");
    }

    #[test]
    fn separators_share_an_entry() {
        let registry = MetricRegistry::new(Arc::new(MetricsStore::new()));
        let a = registry.resolve("api/users", &HistogramPlan::simple()).unwrap();
        let b = registry.resolve("api_users", &HistogramPlan::simple()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.names(), vec!["api_users".to_string()]);
    }

    #[test]
    fn punctuation_variants_collide() {
        let registry = MetricRegistry::new(Arc::new(MetricsStore::new()));
        let dash = registry.resolve("a-b", &HistogramPlan::simple()).unwrap();
        let dot = registry.resolve("a.b", &HistogramPlan::simple()).unwrap();
        let slash = registry.resolve("a/b", &HistogramPlan::simple()).unwrap();
        assert!(Arc::ptr_eq(&dash, &dot));
        assert!(Arc::ptr_eq(&dash, &slash));
        assert_eq!(registry.registrations(), 1);
    }

    #[test]
    fn empty_name_rejected() {
        let registry = MetricRegistry::new(Arc::new(MetricsStore::new()));
        assert_eq!(
            registry.resolve("", &HistogramPlan::simple()).unwrap_err(),
            ObserveError::EmptyName
        );
        assert!(registry.is_empty());
        assert_eq!(registry.registrations(), 0);
    }

    #[test]
    fn invalid_plan_is_remembered() {
        let registry = MetricRegistry::new(Arc::new(MetricsStore::new()));
        let bad = HistogramPlan::new(Duration::ZERO, Duration::from_secs(1), 4, Spacing::LogLinear);
        let err = registry.resolve("op", &bad).unwrap_err();
        assert_eq!(
            err,
            ObserveError::Plan { name: "op".into(), source: PlanError::NonPositiveMinimum }
        );
        // A later valid plan does not retry the registration.
        assert!(registry.resolve("op", &HistogramPlan::simple()).is_err());
        assert_eq!(registry.registrations(), 1);
    }
}
