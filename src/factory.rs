//! Per-operation factories that hand out observations.
//!
//! A factory resolves its metrics once, when it is built. Starting an
//! observation then costs one span start plus a couple of `Arc` clones.
//!
//! ```no_run
//! use std::sync::{Arc, LazyLock};
//! use observe_core::{Context, ObservationFactory};
//!
//! static CHECKOUT: LazyLock<Arc<ObservationFactory>> =
//!     LazyLock::new(|| ObservationFactory::new("checkout"));
//!
//! fn checkout(ctx: &Context, user_id: u64) -> Result<(), String> {
//!     let (_ctx, mut obs) = CHECKOUT.start(ctx);
//!     obs.add_field("user_id", user_id);
//!     let result = Ok(());
//!     obs.end_result(&result);
//!     result
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::Level;

use crate::buckets::HistogramPlan;
use crate::config::ObserveConfig;
use crate::context::Context;
use crate::error::ObserveError;
use crate::fields::Fields;
use crate::observation::{ErrorLabeling, Observation};
use crate::registry::{MetricHandles, MetricRegistry};
use crate::telemetry::{SpanOption, StructuredLogger, Tracer, TracingLogger, TracingTracer};

/// Options applied before an observation's span is started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationOptions {
    /// Start from the context's fields instead of an empty set.
    pub propagate_fields: bool,
    /// Appended to the span start options.
    pub span_options: Vec<SpanOption>,
}

impl ObservationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn propagate_fields(mut self) -> Self {
        self.propagate_fields = true;
        self
    }

    pub fn span_option(mut self, option: SpanOption) -> Self {
        self.span_options.push(option);
        self
    }

    /// `self` as defaults, `call` applied on top.
    fn merged(&self, call: ObservationOptions) -> ObservationOptions {
        let mut span_options = self.span_options.clone();
        span_options.extend(call.span_options);
        ObservationOptions {
            propagate_fields: self.propagate_fields || call.propagate_fields,
            span_options,
        }
    }
}

/// Immutable bundle of everything shared by observations of one operation.
pub struct ObservationFactory {
    name: String,
    metrics: Arc<MetricHandles>,
    tracer: Arc<dyn Tracer>,
    logger: Arc<dyn StructuredLogger>,
    defaults: ObservationOptions,
    error_labels: ErrorLabeling,
    completion_level: Option<Level>,
}

impl ObservationFactory {
    /// Factory on the global registry with `tracing`-backed collaborators.
    ///
    /// # Panics
    ///
    /// Panics if the operation's metrics cannot be registered. Running on
    /// with a half-registered operation would silently lose its metrics for
    /// the life of the process.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        match Self::try_new(name.as_str()) {
            Ok(factory) => factory,
            Err(e) => panic!("cannot register observation metrics for {name}: {e}"),
        }
    }

    /// Fallible form of [`new`](Self::new).
    pub fn try_new(name: impl Into<String>) -> Result<Arc<Self>, ObserveError> {
        Self::builder(name).build()
    }

    pub fn builder(name: impl Into<String>) -> ObservationFactoryBuilder {
        ObservationFactoryBuilder::new(name.into())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &MetricHandles {
        &self.metrics
    }

    pub fn defaults(&self) -> &ObservationOptions {
        &self.defaults
    }

    pub fn error_labels(&self) -> ErrorLabeling {
        self.error_labels
    }

    pub fn completion_level(&self) -> Option<Level> {
        self.completion_level
    }

    pub(crate) fn logger(&self) -> &dyn StructuredLogger {
        self.logger.as_ref()
    }

    /// Start an observation with the factory defaults.
    pub fn start(self: &Arc<Self>, ctx: &Context) -> (Context, Observation) {
        self.new_observation(ctx, ObservationOptions::default())
    }

    /// Start an observation as a child of the span in `ctx`, if any.
    ///
    /// The returned context carries the new span and shares the
    /// observation's fields, including ones added later; pass it to nested
    /// work.
    pub fn new_observation(
        self: &Arc<Self>,
        ctx: &Context,
        options: ObservationOptions,
    ) -> (Context, Observation) {
        let options = self.defaults.merged(options);
        let start = Instant::now();

        let fields = if options.propagate_fields {
            ctx.fields().unwrap_or_default()
        } else {
            Fields::new()
        };
        let span = self.tracer.start_span(ctx.span(), &self.name, &options.span_options);

        let observation = Observation::new(self.clone(), start, span, fields);
        (observation.context(), observation)
    }
}

impl std::fmt::Debug for ObservationFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationFactory")
            .field("name", &self.name)
            .field("metrics", &self.metrics)
            .field("defaults", &self.defaults)
            .field("error_labels", &self.error_labels)
            .field("completion_level", &self.completion_level)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ObservationFactory`].
pub struct ObservationFactoryBuilder {
    name: String,
    metric_name: Option<String>,
    registry: Option<Arc<MetricRegistry>>,
    tracer: Option<Arc<dyn Tracer>>,
    logger: Option<Arc<dyn StructuredLogger>>,
    histogram: HistogramPlan,
    defaults: ObservationOptions,
    error_labels: ErrorLabeling,
    completion_level: Option<Level>,
}

impl ObservationFactoryBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            metric_name: None,
            registry: None,
            tracer: None,
            logger: None,
            histogram: HistogramPlan::default(),
            defaults: ObservationOptions::default(),
            error_labels: ErrorLabeling::default(),
            completion_level: Some(Level::DEBUG),
        }
    }

    /// Register metrics under `name` instead of the operation name.
    pub fn metric_name(mut self, name: impl Into<String>) -> Self {
        self.metric_name = Some(name.into());
        self
    }

    pub fn registry(mut self, registry: Arc<MetricRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn StructuredLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Bucket plan used if this factory performs the registration.
    pub fn histogram(mut self, plan: HistogramPlan) -> Self {
        self.histogram = plan;
        self
    }

    pub fn defaults(mut self, defaults: ObservationOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn error_labels(mut self, labeling: ErrorLabeling) -> Self {
        self.error_labels = labeling;
        self
    }

    /// Level of the record emitted by `end`; `None` disables it.
    pub fn completion_level(mut self, level: Option<Level>) -> Self {
        self.completion_level = level;
        self
    }

    /// Take histogram, labelling and completion settings from `config`.
    pub fn config(self, config: &ObserveConfig) -> Self {
        self.histogram(config.histogram)
            .error_labels(config.error_labels)
            .completion_level(config.completion_level)
    }

    /// Resolve the metrics and build the factory.
    pub fn build(self) -> Result<Arc<ObservationFactory>, ObserveError> {
        let registry = self.registry.unwrap_or_else(MetricRegistry::global);
        let metric_name = self.metric_name.as_deref().unwrap_or(&self.name);
        let metrics = registry.resolve(metric_name, &self.histogram)?;

        Ok(Arc::new(ObservationFactory {
            name: self.name,
            metrics,
            tracer: self.tracer.unwrap_or_else(|| Arc::new(TracingTracer::new())),
            logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger::new())),
            defaults: self.defaults,
            error_labels: self.error_labels,
            completion_level: self.completion_level,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::SpanKind;

    #[test]
    fn call_options_append_to_defaults() {
        let defaults = ObservationOptions::new().span_option(SpanOption::Kind(SpanKind::Server));
        let merged = defaults.merged(
            ObservationOptions::new()
                .propagate_fields()
                .span_option(SpanOption::NewRoot),
        );
        assert!(merged.propagate_fields);
        assert_eq!(
            merged.span_options,
            vec![SpanOption::Kind(SpanKind::Server), SpanOption::NewRoot]
        );
    }

    #[test]
    fn defaults_propagation_survives_plain_call() {
        let defaults = ObservationOptions::new().propagate_fields();
        assert!(defaults.merged(ObservationOptions::new()).propagate_fields);
    }
}
