//! The per-call observation and its `Open -> Closed` lifecycle.
//!
//! An [`Observation`] is owned by exactly one unit of work. [`Observation::end`]
//! consumes it, so finalising twice or mutating a closed observation is
//! rejected at compile time. Dropping an observation that was never ended
//! records no metrics, logs a warning and still finishes its span.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::Label;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::context::{Context, SharedFields};
use crate::factory::ObservationFactory;
use crate::fields::{FieldValue, Fields};
use crate::registry::ERROR_LABEL;
use crate::telemetry::{AttributeValue, LogHandle, Span, SpanContext};

/// Span attribute holding the error message.
pub const ERROR_ATTRIBUTE: &str = "error";

/// Lifecycle state. `Open` is the only initial state, `Closed` the only terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObservationState {
    Open,
    Closed,
}

/// What the `error` metric label carries for failed observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorLabeling {
    /// The error's type name. Bounded cardinality.
    #[default]
    Category,
    /// The full error message. Unbounded cardinality.
    Message,
}

impl FromStr for ErrorLabeling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "category" | "type" => Ok(Self::Category),
            "message" => Ok(Self::Message),
            other => Err(format!("unknown error labeling: {other}")),
        }
    }
}

/// Result of a finished unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Success,
    Error { category: String, message: String },
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Value of the `error` metric label. Empty for success.
    pub fn label(&self, labeling: ErrorLabeling) -> String {
        match (self, labeling) {
            (Self::Success, _) => String::new(),
            (Self::Error { category, .. }, ErrorLabeling::Category) => category.clone(),
            (Self::Error { message, .. }, ErrorLabeling::Message) => message.clone(),
        }
    }
}

/// Short type name of `E`, used as a bounded error category.
///
/// `my_app::billing::InsufficientFunds` becomes `InsufficientFunds`. Boxed and
/// trait-object errors collapse to their container name; use
/// [`Observation::end_with_category`] when that is too coarse.
pub fn error_category<E: ?Sized>() -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    let base = base.trim_start_matches('&').trim_start_matches("dyn ");
    let base = base.split(" +").next().unwrap_or(base);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Summary returned by [`Observation::end`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub name: String,
    pub state: ObservationState,
    pub elapsed: Duration,
    pub outcome: Outcome,
}

/// Finishes the span exactly once, on request or when dropped.
struct SpanGuard(Option<Box<dyn Span>>);

impl SpanGuard {
    fn get(&mut self) -> Option<&mut (dyn Span + 'static)> {
        self.0.as_deref_mut()
    }

    fn finish(&mut self) {
        if let Some(mut span) = self.0.take() {
            span.finish();
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

/// One unit of work being observed.
pub struct Observation {
    factory: Arc<ObservationFactory>,
    start: Instant,
    span_context: SpanContext,
    fields: SharedFields,
    state: ObservationState,
    // Declared last so it is dropped after everything above.
    span: SpanGuard,
}

impl Observation {
    pub(crate) fn new(
        factory: Arc<ObservationFactory>,
        start: Instant,
        span: Box<dyn Span>,
        fields: Fields,
    ) -> Self {
        Self {
            span_context: span.context(),
            factory,
            start,
            fields: Arc::new(RwLock::new(fields)),
            state: ObservationState::Open,
            span: SpanGuard(Some(span)),
        }
    }

    pub fn name(&self) -> &str {
        self.factory.name()
    }

    pub fn state(&self) -> ObservationState {
        self.state
    }

    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// Current fields, copied out.
    pub fn fields(&self) -> Fields {
        self.fields.read().clone()
    }

    /// Time since the observation started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Context for nested observations. It shares this observation's fields,
    /// so later `add_field` calls are visible through it.
    pub fn context(&self) -> Context {
        Context::new(self.span_context.clone(), self.fields.clone())
    }

    /// Record a field for the log record and, for supported types, the span.
    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        if let (Some(attribute), Some(span)) = (value.as_attribute(), self.span.get()) {
            span.set_attribute(&key, attribute);
        }
        self.fields.write().insert(key, value);
    }

    /// Builder-style [`add_field`](Self::add_field).
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.add_field(key, value);
        self
    }

    /// Annotate the span and emit a log record with the current fields.
    ///
    /// Nothing is formatted when `level` is disabled.
    pub fn log(&mut self, level: Level, message: impl fmt::Display) {
        let logger = self.factory.logger();
        if !logger.is_enabled(level) {
            return;
        }
        let message = message.to_string();
        if let Some(span) = self.span.get() {
            span.add_event(&message);
        }
        let fields = self.fields.read();
        LogHandle::new(logger, &fields).log(level, &message);
    }

    /// Finish the observation. `error` is `None` for success.
    pub fn end<E: fmt::Display + ?Sized>(self, error: Option<&E>) -> Completion {
        let outcome = match error {
            None => Outcome::Success,
            Some(err) => Outcome::Error {
                category: error_category::<E>(),
                message: err.to_string(),
            },
        };
        self.finalize(outcome)
    }

    /// Finish successfully.
    pub fn end_ok(self) -> Completion {
        self.end::<str>(None)
    }

    /// Finish with the outcome of `result`.
    pub fn end_result<T, E: fmt::Display>(self, result: &Result<T, E>) -> Completion {
        match result {
            Ok(_) => self.end::<E>(None),
            Err(err) => self.end(Some(err)),
        }
    }

    /// Finish with an error under an explicit category.
    pub fn end_with_category<E: fmt::Display + ?Sized>(
        self,
        category: impl Into<String>,
        error: &E,
    ) -> Completion {
        self.finalize(Outcome::Error {
            category: category.into(),
            message: error.to_string(),
        })
    }

    fn finalize(mut self, outcome: Outcome) -> Completion {
        let elapsed = self.start.elapsed();
        self.state = ObservationState::Closed;

        if let Outcome::Error { message, .. } = &outcome {
            if let Some(span) = self.span.get() {
                span.set_attribute(ERROR_ATTRIBUTE, AttributeValue::Str(message.clone()));
                span.set_error(true);
            }
        }

        self.record_metrics(&outcome, elapsed);
        self.log_completion(&outcome, elapsed);

        // Span last. Unwinding out of the steps above still finishes it via the guard.
        self.span.finish();

        Completion {
            name: self.name().to_string(),
            state: self.state,
            elapsed,
            outcome,
        }
    }

    fn record_metrics(&self, outcome: &Outcome, elapsed: Duration) {
        let metrics = self.factory.metrics();
        let labels = [Label::new(ERROR_LABEL, outcome.label(self.factory.error_labels()))];

        if let Err(e) = metrics.counter.increment(&labels) {
            tracing::warn!(
                observation = %self.name(),
                metric = %metrics.counter_name,
                error = %e,
                "Failed to record observation count"
            );
        }
        if let Err(e) = metrics.duration.observe(elapsed.as_secs_f64(), &labels) {
            tracing::warn!(
                observation = %self.name(),
                metric = %metrics.duration_name,
                error = %e,
                "Failed to record observation duration"
            );
        }
    }

    fn log_completion(&self, outcome: &Outcome, elapsed: Duration) {
        let Some(level) = self.factory.completion_level() else {
            return;
        };
        let logger = self.factory.logger();
        if !logger.is_enabled(level) {
            return;
        }

        let mut fields = self.fields.read().clone();
        fields.insert("elapsed_seconds", elapsed.as_secs_f64());
        match outcome {
            Outcome::Success => fields.insert("outcome", "success"),
            Outcome::Error { category, message } => {
                fields.insert("outcome", "error");
                fields.insert("error", message.as_str());
                fields.insert("error_category", category.as_str());
            }
        }
        logger.log(level, &format!("{} finished", self.name()), &fields);
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        if self.state == ObservationState::Open {
            self.state = ObservationState::Closed;
            tracing::warn!(
                observation = %self.factory.name(),
                elapsed_ms = self.start.elapsed().as_millis() as u64,
                "Observation dropped without end; metrics not recorded"
            );
        }
    }
}

impl fmt::Debug for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("name", &self.name())
            .field("state", &self.state)
            .field("span", &self.span_context)
            .field("fields", &*self.fields.read())
            .finish_non_exhaustive()
    }
}
