//! Collaborators an observation emits into.
//!
//! Three narrow traits ([`Tracer`], [`MetricsSink`], [`StructuredLogger`])
//! separate the observation core from concrete backends. Defaults forward
//! to the `tracing` and `metrics` crates; the in-memory implementations
//! record everything for inspection.

mod logger;
mod logging;
mod memory;
mod sink;
mod store;
mod tracer;

pub use logger::{LogHandle, StructuredLogger, TracingLogger};
pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use memory::{FinishedSpan, LogRecord, MemoryLogger, MemoryTracer};
pub use sink::{CounterHandle, FacadeSink, HistogramHandle, MetricsSink};
pub use store::{series_key, HistogramSummary, MetricsSnapshot, MetricsStore};
pub use tracer::{
    AttributeValue, Span, SpanContext, SpanKind, SpanOption, Tracer, TracingSpan, TracingTracer,
};
