//! observe-core
//!
//! Call-scoped instrumentation: one [`Observation`] per unit of work that, when
//! ended, emits a trace span, RED metrics (count by outcome and a duration
//! histogram) and a structured log record sharing the same fields.
//!
//! # Components
//!
//! - [`buckets`]: histogram boundary planning (linear or log-linear)
//! - [`registry`]: at-most-once metric registration per operation name
//! - [`factory`]: immutable per-operation bundle handing out observations
//! - [`observation`]: the per-call `Open -> Closed` state machine
//! - [`telemetry`]: tracer, metrics sink and logger collaborators
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use observe_core::telemetry::{MemoryLogger, MemoryTracer, MetricsStore};
//! use observe_core::{Context, MetricRegistry, ObservationFactory};
//!
//! let store = Arc::new(MetricsStore::new());
//! let factory = ObservationFactory::builder("checkout")
//!     .registry(Arc::new(MetricRegistry::new(store.clone())))
//!     .tracer(Arc::new(MemoryTracer::new()))
//!     .logger(Arc::new(MemoryLogger::default()))
//!     .build()
//!     .unwrap();
//!
//! let (_ctx, mut obs) = factory.start(&Context::background());
//! obs.add_field("user_id", 42);
//! obs.end_ok();
//!
//! assert_eq!(store.snapshot().counter_total("checkout_total"), 1);
//! ```

pub mod buckets;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod fields;
pub mod observation;
pub mod registry;
pub mod telemetry;

pub use buckets::{plan, HistogramPlan, Spacing, MAX_BUCKETS};
pub use config::ObserveConfig;
pub use context::Context;
pub use error::{ObserveError, PlanError, SinkError};
pub use factory::{ObservationFactory, ObservationFactoryBuilder, ObservationOptions};
pub use fields::{FieldValue, Fields};
pub use observation::{
    error_category, Completion, ErrorLabeling, Observation, ObservationState, Outcome,
};
pub use registry::{normalize_name, MetricHandles, MetricRegistry};
