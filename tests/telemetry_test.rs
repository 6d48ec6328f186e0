//! Telemetry collaborator tests: logging setup and the `tracing`/`metrics` defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use metrics::Label;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::Level;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer};

use observe_core::telemetry::{
    init_logging, series_key, AttributeValue, FacadeSink, LogConfig, LogError, LogFormat,
    MetricsSink, MetricsStore, SpanOption, StructuredLogger, Tracer, TracingLogger, TracingTracer,
};
use observe_core::{Context, Fields, MetricRegistry, ObservationFactory, SinkError};

// =============================================================================
// LogConfig Tests
// =============================================================================

#[test]
fn log_config_default_is_json() {
    let config = LogConfig::default();
    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, "info");
    assert!(config.output_path.is_none());
    assert!(!config.span_events);
}

#[test]
fn log_config_with_output_path() {
    let config = LogConfig {
        format: LogFormat::Json,
        level: "trace".to_string(),
        output_path: Some(PathBuf::from("/tmp/observe.log")),
        span_events: true,
    };
    assert_eq!(config.output_path, Some(PathBuf::from("/tmp/observe.log")));
}

#[test]
fn log_format_from_str() {
    assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
    assert_eq!("Pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
    assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Pretty));
    assert!("xml".parse::<LogFormat>().is_err());
}

// =============================================================================
// LogError Tests
// =============================================================================

#[test]
fn log_error_invalid_filter_display() {
    let error = LogError::InvalidFilter("bad filter".to_string());
    assert!(error.to_string().contains("Invalid log filter"));
    assert!(error.to_string().contains("bad filter"));
}

#[test]
fn log_error_file_open_display() {
    let error = LogError::FileOpen("permission denied".to_string());
    assert!(error.to_string().contains("Failed to open log file"));
}

#[test]
fn log_error_already_initialized_display() {
    assert_eq!(LogError::AlreadyInitialized.to_string(), "Subscriber already initialized");
}

#[test]
fn init_logging_rejects_invalid_filter() {
    let config = LogConfig {
        level: "observe=loudest".to_string(),
        ..LogConfig::default()
    };
    assert!(matches!(init_logging(&config), Err(LogError::InvalidFilter(_))));
}

// =============================================================================
// tracing-backed tracer and logger
// =============================================================================

#[test]
fn tracing_tracer_without_subscriber_no_panic() {
    let tracer = TracingTracer::new();
    let mut span = tracer.start_span(None, "orphan", &[]);
    span.set_attribute("user_id", AttributeValue::Int(1));
    span.add_event("working");
    span.set_error(true);
    span.finish();
    span.finish();
}

#[test]
fn tracing_tracer_links_children_under_subscriber() {
    tracing::subscriber::with_default(tracing_subscriber::registry(), || {
        let tracer = TracingTracer::new();
        let mut parent = tracer.start_span(None, "parent", &[]);
        let parent_ctx = parent.context();
        assert!(parent_ctx.backend::<tracing::Span>().is_some());

        let mut child = tracer.start_span(Some(&parent_ctx), "child", &[]);
        assert_eq!(child.context().trace_id, parent_ctx.trace_id);
        assert_ne!(child.context().span_id, parent_ctx.span_id);

        let mut root = tracer.start_span(Some(&parent_ctx), "detached", &[SpanOption::NewRoot]);
        assert_ne!(root.context().trace_id, parent_ctx.trace_id);

        root.finish();
        child.finish();
        parent.finish();
    });
}

#[test]
fn tracing_logger_follows_subscriber() {
    let logger = TracingLogger::new();
    let fields: Fields = [("k", "v")].into_iter().collect();
    logger.log(Level::INFO, "no subscriber", &fields);

    tracing::subscriber::with_default(tracing_subscriber::registry(), || {
        assert!(logger.is_enabled(Level::TRACE));
        logger.with_fields(&fields).log(Level::WARN, "bound fields");
    });
}

#[test]
fn default_factory_runs_on_tracing_backends() {
    tracing::subscriber::with_default(tracing_subscriber::registry(), || {
        let factory = ObservationFactory::new("telemetry_test/defaults");
        let (ctx, mut obs) = factory.start(&Context::background());
        obs.add_field("attempt", 1);
        obs.log(Level::INFO, "calling upstream");

        let (_, child) = factory.start(&ctx);
        child.end(Some("timeout"));
        obs.end_ok();
    });
}

/// Layer that keeps every event and span record it sees as field maps.
#[derive(Clone, Default)]
struct Captured {
    events: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
    records: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
}

impl Captured {
    fn event(&self, message: &str) -> Option<BTreeMap<String, String>> {
        self.events
            .lock()
            .iter()
            .find(|e| e.get("message").map(String::as_str) == Some(message))
            .cloned()
    }

    fn recorded(&self, field: &str) -> Option<String> {
        self.records.lock().iter().find_map(|r| r.get(field).cloned())
    }
}

#[derive(Default)]
struct FieldMap(BTreeMap<String, String>);

impl Visit for FieldMap {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S: tracing::Subscriber> Layer<S> for Captured {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut fields = FieldMap::default();
        event.record(&mut fields);
        self.events.lock().push(fields.0);
    }

    fn on_record(
        &self,
        _id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        _ctx: LayerContext<'_, S>,
    ) {
        let mut fields = FieldMap::default();
        values.record(&mut fields);
        self.records.lock().push(fields.0);
    }
}

#[test]
fn tracing_backends_keep_attributes_under_info_filter() {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::new("info"))
        .with(captured.clone());

    tracing::subscriber::with_default(subscriber, || {
        let factory = ObservationFactory::new("telemetry_test/captured");
        let (_ctx, mut obs) = factory.start(&Context::background());
        obs.add_field("user_id", 42);
        obs.log(Level::INFO, "calling upstream");
        obs.end(Some("timeout"));
    });

    let annotation = captured.event("span event").expect("annotation event");
    assert_eq!(annotation.get("annotation").map(String::as_str), Some("calling upstream"));

    let finished = captured.event("span finished").expect("close record");
    assert_eq!(finished.get("observation").map(String::as_str), Some("telemetry_test/captured"));
    let attributes = &finished["attributes"];
    assert!(attributes.contains(r#""user_id":42"#), "{attributes}");
    assert!(attributes.contains(r#""error":"timeout""#), "{attributes}");

    let log = captured.event("calling upstream").expect("log record");
    assert!(log["fields"].contains("user_id"));

    assert_eq!(captured.recorded("error").as_deref(), Some("true"));
    assert_eq!(captured.recorded("error.message").as_deref(), Some("timeout"));
}

// =============================================================================
// metrics facade sink
// =============================================================================

#[test]
fn facade_sink_without_recorder_no_panic() {
    let sink = FacadeSink::new();
    let counter = sink.counter("facade_total", &["error"]).unwrap();
    let histogram = sink.histogram("facade_seconds", &["error"], &[0.0, 0.5, 1.0]).unwrap();
    counter.increment(&[Label::new("error", "")]).unwrap();
    histogram.observe(0.25, &[Label::new("error", "")]).unwrap();
    assert_eq!(sink.boundaries("facade_seconds"), Some(vec![0.0, 0.5, 1.0]));
}

#[test]
fn facade_sink_rejects_unknown_labels() {
    let sink = FacadeSink::new();
    let counter = sink.counter("labels_total", &["error"]).unwrap();
    let err = counter.increment(&[Label::new("status", "500")]).unwrap_err();
    assert!(matches!(err, SinkError::LabelRejected { .. }));
}

#[test]
fn facade_registry_reports_conflicts() {
    let sink = Arc::new(FacadeSink::new());
    sink.counter("jobs_duration_seconds", &["error"]).unwrap();
    let registry = MetricRegistry::new(sink);
    let err = registry
        .resolve("jobs", &Default::default())
        .unwrap_err();
    assert!(err.is_backend_failure());
}

// =============================================================================
// in-memory store
// =============================================================================

#[test]
fn series_key_renders_quoted_values() {
    assert_eq!(series_key(&[Label::new("error", "")]), "error=\"\"");
    assert_eq!(
        series_key(&[Label::new("error", "Timeout"), Label::new("region", "eu")]),
        "error=\"Timeout\",region=\"eu\""
    );
}

#[test]
fn snapshot_serializes_to_json() {
    let store = MetricsStore::new();
    let counter = store.counter("jobs_total", &["error"]).unwrap();
    counter.increment(&[Label::new("error", "")]).unwrap();
    let json = serde_json::to_value(store.snapshot()).unwrap();
    assert_eq!(json["counters"]["jobs_total"]["error=\"\""], 1);
}
