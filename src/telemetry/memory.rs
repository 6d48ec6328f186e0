//! In-memory tracer and logger.
//!
//! Both record everything they are handed so callers can inspect what an
//! observation emitted. Used by the demo driver and throughout the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use uuid::Uuid;

use crate::fields::Fields;
use crate::telemetry::logger::StructuredLogger;
use crate::telemetry::tracer::{
    effective_kind, effective_parent, AttributeValue, Span, SpanContext, SpanKind, SpanOption,
    Tracer,
};

/// A span as it looked when it was finished.
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub name: String,
    pub kind: SpanKind,
    pub context: SpanContext,
    pub parent_span_id: Option<u64>,
    pub attributes: HashMap<String, AttributeValue>,
    pub events: Vec<String>,
    pub error: bool,
}

#[derive(Default)]
struct TracerState {
    next_id: AtomicU64,
    started: AtomicU64,
    repeated_finishes: AtomicU64,
    finished: Mutex<Vec<FinishedSpan>>,
}

/// Tracer that keeps finished spans in memory.
#[derive(Clone, Default)]
pub struct MemoryTracer {
    state: Arc<TracerState>,
}

impl MemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> u64 {
        self.state.started.load(Ordering::Relaxed)
    }

    /// `finish` calls made on an already finished span.
    pub fn repeated_finishes(&self) -> u64 {
        self.state.repeated_finishes.load(Ordering::Relaxed)
    }

    pub fn finished(&self) -> Vec<FinishedSpan> {
        self.state.finished.lock().clone()
    }

    /// Spans started but not yet finished.
    pub fn open(&self) -> u64 {
        self.started() - self.state.finished.lock().len() as u64
    }

    pub fn find(&self, name: &str) -> Option<FinishedSpan> {
        self.state.finished.lock().iter().find(|s| s.name == name).cloned()
    }
}

impl Tracer for MemoryTracer {
    fn start_span(
        &self,
        parent: Option<&SpanContext>,
        name: &str,
        options: &[SpanOption],
    ) -> Box<dyn Span> {
        let parent = effective_parent(parent, options);
        let span_id = self.state.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let trace_id = parent.map(|p| p.trace_id).unwrap_or_else(Uuid::new_v4);
        self.state.started.fetch_add(1, Ordering::Relaxed);

        let mut attributes = HashMap::new();
        for option in options {
            if let SpanOption::Attribute(key, value) = option {
                attributes.insert(key.clone(), value.clone());
            }
        }

        Box::new(MemorySpan {
            record: FinishedSpan {
                name: name.to_string(),
                kind: effective_kind(options),
                context: SpanContext::new(trace_id, span_id),
                parent_span_id: parent.map(|p| p.span_id),
                attributes,
                events: Vec::new(),
                error: false,
            },
            state: self.state.clone(),
            finished: false,
        })
    }
}

struct MemorySpan {
    record: FinishedSpan,
    state: Arc<TracerState>,
    finished: bool,
}

impl Span for MemorySpan {
    fn context(&self) -> SpanContext {
        self.record.context.clone()
    }

    fn set_attribute(&mut self, key: &str, value: AttributeValue) {
        self.record.attributes.insert(key.to_string(), value);
    }

    fn add_event(&mut self, message: &str) {
        self.record.events.push(message.to_string());
    }

    fn set_error(&mut self, error: bool) {
        self.record.error = error;
    }

    fn finish(&mut self) {
        if self.finished {
            self.state.repeated_finishes.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.finished = true;
        self.state.finished.lock().push(self.record.clone());
    }
}

/// One emitted log record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub fields: Fields,
}

/// Logger that keeps records in memory.
#[derive(Clone)]
pub struct MemoryLogger {
    max_level: LevelFilter,
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLogger {
    pub fn new(max_level: LevelFilter) -> Self {
        Self { max_level, records: Arc::default() }
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Default for MemoryLogger {
    fn default() -> Self {
        Self::new(LevelFilter::TRACE)
    }
}

impl StructuredLogger for MemoryLogger {
    fn is_enabled(&self, level: Level) -> bool {
        level <= self.max_level
    }

    fn log(&self, level: Level, message: &str, fields: &Fields) {
        if !self.is_enabled(level) {
            return;
        }
        self.records.lock().push(LogRecord {
            level,
            message: message.to_string(),
            fields: fields.clone(),
        });
    }
}
