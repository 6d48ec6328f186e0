//! Tracing collaborator: span creation and the `tracing`-backed default.
//!
//! `tracing` spans cannot grow fields after creation, so `TracingSpan`
//! reports annotations as INFO events parented to the span and collects
//! attributes into one INFO record written when the span is finished. Both
//! use the span's own level, so whatever filter lets the span through also
//! keeps its attributes.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::field::Empty;
use uuid::Uuid;

/// A span attribute value. Only these types are mirrored onto spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Str(String),
    Bool(bool),
    Int(i64),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
        }
    }
}

/// Role of a span in a distributed trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Server => "server",
            Self::Client => "client",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

/// Extra hints applied when a span is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanOption {
    /// Set the span kind. The last kind given wins.
    Kind(SpanKind),
    /// Attach an attribute at start time.
    Attribute(String, AttributeValue),
    /// Ignore any parent found in the context and start a new trace.
    NewRoot,
}

/// Identity of a live span, carried through [`crate::Context`].
#[derive(Clone)]
pub struct SpanContext {
    pub trace_id: Uuid,
    pub span_id: u64,
    /// Backend-specific parent handle; only the tracer that made it reads it.
    backend: Option<Arc<dyn Any + Send + Sync>>,
}

impl SpanContext {
    pub fn new(trace_id: Uuid, span_id: u64) -> Self {
        Self { trace_id, span_id, backend: None }
    }

    /// Attach a backend handle that a tracer can later downcast.
    pub fn with_backend<T: Any + Send + Sync>(mut self, handle: T) -> Self {
        self.backend = Some(Arc::new(handle));
        self
    }

    pub fn backend<T: Any>(&self) -> Option<&T> {
        self.backend.as_deref().and_then(|b| b.downcast_ref::<T>())
    }
}

impl fmt::Debug for SpanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanContext")
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .finish_non_exhaustive()
    }
}

impl PartialEq for SpanContext {
    fn eq(&self, other: &Self) -> bool {
        self.trace_id == other.trace_id && self.span_id == other.span_id
    }
}

/// One timed operation in a trace.
pub trait Span: Send {
    fn context(&self) -> SpanContext;
    fn set_attribute(&mut self, key: &str, value: AttributeValue);
    fn add_event(&mut self, message: &str);
    fn set_error(&mut self, error: bool);
    /// Close the span. Implementations ignore calls after the first.
    fn finish(&mut self);
}

/// Starts spans.
pub trait Tracer: Send + Sync {
    /// Start a span as a child of `parent`, or a root span when `parent` is
    /// `None` or `options` contains [`SpanOption::NewRoot`].
    fn start_span(
        &self,
        parent: Option<&SpanContext>,
        name: &str,
        options: &[SpanOption],
    ) -> Box<dyn Span>;
}

/// Resolve the effective parent after applying `NewRoot`.
pub(crate) fn effective_parent<'a>(
    parent: Option<&'a SpanContext>,
    options: &[SpanOption],
) -> Option<&'a SpanContext> {
    if options.iter().any(|o| matches!(o, SpanOption::NewRoot)) {
        None
    } else {
        parent
    }
}

/// Last kind in `options`, defaulting to internal.
pub(crate) fn effective_kind(options: &[SpanOption]) -> SpanKind {
    options
        .iter()
        .rev()
        .find_map(|o| match o {
            SpanOption::Kind(kind) => Some(*kind),
            _ => None,
        })
        .unwrap_or_default()
}

/// Tracer that maps observations onto `tracing` spans.
#[derive(Debug, Default)]
pub struct TracingTracer {
    // Fallback ids for spans the active subscriber disabled.
    next_local_id: AtomicU64,
}

impl TracingTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracer for TracingTracer {
    fn start_span(
        &self,
        parent: Option<&SpanContext>,
        name: &str,
        options: &[SpanOption],
    ) -> Box<dyn Span> {
        let parent = effective_parent(parent, options);
        let kind = effective_kind(options);
        let trace_id = parent.map(|p| p.trace_id).unwrap_or_else(Uuid::new_v4);
        let parent_span = parent.and_then(|p| p.backend::<tracing::Span>());

        let span = match parent_span {
            Some(p) => tracing::info_span!(
                parent: p,
                "observation",
                otel.name = %name,
                otel.kind = kind.as_str(),
                trace_id = %trace_id,
                error = Empty,
                error.message = Empty,
            ),
            None => tracing::info_span!(
                parent: None,
                "observation",
                otel.name = %name,
                otel.kind = kind.as_str(),
                trace_id = %trace_id,
                error = Empty,
                error.message = Empty,
            ),
        };

        let span_id = span
            .id()
            .map(|id| id.into_u64())
            .unwrap_or_else(|| self.next_local_id.fetch_add(1, Ordering::Relaxed) + 1);

        let mut traced = TracingSpan {
            name: name.to_string(),
            context: SpanContext::new(trace_id, span_id).with_backend(span.clone()),
            span,
            attributes: BTreeMap::new(),
            finished: false,
        };
        for option in options {
            if let SpanOption::Attribute(key, value) = option {
                traced.set_attribute(key, value.clone());
            }
        }
        Box::new(traced)
    }
}

/// A span backed by `tracing::Span`.
pub struct TracingSpan {
    name: String,
    context: SpanContext,
    span: tracing::Span,
    attributes: BTreeMap<String, AttributeValue>,
    finished: bool,
}

impl Span for TracingSpan {
    fn context(&self) -> SpanContext {
        self.context.clone()
    }

    fn set_attribute(&mut self, key: &str, value: AttributeValue) {
        if self.finished {
            return;
        }
        self.attributes.insert(key.to_string(), value);
    }

    fn add_event(&mut self, message: &str) {
        if self.finished {
            return;
        }
        tracing::info!(parent: &self.span, annotation = message, "span event");
    }

    fn set_error(&mut self, error: bool) {
        self.span.record("error", error);
        if let Some(AttributeValue::Str(message)) = self.attributes.get("error") {
            self.span.record("error.message", message.as_str());
        }
    }

    /// Writes the attribute record and releases this handle. The `tracing`
    /// span itself closes, and `FmtSpan::CLOSE` timings are reported, only
    /// once every `Context` holding a clone of it has been dropped as well.
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let attributes = serde_json::to_string(&self.attributes).unwrap_or_default();
        tracing::info!(
            parent: &self.span,
            observation = %self.name,
            attributes = %attributes,
            "span finished"
        );
        self.span = tracing::Span::none();
    }
}
