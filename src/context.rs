//! Context passed from an observation to nested work.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::fields::Fields;
use crate::telemetry::SpanContext;

/// Field set shared between an observation and the contexts it hands out.
pub(crate) type SharedFields = Arc<RwLock<Fields>>;

/// Parent span and inheritable fields for the next observation.
///
/// Cheap to clone. A context returned by an observation follows that
/// observation's fields: anything added with `add_field` after the context
/// was handed out is still inherited by nested observations started from it.
#[derive(Debug, Clone, Default)]
pub struct Context {
    span: Option<SpanContext>,
    fields: Option<SharedFields>,
}

impl Context {
    /// An empty context: observations started from it are root spans with
    /// no inherited fields.
    pub fn background() -> Self {
        Self::default()
    }

    pub(crate) fn new(span: SpanContext, fields: SharedFields) -> Self {
        Self { span: Some(span), fields: Some(fields) }
    }

    /// Context whose observations inherit `fields` when they propagate fields.
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = Some(Arc::new(RwLock::new(fields)));
        self
    }

    pub fn span(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    /// Current fields, copied out.
    pub fn fields(&self) -> Option<Fields> {
        self.fields.as_ref().map(|f| f.read().clone())
    }
}
