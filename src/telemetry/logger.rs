//! Structured logging collaborator.

use tracing::Level;

use crate::fields::Fields;

/// Emits structured log records.
pub trait StructuredLogger: Send + Sync {
    /// Cheap check used before any message is formatted.
    fn is_enabled(&self, level: Level) -> bool;

    fn log(&self, level: Level, message: &str, fields: &Fields);

    /// Bind a field set for subsequent records.
    fn with_fields<'a>(&'a self, fields: &'a Fields) -> LogHandle<'a>
    where
        Self: Sized,
    {
        LogHandle { logger: self, fields }
    }
}

/// A logger bound to a field set.
pub struct LogHandle<'a> {
    logger: &'a dyn StructuredLogger,
    fields: &'a Fields,
}

impl<'a> LogHandle<'a> {
    pub fn new(logger: &'a dyn StructuredLogger, fields: &'a Fields) -> Self {
        Self { logger, fields }
    }

    pub fn log(&self, level: Level, message: &str) {
        if self.logger.is_enabled(level) {
            self.logger.log(level, message, self.fields);
        }
    }
}

/// Logger that emits `tracing` events under the `observe` target.
///
/// Field names are only known at runtime, so they are carried as one
/// JSON-encoded `fields` value.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }
}

impl StructuredLogger for TracingLogger {
    fn is_enabled(&self, level: Level) -> bool {
        match level {
            Level::ERROR => tracing::enabled!(target: "observe", Level::ERROR),
            Level::WARN => tracing::enabled!(target: "observe", Level::WARN),
            Level::INFO => tracing::enabled!(target: "observe", Level::INFO),
            Level::DEBUG => tracing::enabled!(target: "observe", Level::DEBUG),
            _ => tracing::enabled!(target: "observe", Level::TRACE),
        }
    }

    fn log(&self, level: Level, message: &str, fields: &Fields) {
        let fields = fields.to_json();
        match level {
            Level::ERROR => tracing::error!(target: "observe", fields = %fields, "{message}"),
            Level::WARN => tracing::warn!(target: "observe", fields = %fields, "{message}"),
            Level::INFO => tracing::info!(target: "observe", fields = %fields, "{message}"),
            Level::DEBUG => tracing::debug!(target: "observe", fields = %fields, "{message}"),
            _ => tracing::trace!(target: "observe", fields = %fields, "{message}"),
        }
    }
}
