//! Configuration loading from environment variables or TOML.
//!
//! Environment values fall back to defaults when missing or invalid, without
//! crashing. TOML documents are strict: unknown spacing or labelling names
//! are errors.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `OBSERVE_BUCKET_MIN_MS` | 1 | Smallest non-zero histogram bound (ms) |
//! | `OBSERVE_BUCKET_MAX_MS` | 10000 | Largest histogram bound (ms) |
//! | `OBSERVE_BUCKET_COUNT` | 20 | Number of duration buckets, at most `MAX_BUCKETS` |
//! | `OBSERVE_BUCKET_SPACING` | log_linear | `linear` or `log_linear` |
//! | `OBSERVE_ERROR_LABELS` | category | `category` or `message` |
//! | `OBSERVE_COMPLETION_LEVEL` | debug | Level of the end-of-observation record, or `off` |
//! | `OBSERVE_LOG_LEVEL` | info | `EnvFilter` directive |
//! | `OBSERVE_LOG_FORMAT` | json | `json` or `pretty` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::buckets::{HistogramPlan, Spacing};
use crate::error::ObserveError;
use crate::observation::ErrorLabeling;
use crate::telemetry::{LogConfig, LogFormat};

/// Effective configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserveConfig {
    pub histogram: HistogramPlan,
    pub error_labels: ErrorLabeling,
    pub completion_level: Option<Level>,
    pub log: LogConfig,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            histogram: HistogramPlan::simple(),
            error_labels: ErrorLabeling::Category,
            completion_level: Some(Level::DEBUG),
            log: LogConfig::default(),
        }
    }
}

/// Serializable summary of the effective values.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub bucket_min_ms: u64,
    pub bucket_max_ms: u64,
    pub bucket_count: usize,
    pub bucket_spacing: Spacing,
    pub error_labels: ErrorLabeling,
    pub completion_level: String,
    pub log_level: String,
    pub log_format: String,
}

/// Parse an env var with `FromStr`, returning `default` on missing or invalid.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// `off`/`none` disable the record; anything else must be a level name.
fn parse_level(s: &str) -> Result<Option<Level>, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "off" | "none" => Ok(None),
        other => Level::from_str(other)
            .map(Some)
            .map_err(|_| format!("unknown level: {other}")),
    }
}

fn load_histogram() -> HistogramPlan {
    let defaults = HistogramPlan::simple();
    let min_ms = parse_env("OBSERVE_BUCKET_MIN_MS", defaults.min.as_millis() as u64);
    let max_ms = parse_env("OBSERVE_BUCKET_MAX_MS", defaults.max.as_millis() as u64);
    let buckets = parse_env("OBSERVE_BUCKET_COUNT", defaults.buckets).max(1);
    let spacing = parse_env("OBSERVE_BUCKET_SPACING", defaults.spacing);
    let max_ms = max_ms.max(min_ms);

    let plan = HistogramPlan::new(
        Duration::from_millis(min_ms),
        Duration::from_millis(max_ms),
        buckets,
        spacing,
    );
    // Zero minimum with log spacing, or more than MAX_BUCKETS: keep the defaults.
    if plan.boundaries().is_ok() {
        plan
    } else {
        defaults
    }
}

fn load_log_config() -> LogConfig {
    let defaults = LogConfig::default();
    LogConfig {
        format: parse_env("OBSERVE_LOG_FORMAT", defaults.format),
        level: std::env::var("OBSERVE_LOG_LEVEL").unwrap_or(defaults.level),
        ..defaults
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> ObserveConfig {
    let completion_level = match std::env::var("OBSERVE_COMPLETION_LEVEL") {
        Ok(val) => parse_level(&val).unwrap_or(Some(Level::DEBUG)),
        Err(_) => Some(Level::DEBUG),
    };

    ObserveConfig {
        histogram: load_histogram(),
        error_labels: parse_env("OBSERVE_ERROR_LABELS", ErrorLabeling::Category),
        completion_level,
        log: load_log_config(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    histogram: Option<FileHistogram>,
    error_labels: Option<ErrorLabeling>,
    completion_level: Option<String>,
    log: Option<FileLog>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileHistogram {
    min_ms: u64,
    max_ms: u64,
    buckets: usize,
    #[serde(default)]
    spacing: Spacing,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileLog {
    level: Option<String>,
    format: Option<String>,
    output_path: Option<PathBuf>,
    span_events: Option<bool>,
}

impl ObserveConfig {
    /// Parse a TOML document. Omitted keys keep their defaults.
    ///
    /// ```toml
    /// error_labels = "category"
    /// completion_level = "info"
    ///
    /// [histogram]
    /// min_ms = 1
    /// max_ms = 10000
    /// buckets = 20
    /// spacing = "log_linear"
    ///
    /// [log]
    /// level = "info"
    /// format = "json"
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ObserveError> {
        let file: FileConfig =
            toml::from_str(source).map_err(|e| ObserveError::Config(e.to_string()))?;
        let mut config = Self::default();

        if let Some(h) = file.histogram {
            config.histogram = HistogramPlan::new(
                Duration::from_millis(h.min_ms),
                Duration::from_millis(h.max_ms),
                h.buckets,
                h.spacing,
            );
        }
        if let Some(labels) = file.error_labels {
            config.error_labels = labels;
        }
        if let Some(level) = file.completion_level {
            config.completion_level = parse_level(&level).map_err(ObserveError::Config)?;
        }
        if let Some(log) = file.log {
            if let Some(level) = log.level {
                config.log.level = level;
            }
            if let Some(format) = log.format {
                config.log.format = format.parse::<LogFormat>().map_err(ObserveError::Config)?;
            }
            config.log.output_path = log.output_path;
            config.log.span_events = log.span_events.unwrap_or(false);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the histogram plan can be evaluated.
    pub fn validate(&self) -> Result<(), ObserveError> {
        self.histogram
            .boundaries()
            .map(|_| ())
            .map_err(|e| ObserveError::Config(format!("histogram: {e}")))
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            bucket_min_ms: self.histogram.min.as_millis() as u64,
            bucket_max_ms: self.histogram.max.as_millis() as u64,
            bucket_count: self.histogram.buckets,
            bucket_spacing: self.histogram.spacing,
            error_labels: self.error_labels,
            completion_level: self
                .completion_level
                .map(|l| l.as_str().to_ascii_lowercase())
                .unwrap_or_else(|| "off".to_string()),
            log_level: self.log.level.clone(),
            log_format: format!("{:?}", self.log.format).to_ascii_lowercase(),
        }
    }
}
