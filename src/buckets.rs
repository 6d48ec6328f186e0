//! Histogram bucket boundaries for duration metrics.
//!
//! Boundaries are expressed in seconds. The first boundary is always `0.0`
//! (an explicit underflow bucket); the remaining ones run from the plan's
//! minimum to its maximum, spaced linearly or geometrically.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PlanError;

/// Upper bound on the bucket count accepted by [`plan`].
pub const MAX_BUCKETS: usize = 4096;

/// How boundaries between `min` and `max` are distributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Spacing {
    /// Equal distance between consecutive boundaries.
    Linear,
    /// Equal ratio between consecutive boundaries. Requires `min > 0`.
    #[default]
    LogLinear,
}

impl FromStr for Spacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "log_linear" | "loglinear" | "log" => Ok(Self::LogLinear),
            other => Err(format!("unknown spacing: {other}")),
        }
    }
}

/// Compute `buckets + 1` non-decreasing boundaries in seconds.
///
/// # Preconditions
///
/// - `1 <= buckets <= MAX_BUCKETS`
/// - `min <= max`
/// - `min > 0` when `spacing` is [`Spacing::LogLinear`]
///
/// Violations are returned as [`PlanError`]; nothing is clamped.
pub fn plan(
    min: Duration,
    max: Duration,
    buckets: usize,
    spacing: Spacing,
) -> Result<Vec<f64>, PlanError> {
    if buckets < 1 {
        return Err(PlanError::InvalidBucketCount(buckets));
    }
    if buckets > MAX_BUCKETS {
        return Err(PlanError::TooManyBuckets { requested: buckets, max: MAX_BUCKETS });
    }
    if max < min {
        return Err(PlanError::InvertedRange { min, max });
    }
    if spacing == Spacing::LogLinear && min.is_zero() {
        return Err(PlanError::NonPositiveMinimum);
    }

    let lo = min.as_secs_f64();
    let hi = max.as_secs_f64();

    let mut bounds = Vec::with_capacity(buckets + 1);
    bounds.push(0.0);

    if buckets == 1 {
        bounds.push(hi);
        return Ok(bounds);
    }

    let steps = (buckets - 1) as f64;
    match spacing {
        Spacing::Linear => {
            let step = (hi - lo) / steps;
            bounds.extend((0..buckets).map(|i| lo + step * i as f64));
        }
        Spacing::LogLinear => {
            let (ln_lo, ln_hi) = (lo.ln(), hi.ln());
            let step = (ln_hi - ln_lo) / steps;
            bounds.extend((0..buckets).map(|i| (ln_lo + step * i as f64).exp()));
        }
    }

    // Pin the endpoints; exp/ln and repeated addition drift by a few ulps.
    for b in &mut bounds[1..] {
        *b = b.clamp(lo, hi);
    }
    bounds[1] = lo;
    bounds[buckets] = hi;
    Ok(bounds)
}

/// Inputs to [`plan`] for one duration histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramPlan {
    pub min: Duration,
    pub max: Duration,
    pub buckets: usize,
    pub spacing: Spacing,
}

impl HistogramPlan {
    pub fn new(min: Duration, max: Duration, buckets: usize, spacing: Spacing) -> Self {
        Self { min, max, buckets, spacing }
    }

    /// 1ms to 10s over 20 log-linear buckets, suited to request latencies.
    pub fn simple() -> Self {
        Self::new(Duration::from_millis(1), Duration::from_secs(10), 20, Spacing::LogLinear)
    }

    /// Evaluate the plan.
    pub fn boundaries(&self) -> Result<Vec<f64>, PlanError> {
        plan(self.min, self.max, self.buckets, self.spacing)
    }
}

impl Default for HistogramPlan {
    fn default() -> Self {
        Self::simple()
    }
}
