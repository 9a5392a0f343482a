//! Metric metadata registry
//!
//! Classifies every metric as a bounded `ratio` or an unbounded `count` so
//! clamping and planning normalization are decided in one place. The table
//! is built once per process and never mutated.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Numeric domain of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Bounded to [0, 1]
    Ratio,
    /// Unbounded absolute value
    Count,
}

/// Per-metric descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricMeta {
    pub name: &'static str,
    pub kind: MetricKind,
    pub clamp_min: f64,
    pub clamp_max: Option<f64>,
    /// Denominator used to bring the metric onto a 0..1 planning scale
    pub planning_max: f64,
    /// Forecast values are rounded to whole numbers
    pub integer_valued: bool,
}

impl MetricMeta {
    const fn count(name: &'static str, planning_max: f64, integer_valued: bool) -> Self {
        Self {
            name,
            kind: MetricKind::Count,
            clamp_min: 0.0,
            clamp_max: None,
            planning_max,
            integer_valued,
        }
    }

    const fn ratio(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Ratio,
            clamp_min: 0.0,
            clamp_max: Some(1.0),
            planning_max: 1.0,
            integer_valued: false,
        }
    }

    pub fn is_ratio(&self) -> bool {
        self.kind == MetricKind::Ratio
    }

    /// Upper bound for the metric; ratio metrics are capped at 1.0 when unset
    pub fn upper_bound(&self) -> Option<f64> {
        match self.kind {
            MetricKind::Ratio => Some(self.clamp_max.unwrap_or(1.0)),
            MetricKind::Count => self.clamp_max,
        }
    }

    /// Force a value into the metric's valid domain. NaN maps to 0.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return 0.0;
        }
        let floored = value.max(self.clamp_min);
        match self.upper_bound() {
            Some(hi) => floored.min(hi),
            None => floored,
        }
    }

    /// Final form of a predicted value: floored at zero, rounded for
    /// integer-valued metrics
    pub fn finish(&self, value: f64) -> f64 {
        let value = value.max(0.0);
        if self.integer_valued {
            value.round()
        } else {
            value
        }
    }

    /// Value on a 0..1 scale for capacity planning
    pub fn normalize_for_planning(&self, value: f64) -> f64 {
        if self.is_ratio() {
            return self.clamp(value);
        }
        let mut denom = if self.planning_max > 0.0 {
            self.planning_max
        } else {
            self.clamp_max.unwrap_or(1.0)
        };
        if denom <= 0.0 {
            denom = 1.0;
        }
        if value.is_nan() {
            return 0.0;
        }
        (value / denom).clamp(0.0, 1.0)
    }
}

const DEFAULT_METRIC: MetricMeta = MetricMeta::count("default", 100.0, false);

static REGISTRY: OnceLock<HashMap<&'static str, MetricMeta>> = OnceLock::new();

fn registry() -> &'static HashMap<&'static str, MetricMeta> {
    REGISTRY.get_or_init(|| {
        [
            MetricMeta::count("total_events", 1000.0, true),
            MetricMeta::ratio("avg_cpu"),
            MetricMeta::ratio("avg_memory"),
            MetricMeta::ratio("cpu_utilization"),
            MetricMeta::ratio("memory_utilization"),
        ]
        .into_iter()
        .map(|meta| (meta.name, meta))
        .collect()
    })
}

/// Look up a metric; unknown metrics are treated as plain counts
pub fn metric_meta(name: &str) -> &'static MetricMeta {
    registry().get(name).unwrap_or(&DEFAULT_METRIC)
}
