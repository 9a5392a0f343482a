//! Pipeline configuration
//!
//! Every tunable constant of the pipeline lives here with its default, so a
//! deployment can override them through the service's config layer.

use serde::Deserialize;
use std::time::Duration;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub anomaly: AnomalyConfig,
    pub sizing: SizingConfig,
    pub dedup: DedupConfig,
    pub baseline: BaselineConfig,
}

/// Weights of the three anomaly signals in the combined score
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub avg: f64,
    pub max: f64,
    pub change_rate: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            avg: 0.4,
            max: 0.3,
            change_rate: 0.3,
        }
    }
}

/// Anomaly detector configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// History window compared against the forecast
    pub lookback_hours: usize,
    /// Sensitivity, as a standard-deviation multiple
    pub threshold: f64,
    pub weights: ScoreWeights,
    /// Lower percentile of the trimming band
    pub trim_lower_percentile: f64,
    /// Upper percentile of the trimming band
    pub trim_upper_percentile: f64,
    /// Tukey fence factor
    pub iqr_factor: f64,
    /// Filtered history is only used when at least this many points remain
    pub min_retained_points: usize,
    /// `score_max` must reach `threshold * spike_multiple` to corroborate the combined score
    pub spike_multiple: f64,
    /// Change rate (relative to the historical median) that alone flags an anomaly
    pub change_rate_trigger: f64,
    /// Forecast mean must reach this multiple of the historical mean ...
    pub mean_multiple: f64,
    /// ... and exceed it by this many standard deviations
    pub std_multiple: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 168,
            threshold: 5.0,
            weights: ScoreWeights::default(),
            trim_lower_percentile: 5.0,
            trim_upper_percentile: 95.0,
            iqr_factor: 1.5,
            min_retained_points: 10,
            spike_multiple: 1.5,
            change_rate_trigger: 2.0,
            mean_multiple: 3.0,
            std_multiple: 10.0,
        }
    }
}

/// Per-flavor price table
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FlavorCosts {
    pub small: f64,
    pub medium: f64,
    pub large: f64,
}

/// Sizing and cost configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Users at or below this are `small`
    pub small_max_users: u64,
    /// Users at or below this are `medium`
    pub medium_max_users: u64,
    /// Users assumed when the context carries none
    pub default_users: u64,
    /// Forecast maximum above which `large` is forced
    pub force_large_max: f64,
    /// Forecast mean above which `large` is forced
    pub force_large_mean: f64,
    pub daily_cost: FlavorCosts,
    /// Hourly values at or below this are `small`
    pub hourly_small_max: f64,
    /// Hourly values at or below this are `medium`
    pub hourly_medium_max: f64,
    pub hourly_cost: FlavorCosts,
    /// Map flavors to environment-specific instance types
    pub per_env_instance_types: bool,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            small_max_users: 500,
            medium_max_users: 5000,
            default_users: 100,
            force_large_max: 1000.0,
            force_large_mean: 500.0,
            daily_cost: FlavorCosts {
                small: 1.2,
                medium: 2.8,
                large: 5.5,
            },
            hourly_small_max: 300.0,
            hourly_medium_max: 900.0,
            hourly_cost: FlavorCosts {
                small: 0.05,
                medium: 0.117,
                large: 0.229,
            },
            per_env_instance_types: false,
        }
    }
}

/// Alert deduplication configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub ttl_secs: u64,
}

impl DedupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { ttl_secs: 600 }
    }
}

/// Baseline predictor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Observations fetched for the trailing statistics
    pub history_hours: usize,
    /// Noise standard deviation as a fraction of the trailing std
    pub noise_ratio: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            history_hours: 24,
            noise_ratio: 0.05,
        }
    }
}
