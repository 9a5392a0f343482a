//! Forecast anomaly detection
//!
//! Compares a processed forecast against robust statistics of the metric's
//! recent history. An anomaly needs either two corroborating signals or a
//! single extreme one, which keeps noisy single-point spikes quiet.

use crate::config::AnomalyConfig;
use crate::datasource::HistoricalDataSource;
use crate::metrics::metric_meta;
use crate::models::{ForecastSeries, RequestContext};
use crate::stats;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The three raw signals feeding the combined score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub avg_based: f64,
    pub max_based: f64,
    pub change_rate: f64,
}

/// Statistics of the cleaned history
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub median: f64,
    pub mean: f64,
    pub std: f64,
    pub data_points_used: usize,
    pub outliers_removed: usize,
}

/// Result of comparing a forecast with history
///
/// All intermediate values are kept so callers can explain the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub is_anomaly: bool,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<ScoreBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<HistorySummary>,
    pub max_pred: f64,
    pub avg_pred: f64,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AnomalyVerdict {
    /// Non-anomalous verdict explaining why no comparison was made
    pub fn inconclusive(threshold: f64, reason: impl Into<String>) -> Self {
        Self {
            is_anomaly: false,
            score: 0.0,
            breakdown: None,
            history: None,
            max_pred: 0.0,
            avg_pred: 0.0,
            threshold,
            reason: Some(reason.into()),
        }
    }
}

/// Robust, multi-signal anomaly detector
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Fetch the lookback window and score the forecast against it
    ///
    /// Never fails: fetch errors and empty history produce a
    /// non-anomalous verdict carrying the reason.
    pub fn evaluate(
        &self,
        series: &ForecastSeries,
        ctx: &RequestContext,
        source: &dyn HistoricalDataSource,
    ) -> AnomalyVerdict {
        let history = match source.fetch(&series.service_id, &series.metric_name, self.config.lookback_hours) {
            Ok(history) => history,
            Err(e) => {
                warn!(
                    context_id = %ctx.context_id,
                    service_id = %series.service_id,
                    metric = %series.metric_name,
                    error = %e,
                    "History unavailable for anomaly check"
                );
                return AnomalyVerdict::inconclusive(
                    self.config.threshold,
                    format!("history fetch failed: {}", e),
                );
            }
        };

        self.score(series, &history)
    }

    /// Score a forecast against an already-fetched history
    pub fn score(&self, series: &ForecastSeries, history: &[f64]) -> AnomalyVerdict {
        let cfg = &self.config;
        if history.is_empty() {
            return AnomalyVerdict::inconclusive(cfg.threshold, "no historical data");
        }

        let meta = metric_meta(&series.metric_name);
        let cleaned: Vec<f64> = self
            .robust_history(history)
            .into_iter()
            .map(|v| meta.clamp(v))
            .collect();

        let summary = HistorySummary {
            median: stats::median(&cleaned),
            mean: stats::mean(&cleaned),
            std: stats::std_dev(&cleaned),
            data_points_used: cleaned.len(),
            outliers_removed: history.len() - cleaned.len(),
        };

        let max_pred = meta.clamp(series.max_value());
        let avg_pred = meta.clamp(series.mean_value());
        let breakdown = signals(&summary, max_pred, avg_pred);

        let w = cfg.weights;
        let score = w.avg * breakdown.avg_based
            + w.max * breakdown.max_based
            + w.change_rate * breakdown.change_rate.abs();

        let corroborated = score >= cfg.threshold && breakdown.max_based >= cfg.threshold * cfg.spike_multiple;
        let surge = breakdown.change_rate >= cfg.change_rate_trigger;
        let far_above_history = avg_pred >= summary.mean * cfg.mean_multiple
            && summary.std > 0.0
            && avg_pred - summary.mean >= summary.std * cfg.std_multiple;
        let is_anomaly = corroborated || surge || far_above_history;

        debug!(
            metric = %series.metric_name,
            score,
            avg_based = breakdown.avg_based,
            max_based = breakdown.max_based,
            change_rate = breakdown.change_rate,
            corroborated,
            surge,
            far_above_history,
            "Anomaly scored"
        );

        AnomalyVerdict {
            is_anomaly,
            score,
            breakdown: Some(breakdown),
            history: Some(summary),
            max_pred,
            avg_pred,
            threshold: cfg.threshold,
            reason: None,
        }
    }

    /// Percentile trim followed by a Tukey fence
    ///
    /// Each filter is only applied when enough points survive it.
    pub fn robust_history(&self, history: &[f64]) -> Vec<f64> {
        let cfg = &self.config;

        let lo = stats::percentile(history, cfg.trim_lower_percentile);
        let hi = stats::percentile(history, cfg.trim_upper_percentile);
        let mut cleaned = stats::retain_between(history, lo, hi);
        if cleaned.len() < cfg.min_retained_points {
            cleaned = history.to_vec();
        }

        let q1 = stats::percentile(&cleaned, 25.0);
        let q3 = stats::percentile(&cleaned, 75.0);
        let iqr = q3 - q1;
        if iqr > 0.0 {
            let fenced = stats::retain_between(&cleaned, q1 - cfg.iqr_factor * iqr, q3 + cfg.iqr_factor * iqr);
            if fenced.len() >= cfg.min_retained_points {
                cleaned = fenced;
            }
        }
        cleaned
    }
}

fn deviation(pred: f64, summary: &HistorySummary) -> f64 {
    if summary.std > 0.0 {
        (pred - summary.mean) / summary.std
    } else if summary.median > 0.0 {
        pred / summary.median - 1.0
    } else {
        0.0
    }
}

fn signals(summary: &HistorySummary, max_pred: f64, avg_pred: f64) -> ScoreBreakdown {
    let change_rate = if summary.median > 0.0 {
        (avg_pred - summary.median) / summary.median
    } else {
        0.0
    };
    ScoreBreakdown {
        avg_based: deviation(avg_pred, summary),
        max_based: deviation(max_pred, summary),
        change_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::extract_context;
    use crate::datasource::{InMemoryDataSource, UnavailableDataSource};
    use crate::models::FORECAST_HORIZON;
    use serde_json::json;

    /// 168 hourly points alternating around 50 with std 10
    fn history() -> Vec<f64> {
        (0..168).map(|i| if i % 2 == 0 { 40.0 } else { 60.0 }).collect()
    }

    fn forecast(metric: &str, value: f64) -> ForecastSeries {
        ForecastSeries::from_values("svc", metric, "m", vec![value; FORECAST_HORIZON])
    }

    fn ctx() -> RequestContext {
        extract_context(&json!({ "context_id": "a" })).unwrap()
    }

    #[test]
    fn test_forecast_at_mean_is_normal() {
        let detector = AnomalyDetector::default();
        let verdict = detector.score(&forecast("total_events", 50.0), &history());

        assert!(!verdict.is_anomaly);
        assert!(verdict.score.abs() < 1e-9);
        let summary = verdict.history.unwrap();
        assert_eq!(summary.mean, 50.0);
        assert_eq!(summary.std, 10.0);
        assert_eq!(summary.data_points_used, 168);
    }

    #[test]
    fn test_forecast_far_above_history_is_anomalous() {
        let detector = AnomalyDetector::default();
        let verdict = detector.score(&forecast("total_events", 500.0), &history());

        assert!(verdict.is_anomaly);
        let b = verdict.breakdown.unwrap();
        assert!((b.avg_based - 45.0).abs() < 1e-9);
        assert!((b.change_rate - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_change_rate_alone_triggers() {
        let config = AnomalyConfig {
            threshold: 1000.0,
            ..AnomalyConfig::default()
        };
        let detector = AnomalyDetector::new(config);
        // median 50, forecast 160: change rate 2.2 but far below the score threshold
        let verdict = detector.score(&forecast("total_events", 160.0), &history());
        assert!(verdict.is_anomaly);
    }

    #[test]
    fn test_moderate_rise_is_not_anomalous() {
        let detector = AnomalyDetector::default();
        // 2 std above mean, change rate 0.4
        let verdict = detector.score(&forecast("total_events", 70.0), &history());
        assert!(!verdict.is_anomaly);
        assert!(verdict.score > 0.0);
    }

    #[test]
    fn test_zero_std_uses_median_ratio() {
        let detector = AnomalyDetector::default();
        let flat = vec![20.0; 48];
        let verdict = detector.score(&forecast("total_events", 30.0), &flat);

        let b = verdict.breakdown.unwrap();
        assert!((b.avg_based - 0.5).abs() < 1e-9);
        assert!((b.max_based - 0.5).abs() < 1e-9);
        assert!(!verdict.is_anomaly);
    }

    #[test]
    fn test_outliers_trimmed() {
        let detector = AnomalyDetector::default();
        let mut hist = history();
        hist.push(10_000.0);
        hist.push(-500.0);

        let cleaned = detector.robust_history(&hist);
        assert!(cleaned.iter().all(|v| (40.0..=60.0).contains(v)));

        let verdict = detector.score(&forecast("total_events", 50.0), &hist);
        assert!(verdict.history.unwrap().outliers_removed >= 2);
    }

    #[test]
    fn test_short_history_kept_untrimmed() {
        let detector = AnomalyDetector::default();
        let short = vec![1.0, 2.0, 3.0, 100.0];
        assert_eq!(detector.robust_history(&short), short);
    }

    #[test]
    fn test_ratio_history_clamped() {
        let detector = AnomalyDetector::default();
        let hist: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 1.4 } else { 1.6 }).collect();
        let verdict = detector.score(&forecast("avg_cpu", 0.5), &hist);

        let summary = verdict.history.unwrap();
        assert_eq!(summary.mean, 1.0);
        assert_eq!(summary.std, 0.0);
    }

    #[test]
    fn test_empty_and_unavailable_history() {
        let detector = AnomalyDetector::default();
        let empty = InMemoryDataSource::new().with_series("svc", "total_events", vec![]);
        let verdict = detector.evaluate(&forecast("total_events", 50.0), &ctx(), &empty);
        assert!(!verdict.is_anomaly);
        assert_eq!(verdict.score, 0.0);
        assert_eq!(verdict.reason.as_deref(), Some("no historical data"));

        let down = UnavailableDataSource::new("db offline");
        let verdict = detector.evaluate(&forecast("total_events", 5000.0), &ctx(), &down);
        assert!(!verdict.is_anomaly);
        assert!(verdict.reason.unwrap().contains("db offline"));
    }
}
