//! Statistical baseline predictor
//!
//! Projects the trailing trend of the last day of history forward. When no
//! history is available it falls back to a deterministic per-metric seed,
//! so it never fails and can back up the sequence model.

use super::Predictor;
use crate::config::BaselineConfig;
use crate::datasource::HistoricalDataSource;
use crate::error::PredictionError;
use crate::metrics::{metric_meta, MetricMeta};
use crate::models::{ForecastSeries, RequestContext, TimeSlot, FORECAST_HORIZON};
use crate::routing::EngineKind;
use crate::stats;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use tracing::{debug, warn};

/// Starting value and per-hour slope used when there is no history
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Seed {
    pub base: f64,
    pub slope: f64,
}

/// Deterministic seed for a metric
pub fn seed_for(meta: &MetricMeta) -> Seed {
    match meta.name {
        "total_events" => Seed { base: 50.0, slope: 0.5 },
        _ if meta.is_ratio() => Seed { base: 0.3, slope: 0.01 },
        _ => Seed { base: 10.0, slope: 0.1 },
    }
}

/// Trend multiplier applied to history-based projections
pub fn trend_factor(slot: TimeSlot) -> f64 {
    match slot {
        TimeSlot::Peak => 1.2,
        TimeSlot::Low => 0.8,
        TimeSlot::Normal | TimeSlot::Weekend => 1.0,
    }
}

/// Slope multiplier applied to seeded projections
pub fn seed_slope_factor(slot: TimeSlot) -> f64 {
    match slot {
        TimeSlot::Peak => 2.0,
        TimeSlot::Low => 0.5,
        TimeSlot::Normal | TimeSlot::Weekend => 1.0,
    }
}

/// Trend-following statistical predictor
pub struct BaselinePredictor {
    data_source: Arc<dyn HistoricalDataSource>,
    config: BaselineConfig,
}

impl BaselinePredictor {
    pub fn new(data_source: Arc<dyn HistoricalDataSource>, config: BaselineConfig) -> Self {
        Self { data_source, config }
    }

    /// Project `last + trend * k * factor` with a little gaussian noise
    pub fn project_history(&self, history: &[f64], meta: &MetricMeta, slot: TimeSlot) -> Vec<f64> {
        let (first, last) = match (history.first(), history.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return self.project_seed(meta, slot),
        };

        let std = stats::std_dev(history);
        let trend = (last - first) / history.len() as f64;
        let factor = trend_factor(slot);
        debug!(
            metric = meta.name,
            mean = stats::mean(history),
            std,
            trend,
            "Baseline trailing statistics"
        );

        let noise = Normal::new(0.0, std * self.config.noise_ratio)
            .ok()
            .filter(|_| std > 0.0 && self.config.noise_ratio > 0.0);
        let mut rng = rand::thread_rng();

        (1..=FORECAST_HORIZON)
            .map(|k| {
                let jitter = noise.as_ref().map(|n| n.sample(&mut rng)).unwrap_or(0.0);
                meta.finish(last + trend * k as f64 * factor + jitter)
            })
            .collect()
    }

    /// Deterministic `base + slope * k` projection
    pub fn project_seed(&self, meta: &MetricMeta, slot: TimeSlot) -> Vec<f64> {
        let seed = seed_for(meta);
        let slope = seed.slope * seed_slope_factor(slot);
        (1..=FORECAST_HORIZON)
            .map(|k| meta.finish(seed.base + slope * k as f64))
            .collect()
    }
}

impl Predictor for BaselinePredictor {
    fn run(
        &self,
        service_id: &str,
        metric_name: &str,
        ctx: &RequestContext,
        model_id: &str,
    ) -> Result<ForecastSeries, PredictionError> {
        let meta = metric_meta(metric_name);

        let history = match self
            .data_source
            .fetch(service_id, metric_name, self.config.history_hours)
        {
            Ok(history) if !history.is_empty() => Some(history),
            Ok(_) => {
                debug!(service_id, metric_name, "Empty history, using seeded baseline");
                None
            }
            Err(e) => {
                warn!(service_id, metric_name, error = %e, "History fetch failed, using seeded baseline");
                None
            }
        };

        let series = match history {
            Some(history) => ForecastSeries::from_values(
                service_id,
                metric_name,
                format!("{}_statistical", model_id),
                self.project_history(&history, meta, ctx.time_slot),
            ),
            None => ForecastSeries::from_values(
                service_id,
                metric_name,
                format!("{}_fallback", model_id),
                self.project_seed(meta, ctx.time_slot),
            ),
        };
        Ok(series)
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::extract_context;
    use crate::datasource::{InMemoryDataSource, UnavailableDataSource};
    use serde_json::json;

    fn ctx(slot: &str) -> RequestContext {
        extract_context(&json!({ "context_id": "b", "time_slot": slot })).unwrap()
    }

    fn quiet_config() -> BaselineConfig {
        BaselineConfig {
            noise_ratio: 0.0,
            ..BaselineConfig::default()
        }
    }

    #[test]
    fn test_seeded_when_source_unavailable() {
        let predictor = BaselinePredictor::new(Arc::new(UnavailableDataSource::new("none")), quiet_config());
        let series = predictor.run("svc", "total_events", &ctx("normal"), "m1").unwrap();

        assert_eq!(series.len(), FORECAST_HORIZON);
        assert_eq!(series.model_id, "m1_fallback");
        // 50 + 0.5k, rounded
        assert_eq!(series.points[0].value, 51.0);
        assert_eq!(series.points[23].value, 62.0);
    }

    #[test]
    fn test_seed_slope_scaled_by_slot() {
        let predictor = BaselinePredictor::new(Arc::new(InMemoryDataSource::new()), quiet_config());
        let meta = metric_meta("avg_cpu");

        let peak = predictor.project_seed(meta, TimeSlot::Peak);
        let low = predictor.project_seed(meta, TimeSlot::Low);
        assert!((peak[0] - 0.32).abs() < 1e-9);
        assert!((low[0] - 0.305).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_metric_seed() {
        assert_eq!(seed_for(metric_meta("queue_depth")), Seed { base: 10.0, slope: 0.1 });
    }

    #[test]
    fn test_statistical_projection_follows_trend() {
        let history: Vec<f64> = (0..24).map(|i| 100.0 + i as f64 * 2.0).collect();
        let source = InMemoryDataSource::new().with_series("svc", "total_events", history);
        let predictor = BaselinePredictor::new(Arc::new(source), quiet_config());

        let series = predictor.run("svc", "total_events", &ctx("normal"), "m1").unwrap();
        assert_eq!(series.model_id, "m1_statistical");
        // trend = (146 - 100) / 24
        let trend: f64 = 46.0 / 24.0;
        assert_eq!(series.points[0].value, (146.0 + trend).round());
        assert_eq!(series.points[23].value, (146.0 + trend * 24.0).round());
        assert!(series.points.windows(2).all(|w| w[1].value >= w[0].value));
    }

    #[test]
    fn test_projection_floored_at_zero() {
        let history: Vec<f64> = (0..24).map(|i| 24.0 - i as f64).collect();
        let source = InMemoryDataSource::new().with_series("svc", "avg_memory", history);
        let predictor = BaselinePredictor::new(Arc::new(source), quiet_config());

        let series = predictor.run("svc", "avg_memory", &ctx("peak"), "m").unwrap();
        assert!(series.points.iter().all(|p| p.value >= 0.0));
        assert_eq!(series.points[23].value, 0.0);
    }

    #[test]
    fn test_noise_is_bounded() {
        let history: Vec<f64> = (0..24).map(|i| if i % 2 == 0 { 90.0 } else { 110.0 }).collect();
        let source = InMemoryDataSource::new().with_series("svc", "total_events", history);
        let predictor = BaselinePredictor::new(Arc::new(source), BaselineConfig::default());

        let series = predictor.run("svc", "total_events", &ctx("normal"), "m").unwrap();
        // trend is 20/24 per hour; noise std is 0.5
        for (k, p) in series.points.iter().enumerate() {
            let expected = 110.0 + (20.0 / 24.0) * (k + 1) as f64;
            assert!((p.value - expected).abs() < 10.0, "hour {} drifted to {}", k, p.value);
        }
    }
}
