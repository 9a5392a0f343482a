//! Forecast post-processing
//!
//! Applies the context weight to every point and then forces the value into
//! the metric's domain, so downstream sizing and anomaly scoring only ever
//! see stabilized values.

use crate::metrics::{metric_meta, MetricMeta};
use crate::models::{ForecastPoint, ForecastSeries, RequestContext};
use chrono::Utc;

/// Scale a value by the context weight
pub fn apply_weight(value: f64, weight: f64) -> f64 {
    value * weight
}

fn stabilize(point: &ForecastPoint, weight: f64, meta: &MetricMeta) -> ForecastPoint {
    ForecastPoint {
        time: point.time,
        value: meta.clamp(apply_weight(point.value, weight)),
    }
}

/// Weight and clamp a raw forecast
///
/// The output has the same length and ordering as the input; only the
/// generation timestamp is refreshed.
pub fn postprocess(raw: &ForecastSeries, ctx: &RequestContext) -> ForecastSeries {
    let meta = metric_meta(&raw.metric_name);
    let points = raw
        .points
        .iter()
        .map(|p| stabilize(p, ctx.weight, meta))
        .collect();

    ForecastSeries {
        service_id: raw.service_id.clone(),
        metric_name: raw.metric_name.clone(),
        model_id: raw.model_id.clone(),
        generated_at: Utc::now(),
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::extract_context;
    use crate::models::FORECAST_HORIZON;
    use serde_json::json;

    fn ctx(weight: f64) -> RequestContext {
        extract_context(&json!({ "context_id": "p", "weight": weight })).unwrap()
    }

    fn series(metric: &str, values: Vec<f64>) -> ForecastSeries {
        ForecastSeries::from_values("svc", metric, "m", values)
    }

    #[test]
    fn test_ratio_values_clamped() {
        let raw = series(
            "avg_cpu",
            (0..FORECAST_HORIZON).map(|i| i as f64 * 0.1 - 0.5).collect(),
        );
        let out = postprocess(&raw, &ctx(1.0));

        assert_eq!(out.len(), FORECAST_HORIZON);
        assert!(out.points.iter().all(|p| (0.0..=1.0).contains(&p.value)));
        assert_eq!(out.points[0].value, 0.0);
        assert_eq!(out.points[23].value, 1.0);
    }

    #[test]
    fn test_count_values_weighted_and_floored() {
        let raw = series("total_events", vec![100.0, -5.0, f64::NAN, 2000.0]);
        let out = postprocess(&raw, &ctx(1.5));

        assert_eq!(out.values(), vec![150.0, 0.0, 0.0, 3000.0]);
    }

    #[test]
    fn test_order_and_timestamps_preserved() {
        let raw = series("total_events", vec![3.0, 1.0, 2.0]);
        let out = postprocess(&raw, &ctx(1.0));

        let raw_times: Vec<_> = raw.points.iter().map(|p| p.time).collect();
        let out_times: Vec<_> = out.points.iter().map(|p| p.time).collect();
        assert_eq!(raw_times, out_times);
        assert_eq!(out.values(), vec![3.0, 1.0, 2.0]);
        assert!(out.generated_at >= raw.generated_at);
    }

    #[test]
    fn test_idempotent_with_unit_weight() {
        let raw = series("avg_memory", (0..FORECAST_HORIZON).map(|i| (i as f64) / 10.0).collect());
        let once = postprocess(&raw, &ctx(1.0));
        let twice = postprocess(&once, &ctx(1.0));
        assert_eq!(once.points, twice.points);
    }

    #[test]
    fn test_zero_weight_zeroes_series() {
        let raw = series("total_events", vec![10.0; FORECAST_HORIZON]);
        let out = postprocess(&raw, &ctx(0.0));
        assert!(out.points.iter().all(|p| p.value == 0.0));
    }
}
