//! Observability infrastructure for the capacity planner
//!
//! Provides:
//! - Prometheus metrics (prediction latency, forecasts, fallbacks, anomalies, alerts)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PlannerMetricsInner> = OnceLock::new();

struct PlannerMetricsInner {
    prediction_latency_seconds: HistogramVec,
    forecasts_generated: IntCounterVec,
    predictor_fallbacks: IntCounter,
    anomalies_detected: IntCounterVec,
    alerts_sent: IntCounter,
    alerts_suppressed: IntCounter,
    alerts_failed: IntCounter,
    context_rejections: IntCounter,
}

impl PlannerMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram_vec!(
                "capacity_planner_prediction_latency_seconds",
                "Time spent producing a raw forecast",
                &["engine"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            forecasts_generated: register_int_counter_vec!(
                "capacity_planner_forecasts_generated_total",
                "Total number of forecasts served",
                &["metric"]
            )
            .expect("Failed to register forecasts_generated"),

            predictor_fallbacks: register_int_counter!(
                "capacity_planner_predictor_fallbacks_total",
                "Forecasts served by the baseline after the routed predictor failed"
            )
            .expect("Failed to register predictor_fallbacks"),

            anomalies_detected: register_int_counter_vec!(
                "capacity_planner_anomalies_detected_total",
                "Total number of anomalous forecasts",
                &["metric"]
            )
            .expect("Failed to register anomalies_detected"),

            alerts_sent: register_int_counter!(
                "capacity_planner_alerts_sent_total",
                "Alerts accepted by the transport"
            )
            .expect("Failed to register alerts_sent"),

            alerts_suppressed: register_int_counter!(
                "capacity_planner_alerts_suppressed_total",
                "Anomalies not alerted because of the dedup window"
            )
            .expect("Failed to register alerts_suppressed"),

            alerts_failed: register_int_counter!(
                "capacity_planner_alerts_failed_total",
                "Alerts the transport did not deliver"
            )
            .expect("Failed to register alerts_failed"),

            context_rejections: register_int_counter!(
                "capacity_planner_context_rejections_total",
                "Requests rejected for an invalid context"
            )
            .expect("Failed to register context_rejections"),
        }
    }
}

/// Planner metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same collectors.
#[derive(Clone)]
pub struct PlannerMetrics {
    _private: (),
}

impl Default for PlannerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PlannerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PlannerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PlannerMetricsInner {
        GLOBAL_METRICS.get_or_init(PlannerMetricsInner::new)
    }

    pub fn observe_prediction_latency(&self, engine: &str, duration_secs: f64) {
        self.inner()
            .prediction_latency_seconds
            .with_label_values(&[engine])
            .observe(duration_secs);
    }

    pub fn inc_forecasts_generated(&self, metric: &str) {
        self.inner().forecasts_generated.with_label_values(&[metric]).inc();
    }

    pub fn inc_predictor_fallbacks(&self) {
        self.inner().predictor_fallbacks.inc();
    }

    pub fn inc_anomalies_detected(&self, metric: &str) {
        self.inner().anomalies_detected.with_label_values(&[metric]).inc();
    }

    pub fn inc_alerts_sent(&self) {
        self.inner().alerts_sent.inc();
    }

    pub fn inc_alerts_suppressed(&self) {
        self.inner().alerts_suppressed.inc();
    }

    pub fn inc_alerts_failed(&self) {
        self.inner().alerts_failed.inc();
    }

    pub fn inc_context_rejections(&self) {
        self.inner().context_rejections.inc();
    }

    pub fn predictor_fallbacks(&self) -> u64 {
        self.inner().predictor_fallbacks.get()
    }

    pub fn alerts_sent(&self) -> u64 {
        self.inner().alerts_sent.get()
    }
}

/// Render every registered collector in the Prometheus text format
pub fn render_metrics() -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Structured logger for planner events
///
/// Provides consistent JSON-formatted logging for forecasts, anomalies,
/// alerts and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log a served forecast
    #[allow(clippy::too_many_arguments)]
    pub fn log_plan(
        &self,
        context_id: &str,
        service_id: &str,
        metric: &str,
        model_id: &str,
        flavor: &str,
        daily_cost: f64,
        fallback_used: bool,
        elapsed_ms: u64,
    ) {
        info!(
            event = "plan_generated",
            instance = %self.instance,
            context_id = %context_id,
            service_id = %service_id,
            metric = %metric,
            model_id = %model_id,
            flavor = %flavor,
            daily_cost = daily_cost,
            fallback_used = fallback_used,
            elapsed_ms = elapsed_ms,
            "Generated capacity plan"
        );
    }

    /// Log a routed predictor failing over to the baseline
    pub fn log_fallback(&self, service_id: &str, metric: &str, model_id: &str, error: &str) {
        warn!(
            event = "predictor_fallback",
            instance = %self.instance,
            service_id = %service_id,
            metric = %metric,
            model_id = %model_id,
            error = %error,
            "Predictor failed, falling back to baseline"
        );
    }

    /// Log an anomalous forecast
    pub fn log_anomaly(&self, service_id: &str, metric: &str, score: f64, threshold: f64, avg_pred: f64) {
        warn!(
            event = "anomaly_detected",
            instance = %self.instance,
            service_id = %service_id,
            metric = %metric,
            score = score,
            threshold = threshold,
            avg_pred = avg_pred,
            "Forecast anomaly detected"
        );
    }

    pub fn log_alert_suppressed(&self, dedup_key: &str) {
        info!(
            event = "alert_suppressed",
            instance = %self.instance,
            dedup_key = %dedup_key,
            "Alert suppressed within dedup window"
        );
    }

    /// Log the outcome of an alert send
    pub fn log_alert_outcome(&self, dedup_key: &str, transport: &str, sent: bool, reason: Option<&str>) {
        if sent {
            info!(
                event = "alert_sent",
                instance = %self.instance,
                dedup_key = %dedup_key,
                transport = %transport,
                "Alert delivered"
            );
        } else {
            warn!(
                event = "alert_failed",
                instance = %self.instance,
                dedup_key = %dedup_key,
                transport = %transport,
                reason = reason.unwrap_or("unknown"),
                "Alert not delivered"
            );
        }
    }

    pub fn log_startup(&self, version: &str, model_dir: Option<&str>) {
        info!(
            event = "planner_started",
            instance = %self.instance,
            planner_version = %version,
            model_dir = model_dir.unwrap_or("none"),
            "Capacity planner started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "planner_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Capacity planner shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_collectors() {
        let a = PlannerMetrics::new();
        let b = a.clone();
        let before = a.predictor_fallbacks();
        b.inc_predictor_fallbacks();
        assert!(a.predictor_fallbacks() > before);
    }

    #[test]
    fn test_render_contains_registered_metrics() {
        let metrics = PlannerMetrics::new();
        metrics.inc_forecasts_generated("total_events");
        metrics.observe_prediction_latency("baseline", 0.002);

        let text = render_metrics().unwrap();
        assert!(text.contains("capacity_planner_forecasts_generated_total"));
        assert!(text.contains("capacity_planner_prediction_latency_seconds"));
    }

    #[test]
    fn test_structured_logger_does_not_panic() {
        let logger = StructuredLogger::new("test-instance");
        logger.log_plan("ctx", "svc", "total_events", "m", "small", 1.2, false, 3);
        logger.log_fallback("svc", "total_events", "m", "boom");
        logger.log_anomaly("svc", "total_events", 40.0, 5.0, 600.0);
        logger.log_alert_suppressed("k");
        logger.log_alert_outcome("k", "log", false, Some("no webhook configured"));
        logger.log_startup("0.1.0", None);
        logger.log_shutdown("test");
        assert_eq!(logger.instance(), "test-instance");
    }
}
