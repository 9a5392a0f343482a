//! Request pipeline
//!
//! normalize -> route -> predict (baseline fallback) -> policy -> anomaly
//! -> sizing -> dedup-gated alert preparation.
//!
//! Every stage except the history fetch and alert delivery is a pure,
//! synchronous transform. The only shared mutable state is the predictor
//! registry and the dedup gate, both owned by the [`Pipeline`].

use crate::anomaly::{AlertOutcome, AlertTransport, Alerter, AnomalyDetector, AnomalyVerdict, PreparedAlert};
use crate::config::PipelineConfig;
use crate::context::extract_context;
use crate::datasource::{HistoricalDataSource, UnavailableDataSource};
use crate::error::{PipelineError, PredictionError};
use crate::models::{ForecastSeries, RequestContext};
use crate::observability::{PlannerMetrics, StructuredLogger};
use crate::policy;
use crate::predictor::{ModelArtifactStore, Predictor, PredictorRegistry};
use crate::routing::{select_route, EngineKind, Route};
use crate::sizing::{Sizer, SizingMode, SizingRecommendation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub const DEFAULT_METRIC: &str = "total_events";

fn default_metric() -> String {
    DEFAULT_METRIC.to_string()
}

/// Forecast request for one metric
#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    pub service_id: String,
    #[serde(default = "default_metric")]
    pub metric_name: String,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub sizing_mode: SizingMode,
}

/// Forecast request for several metrics sharing one context
#[derive(Debug, Clone, Deserialize)]
pub struct MultiPlanRequest {
    pub service_id: String,
    #[serde(default)]
    pub metric_names: Vec<String>,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub sizing_mode: SizingMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    pub service_id: String,
    pub metric_name: String,
    pub route: Route,
    pub forecast: ForecastSeries,
    pub anomaly: AnomalyVerdict,
    pub sizing: SizingRecommendation,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Response plus an alert that still has to be delivered
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub response: PlanResponse,
    pub alert: Option<PreparedAlert>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiPlanResponse {
    pub service_id: String,
    pub context_id: String,
    pub results: BTreeMap<String, PlanResponse>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MultiPlanOutcome {
    pub response: MultiPlanResponse,
    pub alerts: Vec<PreparedAlert>,
}

/// Run `primary`; on any error retry exactly once with `fallback`
///
/// Returns the series and whether the fallback served it.
pub fn with_fallback<P, F>(primary: P, fallback: F) -> Result<(ForecastSeries, bool), (PredictionError, PredictionError)>
where
    P: FnOnce() -> Result<ForecastSeries, PredictionError>,
    F: FnOnce(&PredictionError) -> Result<ForecastSeries, PredictionError>,
{
    match primary() {
        Ok(series) => Ok((series, false)),
        Err(first) => match fallback(&first) {
            Ok(series) => Ok((series, true)),
            Err(second) => Err((first, second)),
        },
    }
}

/// Forecast pipeline with its owned collaborators
pub struct Pipeline {
    config: PipelineConfig,
    data_source: Arc<dyn HistoricalDataSource>,
    registry: PredictorRegistry,
    detector: AnomalyDetector,
    sizer: Sizer,
    alerter: Alerter,
    metrics: PlannerMetrics,
    logger: StructuredLogger,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &PredictorRegistry {
        &self.registry
    }

    pub fn alerter(&self) -> &Alerter {
        &self.alerter
    }

    pub fn metrics(&self) -> &PlannerMetrics {
        &self.metrics
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn data_source(&self) -> &Arc<dyn HistoricalDataSource> {
        &self.data_source
    }

    /// Load the sequence model ahead of the first request
    pub fn warm_up(&self) -> Result<(), PredictionError> {
        if self.registry.has_artifact_store() {
            self.registry.sequence()?;
        }
        Ok(())
    }

    fn normalize(&self, raw: &Value) -> Result<RequestContext, PipelineError> {
        extract_context(raw).map_err(|e| {
            self.metrics.inc_context_rejections();
            PipelineError::Context(e)
        })
    }

    fn predict(
        &self,
        service_id: &str,
        metric_name: &str,
        ctx: &RequestContext,
        route: &Route,
    ) -> Result<(ForecastSeries, Option<String>), PredictionError> {
        let start = Instant::now();
        let mut fallback_reason = None;
        let result = with_fallback(
            || {
                self.registry
                    .get(route.engine)?
                    .run(service_id, metric_name, ctx, &route.model_id)
            },
            |err| {
                let reason = err.to_string();
                self.metrics.inc_predictor_fallbacks();
                self.logger
                    .log_fallback(service_id, metric_name, &route.model_id, &reason);
                fallback_reason = Some(reason);
                self.registry
                    .baseline()
                    .run(service_id, metric_name, ctx, &route.model_id)
            },
        );

        let engine = match &result {
            Ok((_, false)) if route.engine == EngineKind::Sequence => "sequence",
            _ => "baseline",
        };
        self.metrics
            .observe_prediction_latency(engine, start.elapsed().as_secs_f64());

        result
            .map(|(series, _)| (series, fallback_reason))
            .map_err(|(_, fallback_err)| fallback_err)
    }

    fn plan_metric(
        &self,
        service_id: &str,
        metric_name: &str,
        ctx: &RequestContext,
        route: &Route,
        mode: SizingMode,
    ) -> Result<PlanOutcome, PipelineError> {
        let start = Instant::now();
        let (raw, fallback_reason) = self.predict(service_id, metric_name, ctx, route)?;
        let fallback_used = fallback_reason.is_some();
        let forecast = policy::postprocess(&raw, ctx);
        let anomaly = self.detector.evaluate(&forecast, ctx, self.data_source.as_ref());
        let sizing = self.sizer.recommend(&forecast, ctx, mode)?;

        let mut notes = Vec::new();
        if let Some(reason) = &fallback_reason {
            notes.push(format!("{} not used ({}), served by baseline", route.model_id, reason));
        }
        if let Some(reason) = &anomaly.reason {
            notes.push(format!("anomaly check skipped: {}", reason));
        }
        if sizing.safety_override {
            notes.push("forecast exceeds safety limits, large flavor forced".to_string());
        }

        let alert = if anomaly.is_anomaly {
            self.metrics.inc_anomalies_detected(metric_name);
            self.logger
                .log_anomaly(service_id, metric_name, anomaly.score, anomaly.threshold, anomaly.avg_pred);
            let prepared = self.alerter.prepare(&forecast, ctx, &anomaly, sizing.flavor);
            if prepared.is_none() {
                self.metrics.inc_alerts_suppressed();
                self.logger
                    .log_alert_suppressed(&crate::anomaly::dedup_key(&forecast, ctx));
            }
            prepared
        } else {
            None
        };

        self.metrics.inc_forecasts_generated(metric_name);
        self.logger.log_plan(
            &ctx.context_id,
            service_id,
            metric_name,
            &forecast.model_id,
            sizing.flavor.as_str(),
            sizing.expected_daily_cost,
            fallback_used,
            start.elapsed().as_millis() as u64,
        );

        Ok(PlanOutcome {
            response: PlanResponse {
                service_id: service_id.to_string(),
                metric_name: metric_name.to_string(),
                route: route.clone(),
                forecast,
                anomaly,
                sizing,
                fallback_used,
                notes,
                generated_at: Utc::now(),
            },
            alert,
        })
    }

    /// Full pipeline for one metric
    pub fn plan(&self, req: &PlanRequest) -> Result<PlanOutcome, PipelineError> {
        let ctx = self.normalize(&req.context)?;
        let route = select_route(&ctx);
        debug!(
            context_id = %ctx.context_id,
            model_id = %route.model_id,
            engine = ?route.engine,
            "Route selected"
        );
        self.plan_metric(&req.service_id, &req.metric_name, &ctx, &route, req.sizing_mode)
    }

    /// Full pipeline for several metrics of one service
    ///
    /// The context is normalized and routed once; an empty metric list
    /// plans the default metric.
    pub fn plan_many(&self, req: &MultiPlanRequest) -> Result<MultiPlanOutcome, PipelineError> {
        let ctx = self.normalize(&req.context)?;
        let route = select_route(&ctx);

        let metrics: Vec<&str> = if req.metric_names.is_empty() {
            vec![DEFAULT_METRIC]
        } else {
            req.metric_names.iter().map(String::as_str).collect()
        };

        let mut results = BTreeMap::new();
        let mut alerts = Vec::new();
        for metric in metrics {
            let outcome = self.plan_metric(&req.service_id, metric, &ctx, &route, req.sizing_mode)?;
            alerts.extend(outcome.alert);
            results.insert(metric.to_string(), outcome.response);
        }

        Ok(MultiPlanOutcome {
            response: MultiPlanResponse {
                service_id: req.service_id.clone(),
                context_id: ctx.context_id,
                results,
                generated_at: Utc::now(),
            },
            alerts,
        })
    }

    /// Deliver a prepared alert
    ///
    /// The dedup key reserved by `plan` is refreshed on delivery, kept when
    /// the transport skipped delivery, and released when the send failed so
    /// a later plan can alert again. Never fails; transport problems are
    /// logged and counted.
    pub async fn dispatch_alert(&self, transport: &dyn AlertTransport, alert: PreparedAlert) -> AlertOutcome {
        let outcome = transport.send(&alert.payload).await;
        if outcome.sent {
            self.alerter.mark_sent(&alert.dedup_key);
            self.metrics.inc_alerts_sent();
        } else if !outcome.skipped {
            self.alerter.release(&alert.dedup_key);
            self.metrics.inc_alerts_failed();
        }
        self.logger.log_alert_outcome(
            &alert.dedup_key,
            transport.name(),
            outcome.sent,
            outcome.reason.as_deref(),
        );
        outcome
    }
}

/// Builder for [`Pipeline`]
#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    data_source: Option<Arc<dyn HistoricalDataSource>>,
    artifact_store: Option<Arc<dyn ModelArtifactStore>>,
    bot_name: Option<String>,
    avatar_url: Option<String>,
    instance: Option<String>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn data_source(mut self, source: Arc<dyn HistoricalDataSource>) -> Self {
        self.data_source = Some(source);
        self
    }

    pub fn artifact_store(mut self, store: Arc<dyn ModelArtifactStore>) -> Self {
        self.artifact_store = Some(store);
        self
    }

    pub fn alert_identity(mut self, bot_name: impl Into<String>, avatar_url: Option<String>) -> Self {
        self.bot_name = Some(bot_name.into());
        self.avatar_url = avatar_url;
        self
    }

    pub fn instance(mut self, name: impl Into<String>) -> Self {
        self.instance = Some(name.into());
        self
    }

    pub fn build(self) -> Pipeline {
        let data_source = self
            .data_source
            .unwrap_or_else(|| Arc::new(UnavailableDataSource::new("no history source configured")));

        let mut alerter = Alerter::new(self.config.dedup.ttl());
        if let Some(bot_name) = self.bot_name {
            alerter = alerter.with_identity(bot_name, self.avatar_url);
        }

        Pipeline {
            registry: PredictorRegistry::new(
                data_source.clone(),
                self.config.baseline.clone(),
                self.artifact_store,
            ),
            detector: AnomalyDetector::new(self.config.anomaly.clone()),
            sizer: Sizer::new(self.config.sizing.clone()),
            alerter,
            metrics: PlannerMetrics::new(),
            logger: StructuredLogger::new(self.instance.unwrap_or_else(|| "capacity-planner".to_string())),
            data_source,
            config: self.config,
        }
    }
}
