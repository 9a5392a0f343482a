//! Sequence model predictor
//!
//! Rolls a one-step-ahead model forward 24 times. Each prediction is fed
//! back into the window as the next row's target feature, then the whole
//! series is rescaled for the request's expected load.

use super::artifacts::ModelArtifacts;
use super::Predictor;
use crate::datasource::HistoricalDataSource;
use crate::error::PredictionError;
use crate::metrics::{metric_meta, MetricMeta};
use crate::models::{ForecastSeries, RequestContext, ServiceKind, TimeSlot, FORECAST_HORIZON};
use crate::routing::EngineKind;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Bounds of the combined context scale factor
pub const MIN_CONTEXT_SCALE: f64 = 0.1;
pub const MAX_CONTEXT_SCALE: f64 = 10.0;

/// Users the model's training data corresponds to
pub const REFERENCE_USERS: f64 = 1000.0;

pub fn time_multiplier(slot: TimeSlot) -> f64 {
    match slot {
        TimeSlot::Peak => 1.5,
        TimeSlot::Normal | TimeSlot::Weekend => 1.0,
        TimeSlot::Low => 0.6,
    }
}

pub fn service_multiplier(kind: ServiceKind) -> f64 {
    match kind {
        ServiceKind::Web => 1.0,
        ServiceKind::Api => 1.2,
        ServiceKind::Db => 0.8,
    }
}

/// Load scale from expected users
///
/// Count metrics scale linearly. Ratio metrics saturate, so their scale is
/// log-dampened and equals 1.0 at the reference load.
pub fn user_scale(expected_users: Option<u64>, meta: &MetricMeta) -> f64 {
    let Some(users) = expected_users else {
        return 1.0;
    };
    let relative = users as f64 / REFERENCE_USERS;
    if meta.is_ratio() {
        (1.0 + relative.ln_1p()) / (1.0 + 1f64.ln_1p())
    } else {
        relative
    }
}

/// `user_scale * time_multiplier * service_multiplier`, clipped to [0.1, 10]
pub fn context_scale(ctx: &RequestContext, meta: &MetricMeta) -> f64 {
    let scale = user_scale(ctx.expected_users, meta)
        * time_multiplier(ctx.time_slot)
        * service_multiplier(ctx.service_kind);
    scale.clamp(MIN_CONTEXT_SCALE, MAX_CONTEXT_SCALE)
}

/// Predictor backed by a trained sequence model
pub struct SequencePredictor {
    artifacts: ModelArtifacts,
    data_source: Arc<dyn HistoricalDataSource>,
}

impl SequencePredictor {
    pub fn new(
        artifacts: ModelArtifacts,
        data_source: Arc<dyn HistoricalDataSource>,
    ) -> Result<Self, PredictionError> {
        artifacts.validate()?;
        Ok(Self {
            artifacts,
            data_source,
        })
    }

    pub fn model_version(&self) -> &str {
        &self.artifacts.version
    }

    fn target_column(&self, metric_name: &str) -> Result<usize, PredictionError> {
        self.artifacts
            .feature_names
            .iter()
            .position(|f| f == metric_name)
            .ok_or_else(|| PredictionError::UnsupportedMetric(metric_name.to_string()))
    }

    /// Most recent `sequence_length` raw feature rows, oldest first
    fn feature_rows(&self, service_id: &str) -> Result<Vec<Vec<f64>>, PredictionError> {
        let len = self.artifacts.sequence_length;
        let mut columns = Vec::with_capacity(self.artifacts.feature_names.len());

        for feature in &self.artifacts.feature_names {
            let series = self.data_source.fetch(service_id, feature, len)?;
            if series.len() < len {
                return Err(PredictionError::InsufficientHistory {
                    metric: feature.clone(),
                    available: series.len(),
                    required: len,
                });
            }
            columns.push(series[series.len() - len..].to_vec());
        }

        Ok((0..len)
            .map(|t| columns.iter().map(|column| column[t]).collect())
            .collect())
    }

    fn scaled_window(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f32>>, PredictionError> {
        rows.iter()
            .map(|row| {
                self.artifacts
                    .feature_scaler
                    .transform(row)
                    .map(|scaled| scaled.into_iter().map(|v| v as f32).collect())
            })
            .collect()
    }

    fn unscale_target(&self, scaled: f32) -> Result<f64, PredictionError> {
        if !scaled.is_finite() {
            return Err(PredictionError::Inference(format!("model produced {}", scaled)));
        }
        let mut value = self.artifacts.target_scaler.inverse(0, scaled as f64)?;
        if self.artifacts.log_transform {
            value = value.exp_m1();
        }
        Ok(value.max(0.0))
    }

    /// Autoregressive rollout over the forecast horizon
    pub fn rollout(&self, service_id: &str, metric_name: &str) -> Result<Vec<f64>, PredictionError> {
        let target = self.target_column(metric_name)?;
        let rows = self.feature_rows(service_id)?;
        let mut window = self.scaled_window(&rows)?;
        let mut values = Vec::with_capacity(FORECAST_HORIZON);

        for _ in 0..FORECAST_HORIZON {
            let scaled = self.artifacts.model.predict_next(&window)?;
            values.push(self.unscale_target(scaled)?);

            let mut next = window
                .last()
                .cloned()
                .ok_or_else(|| PredictionError::Inference("empty input window".into()))?;
            next[target] = scaled;
            window.remove(0);
            window.push(next);
        }
        Ok(values)
    }
}

impl Predictor for SequencePredictor {
    fn run(
        &self,
        service_id: &str,
        metric_name: &str,
        ctx: &RequestContext,
        model_id: &str,
    ) -> Result<ForecastSeries, PredictionError> {
        let start = Instant::now();
        let meta = metric_meta(metric_name);
        let raw = self.rollout(service_id, metric_name)?;
        let scale = context_scale(ctx, meta);

        debug!(
            service_id,
            metric_name,
            scale,
            model_version = %self.artifacts.version,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Sequence rollout completed"
        );

        Ok(ForecastSeries::from_values(
            service_id,
            metric_name,
            model_id,
            raw.into_iter().map(|v| meta.finish(v * scale)),
        ))
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Sequence
    }
}
