//! Forecast engines
//!
//! Two engines produce a raw 24h series: a statistical baseline that always
//! succeeds and a sequence model loaded from trained artifacts. Both are
//! built lazily on first use and shared between requests.

mod artifacts;
mod baseline;
mod sequence;

pub use artifacts::{
    compute_checksum, ArtifactMetadata, FsArtifactStore, ModelArtifactStore, ModelArtifacts,
    OnnxSequenceModel, RobustScaler, SequenceModel, METADATA_FILE,
};
pub use baseline::{seed_for, seed_slope_factor, trend_factor, BaselinePredictor, Seed};
pub use sequence::{
    context_scale, service_multiplier, time_multiplier, user_scale, SequencePredictor,
    MAX_CONTEXT_SCALE, MIN_CONTEXT_SCALE, REFERENCE_USERS,
};

use crate::config::BaselineConfig;
use crate::datasource::HistoricalDataSource;
use crate::error::PredictionError;
use crate::models::{ForecastSeries, RequestContext};
use crate::routing::EngineKind;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tracing::{info, warn};

/// A forecast engine
pub trait Predictor: Send + Sync {
    /// Produce a raw 24-point forecast for one metric of one service
    fn run(
        &self,
        service_id: &str,
        metric_name: &str,
        ctx: &RequestContext,
        model_id: &str,
    ) -> Result<ForecastSeries, PredictionError>;

    fn kind(&self) -> EngineKind;
}

/// Lazily constructed, shared predictor instances
///
/// The baseline is built once. The sequence predictor is built on first
/// request; a failed load is not cached so a later request retries it.
pub struct PredictorRegistry {
    data_source: Arc<dyn HistoricalDataSource>,
    baseline_config: BaselineConfig,
    artifact_store: Option<Arc<dyn ModelArtifactStore>>,
    baseline: OnceLock<Arc<BaselinePredictor>>,
    sequence: RwLock<Option<Arc<SequencePredictor>>>,
    last_load_error: Mutex<Option<String>>,
}

impl PredictorRegistry {
    pub fn new(
        data_source: Arc<dyn HistoricalDataSource>,
        baseline_config: BaselineConfig,
        artifact_store: Option<Arc<dyn ModelArtifactStore>>,
    ) -> Self {
        Self {
            data_source,
            baseline_config,
            artifact_store,
            baseline: OnceLock::new(),
            sequence: RwLock::new(None),
            last_load_error: Mutex::new(None),
        }
    }

    pub fn baseline(&self) -> Arc<BaselinePredictor> {
        self.baseline
            .get_or_init(|| {
                Arc::new(BaselinePredictor::new(
                    self.data_source.clone(),
                    self.baseline_config.clone(),
                ))
            })
            .clone()
    }

    pub fn sequence(&self) -> Result<Arc<SequencePredictor>, PredictionError> {
        if let Some(p) = self.sequence.read().ok().and_then(|g| g.clone()) {
            return Ok(p);
        }

        let mut slot = self
            .sequence
            .write()
            .map_err(|_| PredictionError::ArtifactInvalid("predictor registry lock poisoned".into()))?;
        // another request may have finished loading while we waited
        if let Some(p) = slot.as_ref() {
            return Ok(p.clone());
        }

        let store = self
            .artifact_store
            .as_ref()
            .ok_or_else(|| PredictionError::ArtifactMissing("no model directory configured".into()))?;

        let loaded = store
            .load()
            .and_then(|artifacts| SequencePredictor::new(artifacts, self.data_source.clone()));
        let predictor = match loaded {
            Ok(p) => Arc::new(p),
            Err(e) => {
                warn!(error = %e, "Sequence model load failed");
                self.set_load_error(Some(e.to_string()));
                return Err(e);
            }
        };
        info!(version = predictor.model_version(), "Sequence predictor ready");
        self.set_load_error(None);

        *slot = Some(predictor.clone());
        Ok(predictor)
    }

    fn set_load_error(&self, error: Option<String>) {
        if let Ok(mut last) = self.last_load_error.lock() {
            *last = error;
        }
    }

    /// Resolve the engine for a route
    pub fn get(&self, kind: EngineKind) -> Result<Arc<dyn Predictor>, PredictionError> {
        match kind {
            EngineKind::Baseline => Ok(self.baseline()),
            EngineKind::Sequence => Ok(self.sequence()?),
        }
    }

    pub fn sequence_loaded(&self) -> bool {
        self.sequence.read().map(|g| g.is_some()).unwrap_or(false)
    }

    pub fn has_artifact_store(&self) -> bool {
        self.artifact_store.is_some()
    }

    /// Version of the loaded sequence model
    pub fn sequence_version(&self) -> Option<String> {
        self.sequence
            .read()
            .ok()
            .and_then(|g| g.as_ref().map(|p| p.model_version().to_string()))
    }

    /// Why the most recent sequence load failed, cleared by a successful load
    pub fn last_load_error(&self) -> Option<String> {
        self.last_load_error.lock().ok().and_then(|e| e.clone())
    }
}
