//! Sequence model artifacts
//!
//! A trained sequence model is shipped as a directory holding the ONNX
//! graph and a `metadata.json` describing its features, window length,
//! target transform and the robust scalers fitted at training time.

use crate::error::PredictionError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

/// Metadata file expected next to the model graph
pub const METADATA_FILE: &str = "metadata.json";

/// Maximum single-step inference latency before warning
const MAX_STEP_MS: u128 = 5;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Per-column `(x - center) / scale` transform fitted at training time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustScaler {
    pub center: Vec<f64>,
    pub scale: Vec<f64>,
}

impl RobustScaler {
    pub fn width(&self) -> usize {
        self.center.len()
    }

    fn column_scale(&self, column: usize) -> f64 {
        // zero-width columns are left unscaled
        match self.scale[column] {
            s if s == 0.0 || !s.is_finite() => 1.0,
            s => s,
        }
    }

    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>, PredictionError> {
        if row.len() != self.width() {
            return Err(PredictionError::Scaling(format!(
                "row has {} columns, scaler expects {}",
                row.len(),
                self.width()
            )));
        }
        Ok(row
            .iter()
            .enumerate()
            .map(|(i, v)| (v - self.center[i]) / self.column_scale(i))
            .collect())
    }

    pub fn inverse(&self, column: usize, value: f64) -> Result<f64, PredictionError> {
        if column >= self.width() {
            return Err(PredictionError::Scaling(format!(
                "column {} out of range for scaler of width {}",
                column,
                self.width()
            )));
        }
        Ok(value * self.column_scale(column) + self.center[column])
    }

    fn validate(&self, name: &str, width: usize) -> Result<(), PredictionError> {
        if self.center.len() != self.scale.len() || self.width() != width {
            return Err(PredictionError::ArtifactInvalid(format!(
                "{} has {} centers and {} scales, expected {}",
                name,
                self.center.len(),
                self.scale.len(),
                width
            )));
        }
        Ok(())
    }
}

/// One-step-ahead sequence model
pub trait SequenceModel: Send + Sync {
    /// Predict the next scaled target value from a window of scaled feature rows
    fn predict_next(&self, window: &[Vec<f32>]) -> Result<f32, PredictionError>;
}

/// Everything the sequence predictor needs from training
#[derive(Clone)]
pub struct ModelArtifacts {
    pub version: String,
    pub model: Arc<dyn SequenceModel>,
    pub feature_scaler: RobustScaler,
    pub target_scaler: RobustScaler,
    pub feature_names: Vec<String>,
    pub sequence_length: usize,
    /// Target was trained in `ln(1 + y)` space
    pub log_transform: bool,
}

impl ModelArtifacts {
    /// Check that scalers, features and window agree with each other
    pub fn validate(&self) -> Result<(), PredictionError> {
        if self.sequence_length == 0 {
            return Err(PredictionError::ArtifactInvalid("sequence_length is zero".into()));
        }
        if self.feature_names.is_empty() {
            return Err(PredictionError::ArtifactInvalid("no feature names".into()));
        }
        self.feature_scaler.validate("feature_scaler", self.feature_names.len())?;
        self.target_scaler.validate("target_scaler", 1)
    }
}

impl std::fmt::Debug for ModelArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifacts")
            .field("version", &self.version)
            .field("feature_names", &self.feature_names)
            .field("sequence_length", &self.sequence_length)
            .field("log_transform", &self.log_transform)
            .finish_non_exhaustive()
    }
}

/// Supplier of trained model artifacts
pub trait ModelArtifactStore: Send + Sync {
    fn load(&self) -> Result<ModelArtifacts, PredictionError>;
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_model_file")]
    pub model_file: String,
    /// Hex SHA-256 of the model file, verified when present
    #[serde(default)]
    pub sha256: Option<String>,
    pub feature_names: Vec<String>,
    pub sequence_length: usize,
    #[serde(default)]
    pub log_transform: bool,
    pub feature_scaler: RobustScaler,
    pub target_scaler: RobustScaler,
}

fn default_version() -> String {
    "unversioned".to_string()
}

fn default_model_file() -> String {
    "model.onnx".to_string()
}

/// Artifacts stored in a local directory
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_required(&self, path: &Path) -> Result<Vec<u8>, PredictionError> {
        if !path.exists() {
            return Err(PredictionError::ArtifactMissing(path.display().to_string()));
        }
        std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .map_err(|e| PredictionError::ArtifactInvalid(format!("{:#}", e)))
    }

    pub fn read_metadata(&self) -> Result<ArtifactMetadata, PredictionError> {
        let bytes = self.read_required(&self.dir.join(METADATA_FILE))?;
        serde_json::from_slice(&bytes)
            .context("Failed to parse model metadata")
            .map_err(|e| PredictionError::ArtifactInvalid(format!("{:#}", e)))
    }
}

impl ModelArtifactStore for FsArtifactStore {
    fn load(&self) -> Result<ModelArtifacts, PredictionError> {
        let metadata = self.read_metadata()?;
        let model_bytes = self.read_required(&self.dir.join(&metadata.model_file))?;

        if let Some(expected) = &metadata.sha256 {
            let computed = compute_checksum(&model_bytes);
            if !computed.eq_ignore_ascii_case(expected) {
                return Err(PredictionError::ArtifactInvalid(format!(
                    "checksum mismatch: expected {}, got {}",
                    expected, computed
                )));
            }
            debug!(checksum = %computed, "Model checksum validated");
        }

        let model = OnnxSequenceModel::from_bytes(
            &model_bytes,
            metadata.sequence_length,
            metadata.feature_names.len(),
        )?;

        let artifacts = ModelArtifacts {
            version: metadata.version,
            model: Arc::new(model),
            feature_scaler: metadata.feature_scaler,
            target_scaler: metadata.target_scaler,
            feature_names: metadata.feature_names,
            sequence_length: metadata.sequence_length,
            log_transform: metadata.log_transform,
        };
        artifacts.validate()?;

        info!(
            dir = %self.dir.display(),
            version = %artifacts.version,
            features = artifacts.feature_names.len(),
            sequence_length = artifacts.sequence_length,
            "Loaded sequence model artifacts"
        );
        Ok(artifacts)
    }
}

/// Hex SHA-256 of a byte slice
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// ONNX graph with input `[1, sequence_length, n_features]` and a scalar output
pub struct OnnxSequenceModel {
    plan: TractModel,
    sequence_length: usize,
    n_features: usize,
}

impl OnnxSequenceModel {
    pub fn from_bytes(bytes: &[u8], sequence_length: usize, n_features: usize) -> Result<Self, PredictionError> {
        let plan = Self::load_plan(bytes, sequence_length, n_features)
            .map_err(|e| PredictionError::ArtifactInvalid(format!("{:#}", e)))?;
        Ok(Self {
            plan,
            sequence_length,
            n_features,
        })
    }

    fn load_plan(bytes: &[u8], sequence_length: usize, n_features: usize) -> anyhow::Result<TractModel> {
        let plan = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, sequence_length, n_features]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(plan)
    }
}

impl SequenceModel for OnnxSequenceModel {
    fn predict_next(&self, window: &[Vec<f32>]) -> Result<f32, PredictionError> {
        if window.len() != self.sequence_length || window.iter().any(|r| r.len() != self.n_features) {
            return Err(PredictionError::Inference(format!(
                "window must be {}x{}",
                self.sequence_length, self.n_features
            )));
        }

        let start = Instant::now();
        let data: Vec<f32> = window.iter().flatten().copied().collect();
        let input: Tensor =
            tract_ndarray::Array3::from_shape_vec((1, self.sequence_length, self.n_features), data)
                .map_err(|e| PredictionError::Inference(e.to_string()))?
                .into();

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| PredictionError::Inference(format!("{:#}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| PredictionError::Inference("no output from model".into()))?;
        let value = output
            .to_array_view::<f32>()
            .map_err(|e| PredictionError::Inference(format!("{:#}", e)))?
            .iter()
            .next()
            .copied()
            .ok_or_else(|| PredictionError::Inference("empty model output".into()))?;

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_STEP_MS {
            warn!(elapsed_ms = elapsed.as_millis(), "Inference step exceeded {}ms target", MAX_STEP_MS);
        }
        Ok(value)
    }
}
