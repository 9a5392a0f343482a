//! Error taxonomy for the planning pipeline
//!
//! Context errors always reject the request. Prediction errors trigger a
//! single retry on the baseline predictor. Data source errors never abort
//! the pipeline; the anomaly detector turns them into an explained,
//! non-anomalous verdict.

use thiserror::Error;

/// Malformed or missing request context
#[derive(Debug, Error)]
pub enum ContextValidationError {
    #[error("context must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("invalid context data: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("field `{field}` must be non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },
}

/// Historical data fetch failures
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("no series for metric `{metric}` of `{identifier}`")]
    NotFound { identifier: String, metric: String },

    #[error("data source unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read history file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse history file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl DataSourceError {
    pub fn not_found(identifier: &str, metric: &str) -> Self {
        Self::NotFound {
            identifier: identifier.to_string(),
            metric: metric.to_string(),
        }
    }

    /// True when the series simply does not exist, as opposed to the backend failing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Model unavailable or inference failure
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("model artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("model artifact invalid: {0}")]
    ArtifactInvalid(String),

    #[error("insufficient history for `{metric}`: {available} rows, need {required}")]
    InsufficientHistory {
        metric: String,
        available: usize,
        required: usize,
    },

    #[error("metric `{0}` is not a feature of the loaded model")]
    UnsupportedMetric(String),

    #[error("scaling failed: {0}")]
    Scaling(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("history fetch failed: {0}")]
    History(#[from] DataSourceError),
}

/// Sizing input validation failure
#[derive(Debug, Error)]
pub enum SizingError {
    #[error("expected {expected} hourly predictions, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// Errors surfaced by a full pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Context(#[from] ContextValidationError),

    #[error("prediction failed after baseline fallback: {0}")]
    Prediction(#[from] PredictionError),

    #[error(transparent)]
    Sizing(#[from] SizingError),
}
