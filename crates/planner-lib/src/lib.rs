//! Capacity planning library
//!
//! This crate provides the core functionality for:
//! - Context normalization and model routing
//! - 24h forecasting (statistical baseline and sequence model)
//! - Forecast post-processing, anomaly detection and alerting
//! - Flavor sizing and cost estimation
//! - Health checks and observability

pub mod anomaly;
pub mod config;
pub mod context;
pub mod datasource;
pub mod error;
pub mod health;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod predictor;
pub mod routing;
pub mod sizing;
pub mod stats;

pub use config::PipelineConfig;
pub use error::{ContextValidationError, DataSourceError, PipelineError, PredictionError, SizingError};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PlannerMetrics, StructuredLogger};
pub use pipeline::{MultiPlanRequest, Pipeline, PipelineBuilder, PlanOutcome, PlanRequest, PlanResponse};
