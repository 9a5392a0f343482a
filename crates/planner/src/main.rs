//! Capacity Planner - 24h resource forecast and sizing service
//!
//! Serves forecast plans over HTTP: each request is routed to a predictor,
//! post-processed, checked for anomalies against history and sized into a
//! flavor with a cost estimate.

use anyhow::{Context, Result};
use planner_lib::{
    anomaly::{AlertTransport, LogTransport, WebhookTransport},
    datasource::{HistoricalDataSource, JsonFileDataSource, UnavailableDataSource},
    health::{Component, HealthRegistry},
    predictor::FsArtifactStore,
    Pipeline,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const PLANNER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting capacity-planner");

    let config = config::ServiceConfig::load()?;
    info!(
        instance = %config.instance_name,
        port = config.api_port,
        model_dir = ?config.model_dir,
        history_path = ?config.history_path,
        "Planner configured"
    );

    let health_registry = HealthRegistry::new();

    // History backend
    let data_source: Arc<dyn HistoricalDataSource> = match &config.history_path {
        Some(path) => match JsonFileDataSource::open(path) {
            Ok(source) => Arc::new(source.with_padding(config.pad_history)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "History unavailable");
                health_registry
                    .set_degraded(Component::History, format!("history file unreadable: {}", e))
                    .await;
                Arc::new(UnavailableDataSource::new(e.to_string()))
            }
        },
        None => {
            health_registry
                .set_degraded(Component::History, "no history source configured")
                .await;
            Arc::new(UnavailableDataSource::new("no history source configured"))
        }
    };

    // Alert channel
    let transport: Arc<dyn AlertTransport> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookTransport::new(url.clone()).context("Failed to build webhook transport")?),
        None => {
            health_registry
                .set_degraded(Component::Alerts, "no webhook configured")
                .await;
            Arc::new(LogTransport)
        }
    };

    let mut builder = Pipeline::builder()
        .config(config.pipeline.clone())
        .data_source(data_source)
        .alert_identity(config.bot_name.clone(), config.bot_avatar.clone())
        .instance(config.instance_name.clone());
    if let Some(dir) = &config.model_dir {
        builder = builder.artifact_store(Arc::new(FsArtifactStore::new(dir)));
    }
    let pipeline = Arc::new(builder.build());

    // Load the sequence model up front; the baseline covers a failure
    if let Err(e) = pipeline.warm_up() {
        warn!(error = %e, "Sequence model unavailable, serving baseline");
    }
    health_registry.observe_predictor(pipeline.registry()).await;

    let logger = pipeline.logger().clone();
    logger.log_startup(
        PLANNER_VERSION,
        config.model_dir.as_ref().and_then(|d| d.to_str()),
    );

    let app_state = Arc::new(api::AppState::new(pipeline, transport, health_registry.clone()));

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = api_handle => {
            result.context("API server task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            logger.log_shutdown("SIGINT received");
        }
    }
    info!("Shutting down");

    Ok(())
}
