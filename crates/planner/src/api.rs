//! HTTP API for capacity plans, health checks and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use planner_lib::{
    anomaly::{AlertTransport, PreparedAlert},
    health::HealthRegistry,
    observability::render_metrics,
    pipeline::{MultiPlanRequest, MultiPlanResponse},
    routing::EngineKind,
    Pipeline, PipelineError, PlanRequest, PlanResponse,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub transport: Arc<dyn AlertTransport>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, transport: Arc<dyn AlertTransport>, health_registry: HealthRegistry) -> Self {
        Self {
            pipeline,
            transport,
            health_registry,
        }
    }

    /// Deliver alerts in the background so the response is not delayed
    fn spawn_alerts(&self, alerts: Vec<PreparedAlert>) {
        for alert in alerts {
            let pipeline = self.pipeline.clone();
            let transport = self.transport.clone();
            tokio::spawn(async move {
                pipeline.dispatch_alert(transport.as_ref(), alert).await;
            });
        }
    }

    /// Refresh predictor health after a request that needed the sequence model
    async fn note_route<'a>(&self, mut responses: impl Iterator<Item = &'a PlanResponse>) {
        if responses.any(|r| r.route.engine == EngineKind::Sequence) {
            self.health_registry
                .observe_predictor(self.pipeline.registry())
                .await;
        }
    }
}

/// Request failure mapped onto a status code
pub enum ApiError {
    Pipeline(PipelineError),
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Pipeline(err @ PipelineError::Context(_)) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
            ApiError::Pipeline(err @ PipelineError::Sizing(_)) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
            ApiError::Pipeline(err @ PipelineError::Prediction(_)) => {
                error!(error = %err, "Plan request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Internal(message) => {
                error!(error = %message, "Plan worker failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Forecast, anomaly check and sizing for one metric
async fn create_plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlanRequest>,
) -> Result<Json<PlanResponse>, ApiError> {
    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || pipeline.plan(&req))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    state.note_route(std::iter::once(&outcome.response)).await;
    state.spawn_alerts(outcome.alert.into_iter().collect());
    Ok(Json(outcome.response))
}

/// Same as [`create_plan`] for several metrics sharing one context
async fn create_multi_plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MultiPlanRequest>,
) -> Result<Json<MultiPlanResponse>, ApiError> {
    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || pipeline.plan_many(&req))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    state.note_route(outcome.response.results.values()).await;
    state.spawn_alerts(outcome.alerts);
    Ok(Json(outcome.response))
}

/// Component health; degraded components still serve, so this is always 200
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health_registry.health().await)
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    match render_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string(),
        ),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/plans", post(create_plan))
        .route("/plans/multi", post(create_multi_plan))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
