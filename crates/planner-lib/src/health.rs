//! Planner health
//!
//! Three components feed `/healthz`: the predictor, the history backend and
//! the alert channel. None of them can stop a plan from being served (the
//! baseline covers a missing sequence model, missing history only disables
//! anomaly scoring, undelivered alerts are logged) so a component is either
//! healthy or degraded, never down.

use crate::predictor::PredictorRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Planner component tracked for health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Forecast engines
    Predictor,
    /// Historical data source
    History,
    /// Alert transport
    Alerts,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Predictor, Component::History, Component::Alerts];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Serving with reduced capability
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the component entered this state
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct HealthState {
    components: BTreeMap<Component, ComponentHealth>,
    ready: bool,
}

/// Shared component health and readiness
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// All components start healthy and the planner not ready
    pub fn new() -> Self {
        let now = Utc::now();
        let components = Component::ALL
            .into_iter()
            .map(|c| {
                (
                    c,
                    ComponentHealth {
                        status: ComponentStatus::Healthy,
                        message: None,
                        since: now,
                    },
                )
            })
            .collect();

        Self {
            state: Arc::new(RwLock::new(HealthState {
                components,
                ready: false,
            })),
        }
    }

    /// Record a component state; `since` only moves when the state changes
    async fn set(&self, component: Component, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        let entry = state.components.entry(component).or_insert_with(|| ComponentHealth {
            status,
            message: None,
            since: Utc::now(),
        });
        if entry.status != status || entry.message != message {
            entry.status = status;
            entry.message = message;
            entry.since = Utc::now();
        }
    }

    pub async fn set_healthy(&self, component: Component) {
        self.set(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    /// Derive the predictor component from the registry's model state
    pub async fn observe_predictor(&self, registry: &PredictorRegistry) {
        if let Some(version) = registry.sequence_version() {
            self.set(
                Component::Predictor,
                ComponentStatus::Healthy,
                Some(format!("sequence model {}", version)),
            )
            .await;
            return;
        }

        let message = if !registry.has_artifact_store() {
            "no model directory configured, serving baseline".to_string()
        } else if let Some(error) = registry.last_load_error() {
            format!("sequence model unavailable: {}, serving baseline", error)
        } else {
            "sequence model not loaded yet, serving baseline".to_string()
        };
        self.set_degraded(Component::Predictor, message).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = if state
            .components
            .values()
            .any(|c| c.status == ComponentStatus::Degraded)
        {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        };

        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    /// Ready once start-up finished; degraded components still serve
    pub async fn readiness(&self) -> ReadinessResponse {
        if self.state.read().await.ready {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some("Planner not yet initialized".to_string()),
            }
        }
    }
}
