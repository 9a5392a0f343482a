//! Route selection
//!
//! Decides which model serves a request. The decision is a pure function
//! of the context: a static rule table keyed by (runtime, time-slot,
//! service kind), with a dynamic promotion to the sequence model for large
//! production workloads.

use crate::models::{RequestContext, RuntimeEnv, ServiceKind, TimeSlot};
use serde::Serialize;

/// Forecast path tag; the only horizon currently served
pub const FORECAST_PATH: &str = "forecast_24h";

/// Model used when no rule matches
pub const DEFAULT_MODEL_ID: &str = "baseline_fallback_v1";

/// Users at or above which production peak/normal traffic goes to the sequence model
pub const SEQUENCE_MODEL_MIN_USERS: u64 = 1000;

/// Which predictor implementation serves a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Baseline,
    Sequence,
}

/// Selected model and processing path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub model_id: String,
    pub path: &'static str,
    pub engine: EngineKind,
}

type RuleKey = (RuntimeEnv, TimeSlot, ServiceKind);

const RULES: &[(RuleKey, &str, EngineKind)] = &[
    ((RuntimeEnv::Prod, TimeSlot::Peak, ServiceKind::Web), "web_peak_lstm_v1", EngineKind::Sequence),
    ((RuntimeEnv::Prod, TimeSlot::Normal, ServiceKind::Web), "web_normal_lstm_v1", EngineKind::Sequence),
    ((RuntimeEnv::Prod, TimeSlot::Low, ServiceKind::Web), "web_low_lstm_v1", EngineKind::Sequence),
    ((RuntimeEnv::Prod, TimeSlot::Weekend, ServiceKind::Web), "web_weekend_lstm_v1", EngineKind::Sequence),
    ((RuntimeEnv::Dev, TimeSlot::Peak, ServiceKind::Web), "web_dev_baseline_v1", EngineKind::Baseline),
    ((RuntimeEnv::Dev, TimeSlot::Normal, ServiceKind::Web), "web_dev_baseline_v1", EngineKind::Baseline),
    ((RuntimeEnv::Dev, TimeSlot::Low, ServiceKind::Web), "web_dev_baseline_v1", EngineKind::Baseline),
    ((RuntimeEnv::Dev, TimeSlot::Weekend, ServiceKind::Web), "web_dev_baseline_v1", EngineKind::Baseline),
];

fn promotes_to_sequence(ctx: &RequestContext) -> bool {
    ctx.runtime == RuntimeEnv::Prod
        && matches!(ctx.time_slot, TimeSlot::Peak | TimeSlot::Normal)
        && ctx.expected_users.unwrap_or(0) >= SEQUENCE_MODEL_MIN_USERS
}

/// Map a context to a model identifier and forecast path
pub fn select_route(ctx: &RequestContext) -> Route {
    if promotes_to_sequence(ctx) {
        return Route {
            model_id: format!("{}_{}_lstm_v1", ctx.service_kind, ctx.time_slot),
            path: FORECAST_PATH,
            engine: EngineKind::Sequence,
        };
    }

    let key = (ctx.runtime, ctx.time_slot, ctx.service_kind);
    let (model_id, engine) = RULES
        .iter()
        .find(|(rule, _, _)| *rule == key)
        .map(|(_, model, engine)| (*model, *engine))
        .unwrap_or((DEFAULT_MODEL_ID, EngineKind::Baseline));

    Route {
        model_id: model_id.to_string(),
        path: FORECAST_PATH,
        engine,
    }
}
