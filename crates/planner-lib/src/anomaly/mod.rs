//! Anomaly detection and alerting for forecasts
//!
//! This module provides:
//! - Robust, multi-signal comparison of a forecast against history
//! - Dedup-gated alert preparation
//! - Alert transports (webhook and log-only)

mod alerter;
mod detector;
mod transport;

pub use alerter::{
    dedup_key, AlertPayload, Alerter, DedupGate, Embed, EmbedField, EmbedFooter, PreparedAlert,
    DEFAULT_BOT_NAME, DEFAULT_DEDUP_TTL,
};
pub use detector::{AnomalyDetector, AnomalyVerdict, HistorySummary, ScoreBreakdown};
pub use transport::{AlertOutcome, AlertTransport, LogTransport, WebhookTransport, WEBHOOK_TIMEOUT};
