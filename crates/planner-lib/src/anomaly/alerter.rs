//! Anomaly alert preparation
//!
//! Handles:
//! - Deduplication of alerts per (service, metric, model, time slot) key
//! - Formatting embed-style webhook payloads
//!
//! Sending is delegated to an [`super::AlertTransport`]. A key is reserved
//! when its alert is prepared, so concurrent requests cannot both alert
//! while the first send is still in flight.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::AnomalyVerdict;
use crate::models::{ForecastSeries, RequestContext};
use crate::sizing::Flavor;

/// Default deduplication window (10 minutes)
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(600);

/// Default bot name shown on webhook messages
pub const DEFAULT_BOT_NAME: &str = "capacity-planner";

/// Process-wide key -> last-sent map
///
/// Expired entries are dropped lazily while checking, there is no
/// background sweep.
#[derive(Debug)]
pub struct DedupGate {
    ttl: Duration,
    sent: Mutex<HashMap<String, Instant>>,
}

impl DedupGate {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True when `key` was never sent or its last send is older than the TTL
    pub fn should_send(&self, key: &str, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.ttl);
        let mut sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match sent.get(key) {
            Some(last) if last.elapsed() <= ttl => false,
            Some(_) => {
                sent.remove(key);
                true
            }
            None => true,
        }
    }

    /// Record that an alert for `key` went out now
    pub fn mark_sent(&self, key: &str) {
        let mut sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.insert(key.to_string(), Instant::now());
    }

    /// Check and mark under one lock; true if the caller now owns the key
    pub fn try_reserve(&self, key: &str, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.ttl);
        let mut sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match sent.get(key) {
            Some(last) if last.elapsed() <= ttl => false,
            _ => {
                sent.insert(key.to_string(), Instant::now());
                true
            }
        }
    }

    /// Drop a reservation so the next check for `key` passes
    pub fn release(&self, key: &str) {
        let mut sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.remove(key);
    }

    /// Number of tracked keys, expired or not
    pub fn len(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

/// Embed-style webhook message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub embeds: Vec<Embed>,
}

impl AlertPayload {
    pub fn title(&self) -> Option<&str> {
        self.embeds.first().map(|e| e.title.as_str())
    }

    /// Field value by name on the first embed
    pub fn field(&self, name: &str) -> Option<&str> {
        self.embeds
            .first()
            .and_then(|e| e.fields.iter().find(|f| f.name == name))
            .map(|f| f.value.as_str())
    }
}

/// Alert that passed the dedup gate and is ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedAlert {
    pub dedup_key: String,
    pub payload: AlertPayload,
}

/// Dedup key for a forecast: `service|metric|model|slot`
pub fn dedup_key(series: &ForecastSeries, ctx: &RequestContext) -> String {
    [
        series.service_id.as_str(),
        series.metric_name.as_str(),
        series.model_id.as_str(),
        ctx.time_slot.as_str(),
    ]
    .join("|")
}

fn field(name: &str, value: impl ToString) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value: value.to_string(),
        inline: false,
    }
}

/// Turns anomalous verdicts into dedup-gated alert payloads
pub struct Alerter {
    gate: DedupGate,
    bot_name: String,
    avatar_url: Option<String>,
}

impl Alerter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            gate: DedupGate::new(ttl),
            bot_name: DEFAULT_BOT_NAME.to_string(),
            avatar_url: None,
        }
    }

    pub fn with_identity(mut self, bot_name: impl Into<String>, avatar_url: Option<String>) -> Self {
        self.bot_name = bot_name.into();
        self.avatar_url = avatar_url;
        self
    }

    pub fn gate(&self) -> &DedupGate {
        &self.gate
    }

    /// Build an alert for an anomalous verdict unless one was sent recently
    ///
    /// The dedup key is reserved on success; release it if delivery fails.
    pub fn prepare(
        &self,
        series: &ForecastSeries,
        ctx: &RequestContext,
        verdict: &AnomalyVerdict,
        flavor: Flavor,
    ) -> Option<PreparedAlert> {
        if !verdict.is_anomaly {
            return None;
        }

        let key = dedup_key(series, ctx);
        if !self.gate.try_reserve(&key, None) {
            debug!(dedup_key = %key, "Alert suppressed by dedup gate");
            return None;
        }

        Some(PreparedAlert {
            payload: self.payload(series, ctx, verdict, flavor, &key),
            dedup_key: key,
        })
    }

    /// Record a successful send
    pub fn mark_sent(&self, key: &str) {
        self.gate.mark_sent(key);
    }

    /// Reopen a key whose alert could not be delivered
    pub fn release(&self, key: &str) {
        self.gate.release(key);
    }

    fn payload(
        &self,
        series: &ForecastSeries,
        ctx: &RequestContext,
        verdict: &AnomalyVerdict,
        flavor: Flavor,
        key: &str,
    ) -> AlertPayload {
        let mut fields = vec![
            field("service", &series.service_id),
            field("metric", &series.metric_name),
            field("model", &series.model_id),
            field("score", format!("{:.2}", verdict.score)),
            field("threshold", format!("{:.2}", verdict.threshold)),
            field("avg_pred", format!("{:.4}", verdict.avg_pred)),
            field("max_pred", format!("{:.4}", verdict.max_pred)),
            field("runtime", ctx.runtime),
            field("time_slot", ctx.time_slot),
            field("service_kind", ctx.service_kind),
        ];
        if let Some(users) = ctx.expected_users {
            fields.push(field("expected_users", users));
        }
        if let Some(h) = &verdict.history {
            fields.push(field(
                "history",
                format!(
                    "mean {:.4} / median {:.4} / std {:.4} ({} points, {} outliers removed)",
                    h.mean, h.median, h.std, h.data_points_used, h.outliers_removed
                ),
            ));
        }
        if let Some(b) = &verdict.breakdown {
            fields.push(field(
                "score_breakdown",
                format!(
                    "avg {:.2} / max {:.2} / change {:.2}",
                    b.avg_based, b.max_based, b.change_rate
                ),
            ));
        }
        fields.push(field(
            "action",
            format!(
                "Recommended flavor: {}. Consider a temporary scale-up if the surge persists.",
                flavor
            ),
        ));

        AlertPayload {
            username: Some(self.bot_name.clone()),
            avatar_url: self.avatar_url.clone(),
            embeds: vec![Embed {
                title: format!("Forecast anomaly: {} / {}", series.service_id, series.metric_name),
                description: format!(
                    "Projected average {:.2} against historical mean {:.2}",
                    verdict.avg_pred,
                    verdict.history.map(|h| h.mean).unwrap_or_default()
                ),
                fields,
                footer: Some(EmbedFooter {
                    text: key.to_string(),
                }),
            }],
        }
    }
}

impl Default for Alerter {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::extract_context;
    use std::thread::sleep;

    fn ctx() -> RequestContext {
        extract_context(&serde_json::json!({
            "context_id": "c",
            "time_slot": "peak",
            "expected_users": 2000
        }))
        .unwrap()
    }

    fn series() -> ForecastSeries {
        ForecastSeries::from_values("svc", "total_events", "web_peak_lstm_v1", vec![600.0; 24])
    }

    fn verdict(is_anomaly: bool) -> AnomalyVerdict {
        AnomalyVerdict {
            is_anomaly,
            score: 40.0,
            breakdown: None,
            history: None,
            max_pred: 600.0,
            avg_pred: 600.0,
            threshold: 5.0,
            reason: None,
        }
    }

    #[test]
    fn test_deduplication() {
        let gate = DedupGate::new(Duration::from_millis(100));

        assert!(gate.should_send("k", None));
        gate.mark_sent("k");

        // Suppressed within the window
        assert!(!gate.should_send("k", None));
        assert!(!gate.should_send("k", None));

        // Wait for the window to expire
        sleep(Duration::from_millis(150));
        assert!(gate.should_send("k", None));
        // expired entry dropped on check
        assert!(gate.is_empty());
    }

    #[test]
    fn test_explicit_ttl_overrides_default() {
        let gate = DedupGate::default();
        gate.mark_sent("k");
        assert!(!gate.should_send("k", None));

        sleep(Duration::from_millis(5));
        assert!(gate.should_send("k", Some(Duration::from_millis(1))));
    }

    #[test]
    fn test_reserve_is_exclusive_until_released() {
        let gate = DedupGate::default();

        assert!(gate.try_reserve("k", None));
        assert!(!gate.try_reserve("k", None));
        assert!(!gate.should_send("k", None));

        gate.release("k");
        assert!(gate.should_send("k", None));
        assert!(gate.try_reserve("k", None));
    }

    #[test]
    fn test_reserve_after_expiry() {
        let gate = DedupGate::new(Duration::from_millis(20));
        assert!(gate.try_reserve("k", None));
        sleep(Duration::from_millis(40));
        assert!(gate.try_reserve("k", None));
        assert_eq!(gate.len(), 1);
    }

    #[test]
    fn test_concurrent_reservations_admit_one() {
        let gate = std::sync::Arc::new(DedupGate::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.try_reserve("k", None))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_different_keys_not_deduplicated() {
        let gate = DedupGate::default();
        gate.mark_sent("a");
        assert!(gate.should_send("b", None));
    }

    #[test]
    fn test_prepare_builds_payload() {
        let alerter = Alerter::default().with_identity("bot", Some("https://img/avatar.png".into()));
        let alert = alerter
            .prepare(&series(), &ctx(), &verdict(true), Flavor::Large)
            .unwrap();

        assert_eq!(alert.dedup_key, "svc|total_events|web_peak_lstm_v1|peak");
        assert_eq!(alert.payload.username.as_deref(), Some("bot"));
        assert_eq!(alert.payload.field("metric"), Some("total_events"));
        assert_eq!(alert.payload.field("expected_users"), Some("2000"));
        assert!(alert.payload.field("action").unwrap().contains("large"));
        assert_eq!(
            alert.payload.embeds[0].footer.as_ref().map(|f| f.text.as_str()),
            Some(alert.dedup_key.as_str())
        );
    }

    #[test]
    fn test_prepare_reserves_key() {
        let alerter = Alerter::default();
        assert!(alerter.prepare(&series(), &ctx(), &verdict(false), Flavor::Small).is_none());

        let alert = alerter
            .prepare(&series(), &ctx(), &verdict(true), Flavor::Large)
            .unwrap();
        // reserved before any send happened
        assert!(alerter.prepare(&series(), &ctx(), &verdict(true), Flavor::Large).is_none());

        alerter.release(&alert.dedup_key);
        let again = alerter.prepare(&series(), &ctx(), &verdict(true), Flavor::Large);
        assert_eq!(again.map(|a| a.dedup_key), Some(alert.dedup_key));
    }

    #[test]
    fn test_payload_wire_format() {
        let alert = Alerter::default()
            .prepare(&series(), &ctx(), &verdict(true), Flavor::Medium)
            .unwrap();
        let json = serde_json::to_value(&alert.payload).unwrap();

        assert_eq!(json["username"], DEFAULT_BOT_NAME);
        assert!(json.get("avatar_url").is_none());
        assert_eq!(json["embeds"][0]["fields"][0]["name"], "service");
        assert_eq!(json["embeds"][0]["fields"][0]["inline"], false);
    }
}
