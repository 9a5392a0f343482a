//! Core data models for the planning pipeline

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// Number of hourly points in every forecast
pub const FORECAST_HORIZON: usize = 24;

/// Kind of workload being planned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Web,
    Api,
    Db,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Web => "web",
            ServiceKind::Api => "api",
            ServiceKind::Db => "db",
        }
    }
}

/// Runtime environment of the workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnv {
    Prod,
    Dev,
}

impl RuntimeEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeEnv::Prod => "prod",
            RuntimeEnv::Dev => "dev",
        }
    }
}

/// Load time-slot the request is planned for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSlot {
    Peak,
    Normal,
    Low,
    Weekend,
}

impl TimeSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSlot::Peak => "peak",
            TimeSlot::Normal => "normal",
            TimeSlot::Low => "low",
            TimeSlot::Weekend => "weekend",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for RuntimeEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized description of the workload driving a forecast
///
/// Built once per request by [`crate::context::extract_context`] and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub context_id: String,
    pub timestamp: DateTime<Utc>,
    pub service_kind: ServiceKind,
    pub runtime: RuntimeEnv,
    pub time_slot: TimeSlot,
    /// Multiplier applied to every forecast point, always >= 0
    pub weight: f64,
    pub region: Option<String>,
    pub expected_users: Option<u64>,
    pub curr_cpu: Option<f64>,
    pub curr_mem: Option<f64>,
}

/// Single forecast value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub time: DateTime<Utc>,
    pub value: f64,
}

/// Hourly projection of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    pub service_id: String,
    pub metric_name: String,
    pub model_id: String,
    pub generated_at: DateTime<Utc>,
    pub points: Vec<ForecastPoint>,
}

impl ForecastSeries {
    /// Build a series whose points start one hour after the top of the current hour
    pub fn from_values(
        service_id: &str,
        metric_name: &str,
        model_id: impl Into<String>,
        values: impl IntoIterator<Item = f64>,
    ) -> Self {
        let origin = current_hour();
        let points = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| ForecastPoint {
                time: origin + Duration::hours(i as i64 + 1),
                value,
            })
            .collect();

        Self {
            service_id: service_id.to_string(),
            metric_name: metric_name.to_string(),
            model_id: model_id.into(),
            generated_at: Utc::now(),
            points,
        }
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn max_value(&self) -> f64 {
        self.points
            .iter()
            .map(|p| p.value)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn mean_value(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|p| p.value).sum::<f64>() / self.points.len() as f64
    }
}

/// Top of the current UTC hour
pub fn current_hour() -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(Duration::hours(1)).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_series_points_are_hourly() {
        let series = ForecastSeries::from_values("svc", "total_events", "m", (0..24).map(f64::from));
        assert_eq!(series.len(), FORECAST_HORIZON);
        for pair in series.points.windows(2) {
            assert_eq!(pair[1].time - pair[0].time, Duration::hours(1));
        }
        assert_eq!(series.points[0].time.minute(), 0);
        assert_eq!(series.points[0].time.second(), 0);
        assert!(series.points[0].time > Utc::now() - Duration::hours(1));
    }

    #[test]
    fn test_series_aggregates() {
        let series = ForecastSeries::from_values("svc", "m", "v1", vec![1.0, 3.0, 2.0]);
        assert_eq!(series.max_value(), 3.0);
        assert!((series.mean_value() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_enum_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&TimeSlot::Weekend).unwrap(), "\"weekend\"");
        let kind: ServiceKind = serde_json::from_str("\"api\"").unwrap();
        assert_eq!(kind, ServiceKind::Api);
        assert!(serde_json::from_str::<RuntimeEnv>("\"staging\"").is_err());
    }
}
