//! Flavor sizing and cost estimation
//!
//! Aggregate mode picks one flavor for the whole day from the expected
//! load and time slot, with a safety override for very high forecasts.
//! Hourly mode picks a flavor per forecast point from fixed breakpoints.

use crate::config::{FlavorCosts, SizingConfig};
use crate::error::SizingError;
use crate::metrics::metric_meta;
use crate::models::{ForecastSeries, RequestContext, RuntimeEnv, TimeSlot, FORECAST_HORIZON};
use crate::stats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Discrete instance size class, ordered small < medium < large
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Small,
    Medium,
    Large,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::Small => "small",
            Flavor::Medium => "medium",
            Flavor::Large => "large",
        }
    }

    /// One size up, saturating at large
    pub fn up(self) -> Self {
        match self {
            Flavor::Small => Flavor::Medium,
            Flavor::Medium | Flavor::Large => Flavor::Large,
        }
    }

    /// One size down, saturating at small
    pub fn down(self) -> Self {
        match self {
            Flavor::Large => Flavor::Medium,
            Flavor::Medium | Flavor::Small => Flavor::Small,
        }
    }

    pub fn cost(self, table: &FlavorCosts) -> f64 {
        match self {
            Flavor::Small => table.small,
            Flavor::Medium => table.medium,
            Flavor::Large => table.large,
        }
    }

    /// Cloud instance type for this flavor
    ///
    /// With per-environment mapping, dev runs one instance size smaller.
    pub fn instance_type(self, runtime: RuntimeEnv, per_env: bool) -> &'static str {
        match (per_env, runtime, self) {
            (true, RuntimeEnv::Dev, Flavor::Small) => "m1.tiny",
            (true, RuntimeEnv::Dev, Flavor::Medium) => "m1.small",
            (true, RuntimeEnv::Dev, Flavor::Large) => "m1.medium",
            (_, _, Flavor::Small) => "m1.small",
            (_, _, Flavor::Medium) => "m1.medium",
            (_, _, Flavor::Large) => "m1.large",
        }
    }
}

impl std::fmt::Display for Flavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which recommendation to compute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    #[default]
    Aggregate,
    Hourly,
}

/// Distribution summary of the forecast values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoints {
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub mean: f64,
    pub stdev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyFlavor {
    pub hour_index: usize,
    pub timestamp: DateTime<Utc>,
    pub predicted_value: f64,
    pub flavor: Flavor,
    pub hourly_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingRecommendation {
    pub mode: SizingMode,
    pub flavor: Flavor,
    pub instance_type: String,
    /// Daily price in aggregate mode, 24h total in hourly mode
    pub expected_daily_cost: f64,
    pub safety_override: bool,
    /// Forecast peak as a share of the metric's planning capacity, 0..1
    pub peak_utilization: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<Breakpoints>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hourly: Vec<HourlyFlavor>,
}

fn peak_utilization(series: &ForecastSeries) -> f64 {
    metric_meta(&series.metric_name).normalize_for_planning(series.max_value())
}

fn check_length(series: &ForecastSeries) -> Result<(), SizingError> {
    if series.len() != FORECAST_HORIZON {
        return Err(SizingError::WrongLength {
            expected: FORECAST_HORIZON,
            actual: series.len(),
        });
    }
    Ok(())
}

/// Flavor and cost recommender
#[derive(Debug, Clone, Default)]
pub struct Sizer {
    config: SizingConfig,
}

impl Sizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn recommend(
        &self,
        series: &ForecastSeries,
        ctx: &RequestContext,
        mode: SizingMode,
    ) -> Result<SizingRecommendation, SizingError> {
        match mode {
            SizingMode::Aggregate => self.recommend_aggregate(series, ctx),
            SizingMode::Hourly => self.recommend_hourly(series, ctx),
        }
    }

    /// Flavor from expected users alone
    pub fn user_bucket(&self, users: u64) -> Flavor {
        if users <= self.config.small_max_users {
            Flavor::Small
        } else if users <= self.config.medium_max_users {
            Flavor::Medium
        } else {
            Flavor::Large
        }
    }

    /// One flavor for the whole day
    pub fn recommend_aggregate(
        &self,
        series: &ForecastSeries,
        ctx: &RequestContext,
    ) -> Result<SizingRecommendation, SizingError> {
        check_length(series)?;
        let cfg = &self.config;

        let users = ctx.expected_users.unwrap_or(cfg.default_users);
        let base = self.user_bucket(users);
        let shifted = match ctx.time_slot {
            TimeSlot::Peak => base.up(),
            TimeSlot::Low => base.down(),
            TimeSlot::Normal | TimeSlot::Weekend => base,
        };

        let max = series.max_value();
        let mean = series.mean_value();
        let safety_override = max > cfg.force_large_max || mean > cfg.force_large_mean;
        let flavor = if safety_override { Flavor::Large } else { shifted };

        debug!(
            users,
            base = %base,
            shifted = %shifted,
            flavor = %flavor,
            safety_override,
            "Aggregate sizing"
        );

        Ok(SizingRecommendation {
            mode: SizingMode::Aggregate,
            flavor,
            instance_type: flavor
                .instance_type(ctx.runtime, cfg.per_env_instance_types)
                .to_string(),
            expected_daily_cost: flavor.cost(&cfg.daily_cost),
            safety_override,
            peak_utilization: peak_utilization(series),
            breakpoints: None,
            hourly: Vec::new(),
        })
    }

    /// Flavor for a single hourly value
    pub fn hourly_flavor(&self, value: f64) -> Flavor {
        if value <= self.config.hourly_small_max {
            Flavor::Small
        } else if value <= self.config.hourly_medium_max {
            Flavor::Medium
        } else {
            Flavor::Large
        }
    }

    /// One flavor per forecast hour
    ///
    /// The overall flavor is the largest hourly one.
    pub fn recommend_hourly(
        &self,
        series: &ForecastSeries,
        ctx: &RequestContext,
    ) -> Result<SizingRecommendation, SizingError> {
        check_length(series)?;
        let values = series.values();
        let breakpoints = breakpoints(&values);

        let hourly: Vec<HourlyFlavor> = series
            .points
            .iter()
            .enumerate()
            .map(|(hour_index, point)| {
                let flavor = self.hourly_flavor(point.value);
                HourlyFlavor {
                    hour_index,
                    timestamp: point.time,
                    predicted_value: point.value,
                    flavor,
                    hourly_cost: flavor.cost(&self.config.hourly_cost),
                }
            })
            .collect();

        let total: f64 = hourly.iter().map(|h| h.hourly_cost).sum();
        let flavor = hourly
            .iter()
            .map(|h| h.flavor)
            .max()
            .unwrap_or(Flavor::Small);

        Ok(SizingRecommendation {
            mode: SizingMode::Hourly,
            flavor,
            instance_type: flavor
                .instance_type(ctx.runtime, self.config.per_env_instance_types)
                .to_string(),
            expected_daily_cost: total,
            safety_override: false,
            peak_utilization: peak_utilization(series),
            breakpoints: Some(breakpoints),
            hourly,
        })
    }
}

pub fn breakpoints(values: &[f64]) -> Breakpoints {
    Breakpoints {
        p25: stats::percentile(values, 25.0),
        p50: stats::percentile(values, 50.0),
        p75: stats::percentile(values, 75.0),
        mean: stats::mean(values),
        stdev: stats::std_dev(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::extract_context;
    use serde_json::json;

    fn ctx(users: u64, slot: &str) -> RequestContext {
        extract_context(&json!({
            "context_id": "s",
            "expected_users": users,
            "time_slot": slot
        }))
        .unwrap()
    }

    fn flat(value: f64) -> ForecastSeries {
        ForecastSeries::from_values("svc", "total_events", "m", vec![value; FORECAST_HORIZON])
    }

    #[test]
    fn test_user_buckets_monotonic() {
        let sizer = Sizer::default();
        let series = flat(10.0);
        let mut last = Flavor::Small;
        for users in [0, 100, 500, 501, 2000, 5000, 5001, 50_000] {
            let rec = sizer.recommend_aggregate(&series, &ctx(users, "normal")).unwrap();
            assert!(rec.flavor >= last, "{} users went down to {}", users, rec.flavor);
            last = rec.flavor;
        }
        assert_eq!(sizer.user_bucket(500), Flavor::Small);
        assert_eq!(sizer.user_bucket(501), Flavor::Medium);
        assert_eq!(sizer.user_bucket(5001), Flavor::Large);
    }

    #[test]
    fn test_time_slot_shift() {
        let sizer = Sizer::default();
        let series = flat(10.0);

        assert_eq!(sizer.recommend_aggregate(&series, &ctx(100, "peak")).unwrap().flavor, Flavor::Medium);
        assert_eq!(sizer.recommend_aggregate(&series, &ctx(10_000, "peak")).unwrap().flavor, Flavor::Large);
        assert_eq!(sizer.recommend_aggregate(&series, &ctx(1000, "low")).unwrap().flavor, Flavor::Small);
        assert_eq!(sizer.recommend_aggregate(&series, &ctx(100, "low")).unwrap().flavor, Flavor::Small);
        assert_eq!(sizer.recommend_aggregate(&series, &ctx(1000, "weekend")).unwrap().flavor, Flavor::Medium);
    }

    #[test]
    fn test_safety_override() {
        let sizer = Sizer::default();

        let rec = sizer.recommend_aggregate(&flat(600.0), &ctx(100, "low")).unwrap();
        assert_eq!(rec.flavor, Flavor::Large);
        assert!(rec.safety_override);
        assert_eq!(rec.expected_daily_cost, 5.5);

        let mut spiky = flat(10.0);
        spiky.points[5].value = 1001.0;
        assert!(sizer.recommend_aggregate(&spiky, &ctx(100, "normal")).unwrap().safety_override);

        let rec = sizer.recommend_aggregate(&flat(500.0), &ctx(100, "normal")).unwrap();
        assert!(!rec.safety_override);
        assert_eq!(rec.flavor, Flavor::Small);
        assert_eq!(rec.expected_daily_cost, 1.2);
    }

    #[test]
    fn test_peak_utilization_uses_planning_scale() {
        let sizer = Sizer::default();
        let rec = sizer.recommend_aggregate(&flat(250.0), &ctx(100, "normal")).unwrap();
        assert!((rec.peak_utilization - 0.25).abs() < 1e-9);

        let rec = sizer.recommend_aggregate(&flat(4000.0), &ctx(100, "normal")).unwrap();
        assert_eq!(rec.peak_utilization, 1.0);

        let cpu = ForecastSeries::from_values("svc", "avg_cpu", "m", vec![0.4; FORECAST_HORIZON]);
        let rec = sizer.recommend_hourly(&cpu, &ctx(100, "normal")).unwrap();
        assert!((rec.peak_utilization - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_missing_users_defaults_to_small() {
        let sizer = Sizer::default();
        let c = extract_context(&json!({ "context_id": "s" })).unwrap();
        assert_eq!(sizer.recommend_aggregate(&flat(1.0), &c).unwrap().flavor, Flavor::Small);
    }

    #[test]
    fn test_hourly_mode() {
        let sizer = Sizer::default();
        let values: Vec<f64> = (0..FORECAST_HORIZON).map(|i| i as f64 * 50.0).collect();
        let series = ForecastSeries::from_values("svc", "total_events", "m", values);

        let rec = sizer.recommend_hourly(&series, &ctx(100, "normal")).unwrap();
        assert_eq!(rec.hourly.len(), FORECAST_HORIZON);
        // 0..=300 small (7 hours), 350..=900 medium (12), above large (5)
        let count = |f: Flavor| rec.hourly.iter().filter(|h| h.flavor == f).count();
        assert_eq!(count(Flavor::Small), 7);
        assert_eq!(count(Flavor::Medium), 12);
        assert_eq!(count(Flavor::Large), 5);

        let expected = 7.0 * 0.05 + 12.0 * 0.117 + 5.0 * 0.229;
        assert!((rec.expected_daily_cost - expected).abs() < 1e-9);
        assert_eq!(rec.flavor, Flavor::Large);
        assert_eq!(rec.instance_type, "m1.large");

        let bp = rec.breakpoints.unwrap();
        assert!((bp.p50 - 575.0).abs() < 1e-9);
        assert!((bp.mean - 575.0).abs() < 1e-9);
        assert!(bp.p25 < bp.p50 && bp.p50 < bp.p75);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let sizer = Sizer::default();
        let short = ForecastSeries::from_values("svc", "total_events", "m", vec![1.0; 23]);
        let c = ctx(100, "normal");

        for mode in [SizingMode::Aggregate, SizingMode::Hourly] {
            let err = sizer.recommend(&short, &c, mode).unwrap_err();
            assert!(matches!(err, SizingError::WrongLength { expected: 24, actual: 23 }));
        }
    }

    #[test]
    fn test_instance_type_mapping() {
        assert_eq!(Flavor::Small.instance_type(RuntimeEnv::Dev, false), "m1.small");
        assert_eq!(Flavor::Small.instance_type(RuntimeEnv::Dev, true), "m1.tiny");
        assert_eq!(Flavor::Large.instance_type(RuntimeEnv::Dev, true), "m1.medium");
        assert_eq!(Flavor::Large.instance_type(RuntimeEnv::Prod, true), "m1.large");
    }
}
