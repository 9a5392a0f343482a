//! Request context normalization
//!
//! Turns the loosely-typed context object sent by clients into a
//! [`RequestContext`]: legacy field names are mapped onto canonical ones,
//! missing fields get their defaults and numeric fields are checked for
//! non-negativity. Numbers may arrive as JSON strings (`"1500"`), and user
//! counts as whole floats (`1500.0`).

use crate::error::ContextValidationError;
use crate::models::{RequestContext, RuntimeEnv, ServiceKind, TimeSlot};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Legacy field name -> canonical field name
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("current_users", "expected_users"),
    ("cpu", "curr_cpu"),
    ("memory", "curr_mem"),
];

#[derive(Debug, Deserialize)]
struct RawContext {
    context_id: String,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(default = "default_service_kind", alias = "service_type")]
    service_kind: ServiceKind,
    #[serde(default = "default_runtime", alias = "runtime_env")]
    runtime: RuntimeEnv,
    #[serde(default = "default_time_slot")]
    time_slot: TimeSlot,
    #[serde(default = "default_weight", deserialize_with = "loose_f64")]
    weight: f64,
    #[serde(default)]
    region: Option<String>,
    #[serde(default, deserialize_with = "loose_count")]
    expected_users: Option<i64>,
    #[serde(default, deserialize_with = "loose_opt_f64")]
    curr_cpu: Option<f64>,
    #[serde(default, deserialize_with = "loose_opt_f64")]
    curr_mem: Option<f64>,
}

fn default_service_kind() -> ServiceKind {
    ServiceKind::Web
}

fn default_runtime() -> RuntimeEnv {
    RuntimeEnv::Prod
}

fn default_time_slot() -> TimeSlot {
    TimeSlot::Normal
}

fn default_weight() -> f64 {
    1.0
}

/// A number, or a string holding one
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Number(f64),
    Text(String),
}

impl LooseNumber {
    fn into_f64<E: de::Error>(self) -> Result<f64, E> {
        match self {
            LooseNumber::Number(v) => Ok(v),
            LooseNumber::Text(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| E::custom(format!("expected a number, got {:?}", text))),
        }
    }
}

fn loose_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    LooseNumber::deserialize(deserializer)?.into_f64()
}

fn loose_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Option::<LooseNumber>::deserialize(deserializer)?
        .map(LooseNumber::into_f64)
        .transpose()
}

/// Whole numbers only; `1500.0` and `"1500"` pass, `1500.5` does not
fn loose_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match loose_opt_f64(deserializer)? {
        None => Ok(None),
        Some(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(Some(v as i64)),
        Some(v) => Err(de::Error::custom(format!("expected a whole number of users, got {}", v))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn non_negative(field: &'static str, value: Option<f64>) -> Result<(), ContextValidationError> {
    match value {
        Some(v) if v.is_nan() || v < 0.0 => Err(ContextValidationError::Negative { field, value: v }),
        _ => Ok(()),
    }
}

/// Normalize a raw context object into a [`RequestContext`]
///
/// A missing or `null` input is treated as an empty object, so only
/// `context_id` is strictly required.
pub fn extract_context(raw: &Value) -> Result<RequestContext, ContextValidationError> {
    let mut fields: Map<String, Value> = match raw {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => return Err(ContextValidationError::NotAnObject(json_type_name(other))),
    };

    for (legacy, canonical) in FIELD_ALIASES {
        if !fields.contains_key(*canonical) {
            if let Some(value) = fields.remove(*legacy) {
                fields.insert(canonical.to_string(), value);
            }
        }
    }

    let parsed: RawContext =
        serde_json::from_value(Value::Object(fields)).map_err(ContextValidationError::Malformed)?;

    non_negative("weight", Some(parsed.weight))?;
    non_negative("expected_users", parsed.expected_users.map(|u| u as f64))?;
    non_negative("curr_cpu", parsed.curr_cpu)?;
    non_negative("curr_mem", parsed.curr_mem)?;

    Ok(RequestContext {
        context_id: parsed.context_id,
        timestamp: parsed.timestamp,
        service_kind: parsed.service_kind,
        runtime: parsed.runtime,
        time_slot: parsed.time_slot,
        weight: parsed.weight,
        region: parsed.region,
        expected_users: parsed.expected_users.map(|u| u as u64),
        curr_cpu: parsed.curr_cpu,
        curr_mem: parsed.curr_mem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_filled() {
        let before = Utc::now();
        let ctx = extract_context(&json!({ "context_id": "req-1" })).unwrap();

        assert_eq!(ctx.context_id, "req-1");
        assert_eq!(ctx.service_kind, ServiceKind::Web);
        assert_eq!(ctx.runtime, RuntimeEnv::Prod);
        assert_eq!(ctx.time_slot, TimeSlot::Normal);
        assert_eq!(ctx.weight, 1.0);
        assert!(ctx.timestamp >= before);
        assert!(ctx.region.is_none());
        assert!(ctx.expected_users.is_none());
    }

    #[test]
    fn test_legacy_aliases_mapped() {
        let ctx = extract_context(&json!({
            "context_id": "req-2",
            "current_users": 1200,
            "cpu": 0.4,
            "memory": 0.7,
            "service_type": "api",
            "runtime_env": "dev"
        }))
        .unwrap();

        assert_eq!(ctx.expected_users, Some(1200));
        assert_eq!(ctx.curr_cpu, Some(0.4));
        assert_eq!(ctx.curr_mem, Some(0.7));
        assert_eq!(ctx.service_kind, ServiceKind::Api);
        assert_eq!(ctx.runtime, RuntimeEnv::Dev);
    }

    #[test]
    fn test_canonical_name_wins_over_alias() {
        let ctx = extract_context(&json!({
            "context_id": "req-3",
            "expected_users": 10,
            "current_users": 99999
        }))
        .unwrap();
        assert_eq!(ctx.expected_users, Some(10));
    }

    #[test]
    fn test_explicit_timestamp_parsed() {
        let ctx = extract_context(&json!({
            "context_id": "req-4",
            "timestamp": "2024-03-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(ctx.timestamp.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_unknown_enum_rejected() {
        let err = extract_context(&json!({ "context_id": "x", "time_slot": "midnight" })).unwrap_err();
        assert!(matches!(err, ContextValidationError::Malformed(_)));
    }

    #[test]
    fn test_negative_values_rejected() {
        let err = extract_context(&json!({ "context_id": "x", "weight": -0.5 })).unwrap_err();
        assert!(matches!(err, ContextValidationError::Negative { field: "weight", .. }));

        let err = extract_context(&json!({ "context_id": "x", "current_users": -1 })).unwrap_err();
        assert!(matches!(err, ContextValidationError::Negative { field: "expected_users", .. }));

        let err = extract_context(&json!({ "context_id": "x", "cpu": -0.1 })).unwrap_err();
        assert!(matches!(err, ContextValidationError::Negative { field: "curr_cpu", .. }));
    }

    #[test]
    fn test_missing_id_and_wrong_shape() {
        assert!(matches!(
            extract_context(&json!({})).unwrap_err(),
            ContextValidationError::Malformed(_)
        ));
        assert!(matches!(
            extract_context(&json!([1, 2])).unwrap_err(),
            ContextValidationError::NotAnObject("array")
        ));
    }

    #[test]
    fn test_numeric_strings_and_whole_floats_accepted() {
        let ctx = extract_context(&json!({
            "context_id": "lax",
            "expected_users": 1500.0,
            "weight": "1.5",
            "cpu": "0.25"
        }))
        .unwrap();
        assert_eq!(ctx.expected_users, Some(1500));
        assert_eq!(ctx.weight, 1.5);
        assert_eq!(ctx.curr_cpu, Some(0.25));

        let ctx = extract_context(&json!({ "context_id": "lax", "current_users": " 1500 " })).unwrap();
        assert_eq!(ctx.expected_users, Some(1500));

        let ctx = extract_context(&json!({ "context_id": "lax", "expected_users": null })).unwrap();
        assert!(ctx.expected_users.is_none());
    }

    #[test]
    fn test_fractional_users_rejected() {
        let err = extract_context(&json!({ "context_id": "x", "expected_users": 1500.5 })).unwrap_err();
        assert!(matches!(err, ContextValidationError::Malformed(_)));
        assert!(err.to_string().contains("whole number"));

        let err = extract_context(&json!({ "context_id": "x", "expected_users": "12.5" })).unwrap_err();
        assert!(matches!(err, ContextValidationError::Malformed(_)));
    }

    #[test]
    fn test_negative_numeric_string_rejected() {
        let err = extract_context(&json!({ "context_id": "x", "weight": "-2" })).unwrap_err();
        assert!(matches!(err, ContextValidationError::Negative { field: "weight", .. }));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err = extract_context(&json!({ "context_id": "x", "weight": "heavy" })).unwrap_err();
        assert!(err.to_string().starts_with("invalid context data"));
    }
}
