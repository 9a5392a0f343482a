//! Service configuration
//!
//! Sources, later ones winning: built-in defaults, an optional
//! `planner.toml` (or the file named by `PLANNER_CONFIG`), then `PLANNER_*`
//! environment variables with `__` separating nested keys, e.g.
//! `PLANNER_PIPELINE__ANOMALY__THRESHOLD=2.0`.

use anyhow::{Context, Result};
use planner_lib::PipelineConfig;
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = "planner.toml";

/// Planner service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Instance name used in logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// HTTP port for plans, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory holding the sequence model artifacts
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    /// JSON history document
    #[serde(default)]
    pub history_path: Option<PathBuf>,

    /// Left-pad short history series to the requested length
    #[serde(default)]
    pub pad_history: bool,

    /// Chat webhook receiving anomaly alerts
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    #[serde(default)]
    pub bot_avatar: Option<String>,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "capacity-planner".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_bot_name() -> String {
    planner_lib::anomaly::DEFAULT_BOT_NAME.to_string()
}

impl ServiceConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let file = std::env::var("PLANNER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(
                config::Environment::with_prefix("PLANNER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid planner configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_source() {
        let config: ServiceConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.api_port, 8080);
        assert!(config.model_dir.is_none());
        assert!(config.webhook_url.is_none());
        assert_eq!(config.pipeline.anomaly.threshold, 5.0);
        assert_eq!(config.pipeline.dedup.ttl_secs, 600);
    }

    #[test]
    fn test_nested_overrides() {
        let config: ServiceConfig = config::Config::builder()
            .set_override("api_port", 9000)
            .unwrap()
            .set_override("pipeline.anomaly.threshold", 2.0)
            .unwrap()
            .set_override("pipeline.sizing.per_env_instance_types", true)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.api_port, 9000);
        assert_eq!(config.pipeline.anomaly.threshold, 2.0);
        assert!(config.pipeline.sizing.per_env_instance_types);
        assert_eq!(config.pipeline.sizing.small_max_users, 500);
    }
}
