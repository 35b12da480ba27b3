//! Agent configuration

use anyhow::{Context, Result};
use perf_lib::PerformanceConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Host name attached to structured log lines
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// API server port for health/metrics/report endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Engine configuration file; absent means engine defaults
    #[serde(default)]
    pub config_path: Option<PathBuf>,

    /// Health registry refresh interval in seconds
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_health_interval() -> u64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host_name: default_host_name(),
            api_port: default_api_port(),
            config_path: None,
            health_interval_secs: default_health_interval(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from `PERF_AGENT_*` environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PERF_AGENT").try_parsing(true))
            .build()
            .context("Failed to read agent environment")?;
        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> Result<Self> {
        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    /// Load the engine configuration from `config_path`, or defaults
    pub fn engine_config(&self) -> Result<PerformanceConfig> {
        match &self.config_path {
            Some(path) => PerformanceConfig::load(path)
                .with_context(|| format!("Failed to load engine config from {}", path.display())),
            None => Ok(PerformanceConfig::default()),
        }
    }
}
