//! Engine configuration
//!
//! Persisted as one JSON document with five categories:
//! - `monitoring`: collection timer and the monitors to build
//! - `optimization`: auto-optimization timer, strategy and optimizers
//! - `thresholds`: limits checked against every snapshot
//! - `storage`: retention and persistence of the metrics history
//! - `reporting`: periodic report generation
//!
//! Missing keys take their defaults, so a partial file is valid.

use crate::collector::{write_atomic, StorageStrategy};
use crate::error::{PerfError, Result};
use crate::models::OptimizationStrategy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// Collection period (default: 1000 ms)
    pub interval_ms: u64,
    /// Monitors built by the module (default: cpu, memory, network)
    pub monitors: Vec<String>,
    /// `host:port` targets for latency measurement; empty disables it
    pub latency_targets: Vec<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            monitors: vec!["cpu".into(), "memory".into(), "network".into()],
            latency_targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub auto_optimization: bool,
    /// Auto-optimization check period (default: 30000 ms)
    pub interval_ms: u64,
    /// Optimizers built by the module (default: memory, render, startup)
    pub optimizers: Vec<String>,
    pub strategy: OptimizationStrategy,
    /// Process memory budget for the memory optimizer (default: 512 MB)
    pub memory_limit_mb: u64,
    /// Cache directory cleaned by the memory optimizer and used for the
    /// startup manifest
    pub cache_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            auto_optimization: false,
            interval_ms: 30_000,
            optimizers: vec!["memory".into(), "render".into(), "startup".into()],
            strategy: OptimizationStrategy::Balanced,
            memory_limit_mb: 512,
            cache_dir: None,
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub network_latency_ms: f64,
    /// Minimum acceptable frame rate; breached when below
    pub frame_rate_fps: f64,
    /// Process memory growth rate treated as a leak
    pub memory_leak_bytes_per_sec: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_percent: 80.0,
            memory_mb: 4096.0,
            network_latency_ms: 100.0,
            frame_rate_fps: 24.0,
            memory_leak_bytes_per_sec: 1024.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub retention_hours: u64,
    pub max_storage_mb: u64,
    /// Directory for persisted metrics; unset keeps everything in memory
    pub path: Option<PathBuf>,
    pub strategy: StorageStrategy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            max_storage_mb: 100,
            path: None,
            strategy: StorageStrategy::MemoryOnly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub enabled: bool,
    pub interval_hours: u64,
    pub format: String,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: 24,
            format: "json".to_string(),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub monitoring: MonitoringConfig,
    pub optimization: OptimizationConfig,
    pub thresholds: ThresholdConfig,
    pub storage: StorageConfig,
    pub reporting: ReportingConfig,
}

impl PerformanceConfig {
    /// Check every value against its allowed range
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PerfError::InvalidConfig(msg));

        if !(100..=60_000).contains(&self.monitoring.interval_ms) {
            return invalid(format!(
                "monitoring.interval_ms must be 100-60000, got {}",
                self.monitoring.interval_ms
            ));
        }
        if self.optimization.interval_ms < 1000 {
            return invalid(format!(
                "optimization.interval_ms must be at least 1000, got {}",
                self.optimization.interval_ms
            ));
        }

        let t = &self.thresholds;
        if !(0.0..=100.0).contains(&t.cpu_percent) {
            return invalid(format!("thresholds.cpu_percent must be 0-100, got {}", t.cpu_percent));
        }
        for (name, value) in [
            ("memory_mb", t.memory_mb),
            ("network_latency_ms", t.network_latency_ms),
            ("frame_rate_fps", t.frame_rate_fps),
            ("memory_leak_bytes_per_sec", t.memory_leak_bytes_per_sec),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("thresholds.{} must be >= 0, got {}", name, value));
            }
        }

        if !(1..=8760).contains(&self.storage.retention_hours) {
            return invalid(format!(
                "storage.retention_hours must be 1-8760, got {}",
                self.storage.retention_hours
            ));
        }
        if self.storage.strategy.persists_to_file() && self.storage.path.is_none() {
            return invalid(format!(
                "storage.path is required for the {} strategy",
                self.storage.strategy
            ));
        }

        if self.reporting.format != "json" {
            return invalid(format!(
                "reporting.format must be json, got {}",
                self.reporting.format
            ));
        }
        Ok(())
    }

    /// Load from `path`. A missing file yields the defaults; a malformed or
    /// invalid one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Write to `path` through a temp file and rename
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes).map_err(|e| PerfError::Storage(format!("{:#}", e)))?;
        debug!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Value of `category.key`, if both exist
    pub fn get(&self, category: &str, key: &str) -> Option<Value> {
        let doc = serde_json::to_value(self).ok()?;
        doc.get(category)?.get(key).cloned()
    }

    /// Set `category.key`; rejected when unknown, mistyped or out of range
    pub fn set(&mut self, category: &str, key: &str, value: Value) -> Result<()> {
        let mut doc = serde_json::to_value(&*self)?;
        let section = doc
            .get_mut(category)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| PerfError::InvalidConfig(format!("unknown category '{}'", category)))?;
        if !section.contains_key(key) {
            return Err(PerfError::InvalidConfig(format!(
                "unknown key '{}.{}'",
                category, key
            )));
        }
        section.insert(key.to_string(), value);

        let updated: Self = serde_json::from_value(doc)
            .map_err(|e| PerfError::InvalidConfig(format!("{}.{}: {}", category, key, e)))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.monitoring.interval_ms)
    }

    pub fn optimization_interval(&self) -> Duration {
        Duration::from_millis(self.optimization.interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.storage.retention_hours * 3600)
    }

    pub fn max_storage_bytes(&self) -> u64 {
        self.storage.max_storage_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = PerformanceConfig::default();
        config.validate().unwrap();
        assert_eq!(config.monitoring.interval_ms, 1000);
        assert_eq!(config.optimization.interval_ms, 30_000);
        assert_eq!(config.thresholds.frame_rate_fps, 24.0);
        assert_eq!(config.storage.strategy, StorageStrategy::MemoryOnly);
        assert_eq!(config.retention(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_load_missing_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = PerformanceConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, PerformanceConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/perf.json");

        let mut config = PerformanceConfig::default();
        config.thresholds.cpu_percent = 65.0;
        config.optimization.strategy = OptimizationStrategy::Aggressive;
        config.save(&path).unwrap();

        assert_eq!(PerformanceConfig::load(&path).unwrap(), config);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_partial_and_invalid_files() {
        let dir = tempdir().unwrap();
        let partial = dir.path().join("partial.json");
        std::fs::write(&partial, r#"{"thresholds": {"cpu_percent": 50}}"#).unwrap();
        let config = PerformanceConfig::load(&partial).unwrap();
        assert_eq!(config.thresholds.cpu_percent, 50.0);
        assert_eq!(config.thresholds.memory_mb, 4096.0);

        let bad_range = dir.path().join("range.json");
        std::fs::write(&bad_range, r#"{"monitoring": {"interval_ms": 10}}"#).unwrap();
        assert!(matches!(
            PerformanceConfig::load(&bad_range),
            Err(PerfError::InvalidConfig(_))
        ));

        let malformed = dir.path().join("bad.json");
        std::fs::write(&malformed, "{ not json").unwrap();
        assert!(matches!(
            PerformanceConfig::load(&malformed),
            Err(PerfError::Json(_))
        ));
    }

    #[test]
    fn test_get_and_set_by_category() {
        let mut config = PerformanceConfig::default();
        assert_eq!(config.get("monitoring", "interval_ms"), Some(json!(1000)));
        assert_eq!(config.get("optimization", "strategy"), Some(json!("balanced")));
        assert_eq!(config.get("monitoring", "nope"), None);

        config.set("thresholds", "network_latency_ms", json!(250.0)).unwrap();
        assert_eq!(config.thresholds.network_latency_ms, 250.0);

        config.set("optimization", "strategy", json!("conservative")).unwrap();
        assert_eq!(config.optimization.strategy, OptimizationStrategy::Conservative);

        assert!(config.set("storage", "retention_hours", json!(0)).is_err());
        assert!(config.set("monitoring", "interval_ms", json!("fast")).is_err());
        assert!(config.set("bogus", "key", json!(1)).is_err());
        assert!(config.set("monitoring", "bogus", json!(1)).is_err());
        assert_eq!(config.storage.retention_hours, 24);
    }

    #[test]
    fn test_file_storage_requires_path() {
        let mut config = PerformanceConfig::default();
        config.storage.strategy = StorageStrategy::File;
        assert!(config.validate().is_err());
        config.storage.path = Some(PathBuf::from("/var/lib/perf"));
        config.validate().unwrap();
    }
}
