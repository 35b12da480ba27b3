//! Export and import of a time-bounded slice of collected data

use super::storage::write_atomic;
use super::CustomMetricPoint;
use crate::error::{PerfError, Result};
use crate::models::PerformanceMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Current export document version
pub const EXPORT_VERSION: u32 = 1;

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = PerfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            other => Err(PerfError::InvalidConfig(format!(
                "unsupported export format '{}'",
                other
            ))),
        }
    }
}

/// Serialized form of an export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub metrics: Vec<PerformanceMetrics>,
    #[serde(default)]
    pub custom_metrics: BTreeMap<String, Vec<CustomMetricPoint>>,
}

impl ExportDocument {
    pub fn new(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        metrics: Vec<PerformanceMetrics>,
        custom_metrics: BTreeMap<String, Vec<CustomMetricPoint>>,
    ) -> Self {
        Self {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            from,
            to,
            metrics,
            custom_metrics,
        }
    }

    /// Check version and every snapshot, then order entries by timestamp
    pub fn validated(mut self) -> Result<Self> {
        if self.version != EXPORT_VERSION {
            return Err(PerfError::Import(format!(
                "unsupported document version {} (expected {})",
                self.version, EXPORT_VERSION
            )));
        }

        if let Some(pos) = self.metrics.iter().position(|m| !m.is_valid()) {
            return Err(PerfError::Import(format!(
                "metrics entry {} is invalid (timestamp {})",
                pos, self.metrics[pos].timestamp
            )));
        }

        for (name, points) in &self.custom_metrics {
            if name.is_empty() {
                return Err(PerfError::Import("custom metric with empty name".to_string()));
            }
            if points.iter().any(|p| !p.value.is_finite()) {
                return Err(PerfError::Import(format!(
                    "custom metric '{}' contains a non-finite value",
                    name
                )));
            }
        }

        self.metrics.sort_by_key(|m| m.timestamp);
        for points in self.custom_metrics.values_mut() {
            points.sort_by_key(|p| p.timestamp);
        }
        Ok(self)
    }

    pub fn write(&self, path: &Path, format: ExportFormat) -> Result<()> {
        let bytes = match format {
            ExportFormat::Json => serde_json::to_vec_pretty(self)?,
        };
        write_atomic(path, &bytes).map_err(|e| PerfError::Storage(format!("{:#}", e)))
    }

    /// Read and validate a document
    pub fn read(path: &Path, format: ExportFormat) -> Result<Self> {
        let content = std::fs::read(path)?;
        let document: ExportDocument = match format {
            ExportFormat::Json => serde_json::from_slice(&content)
                .map_err(|e| PerfError::Import(format!("{}: {}", path.display(), e)))?,
        };
        document.validated()
    }
}
