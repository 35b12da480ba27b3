//! On-disk persistence of collected snapshots
//!
//! Snapshots are appended as JSON lines to `metrics.jsonl` under the storage
//! directory. Rewrites (after cleanup or compression) go through a temp file
//! and a rename so a crash never leaves a truncated history behind.

use crate::error::{PerfError, Result};
use crate::models::PerformanceMetrics;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const METRICS_FILE: &str = "metrics.jsonl";

/// Where collected snapshots go besides the in-memory history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageStrategy {
    #[default]
    MemoryOnly,
    File,
    /// Not available in this build; every persist attempt reports a failure
    Database,
    /// In-memory history plus file persistence
    Hybrid,
}

impl StorageStrategy {
    pub fn persists_to_file(&self) -> bool {
        matches!(self, StorageStrategy::File | StorageStrategy::Hybrid)
    }
}

impl fmt::Display for StorageStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageStrategy::MemoryOnly => "memory_only",
            StorageStrategy::File => "file",
            StorageStrategy::Database => "database",
            StorageStrategy::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

impl FromStr for StorageStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "memory_only" | "memory" => Ok(StorageStrategy::MemoryOnly),
            "file" => Ok(StorageStrategy::File),
            "database" => Ok(StorageStrategy::Database),
            "hybrid" => Ok(StorageStrategy::Hybrid),
            other => Err(format!("unknown storage strategy '{}'", other)),
        }
    }
}

/// JSON-lines metrics file under a storage directory
#[derive(Debug, Clone)]
pub struct MetricsStore {
    dir: PathBuf,
}

impl MetricsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_path(&self) -> PathBuf {
        self.dir.join(METRICS_FILE)
    }

    /// Append one snapshot. Returns the file size afterwards.
    pub async fn append(&self, metrics: &PerformanceMetrics) -> Result<u64> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error("create storage directory", &self.dir, e))?;

        let mut line = serde_json::to_vec(metrics)?;
        line.push(b'\n');

        let path = self.file_path();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| storage_error("open metrics file", &path, e))?;

        file.write_all(&line)
            .await
            .map_err(|e| storage_error("append to metrics file", &path, e))?;
        file.flush()
            .await
            .map_err(|e| storage_error("flush metrics file", &path, e))?;

        let size = file
            .metadata()
            .await
            .map_err(|e| storage_error("stat metrics file", &path, e))?
            .len();
        Ok(size)
    }

    /// Read back every stored snapshot. Missing file means an empty history;
    /// lines that fail to parse are skipped.
    pub async fn load(&self) -> Result<Vec<PerformanceMetrics>> {
        let path = self.file_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("read metrics file", &path, e)),
        };

        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PerformanceMetrics>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "Skipping unreadable stored snapshot"
                ),
            }
        }

        debug!(path = %path.display(), entries = entries.len(), "Loaded stored metrics");
        Ok(entries)
    }

    /// Replace the file contents with `entries`
    pub async fn rewrite(&self, entries: &[PerformanceMetrics]) -> Result<()> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }

        let path = self.file_path();
        tokio::task::spawn_blocking(move || write_atomic(&path, &buf))
            .await
            .map_err(|e| PerfError::Storage(format!("rewrite task failed: {}", e)))?
            .map_err(|e| PerfError::Storage(format!("{:#}", e)))
    }

    /// Current file size, zero when nothing was stored yet
    pub async fn size(&self) -> u64 {
        tokio::fs::metadata(self.file_path())
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

fn storage_error(action: &str, path: &Path, e: std::io::Error) -> PerfError {
    PerfError::Storage(format!("failed to {} {}: {}", action, path.display(), e))
}

/// Write `bytes` to `path` through a sibling temp file and a rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create directory {}", parent.display())
            })?;
        }
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file {}", temp_path.display()))?;

        file.write_all(bytes)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", temp_path.display()))?;
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
