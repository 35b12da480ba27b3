//! Memory optimization
//!
//! The engine cannot free memory it does not own, so reclamation is done
//! through hooks the host registers ([`MemoryReclaimer`]: caches, object
//! pools, buffers) plus on-disk cache and temp file cleanup.

use super::{
    percent_reduction, Evaluation, MetricSnapshot, OptimizationContext, OptimizationRoutine,
    Parameters, RoutineOutcome,
};
use crate::models::{OptimizationStrategy, ResourceType};
use crate::monitor::LeakDetector;
use crate::probe::{self, ResourceProbe};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Fraction of the limit above which optimization is suggested
const HIGH_USAGE_RATIO: f64 = 0.8;

/// Period of the process memory readings behind `should_optimize`
const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Process memory readings kept for trend analysis
const MAX_TREND_SAMPLES: usize = 1440;

/// Memory-specific modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStrategy {
    LowMemory,
    Balanced,
    HighPerformance,
}

impl From<OptimizationStrategy> for MemoryStrategy {
    fn from(strategy: OptimizationStrategy) -> Self {
        match strategy {
            OptimizationStrategy::Aggressive => MemoryStrategy::LowMemory,
            OptimizationStrategy::Balanced => MemoryStrategy::Balanced,
            OptimizationStrategy::Conservative => MemoryStrategy::HighPerformance,
        }
    }
}

impl MemoryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStrategy::LowMemory => "LowMemory",
            MemoryStrategy::Balanced => "Balanced",
            MemoryStrategy::HighPerformance => "HighPerformance",
        }
    }

    fn reclaim_level(&self) -> ReclaimLevel {
        match self {
            MemoryStrategy::LowMemory => ReclaimLevel::Aggressive,
            MemoryStrategy::Balanced => ReclaimLevel::Moderate,
            MemoryStrategy::HighPerformance => ReclaimLevel::Light,
        }
    }

    /// Cache files older than this are removed
    fn cache_max_age(&self) -> Duration {
        match self {
            MemoryStrategy::LowMemory => Duration::ZERO,
            MemoryStrategy::Balanced => Duration::from_secs(3600),
            MemoryStrategy::HighPerformance => Duration::from_secs(2 * 3600),
        }
    }

    fn estimated_reduction(&self) -> f64 {
        match self {
            MemoryStrategy::LowMemory => 25.0,
            MemoryStrategy::Balanced => 15.0,
            MemoryStrategy::HighPerformance => 8.0,
        }
    }
}

/// How hard a reclaimer should try
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReclaimLevel {
    /// Trim obviously stale entries
    Light,
    /// Drop caches and shrink pools to their working set
    Moderate,
    /// Release everything that can be rebuilt
    Aggressive,
}

impl fmt::Display for ReclaimLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReclaimLevel::Light => "light",
            ReclaimLevel::Moderate => "moderate",
            ReclaimLevel::Aggressive => "aggressive",
        };
        f.write_str(s)
    }
}

/// Host-provided memory release hook
pub trait MemoryReclaimer: Send + Sync {
    fn name(&self) -> &str;

    /// Release memory; returns the number of bytes freed
    fn reclaim(&self, level: ReclaimLevel) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct MemoryOptimizerConfig {
    /// Process memory budget (default: 512 MB)
    pub memory_limit_bytes: u64,
    /// Directory of rebuildable cache files
    pub cache_dir: Option<PathBuf>,
    /// Directory whose `*.tmp` files may be removed
    pub temp_dir: Option<PathBuf>,
}

impl Default for MemoryOptimizerConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 512 * 1024 * 1024,
            cache_dir: None,
            temp_dir: None,
        }
    }
}

pub struct MemoryOptimizer {
    config: MemoryOptimizerConfig,
    probe: Arc<dyn ResourceProbe>,
    reclaimers: Mutex<Vec<Arc<dyn MemoryReclaimer>>>,
    last_rss: AtomicU64,
    samples: Mutex<VecDeque<(DateTime<Utc>, u64)>>,
}

impl fmt::Debug for MemoryOptimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryOptimizer")
            .field("config", &self.config)
            .field("probe", &self.probe.name())
            .finish()
    }
}

impl MemoryOptimizer {
    pub fn new(config: MemoryOptimizerConfig, probe: Arc<dyn ResourceProbe>) -> Self {
        Self {
            config,
            probe,
            reclaimers: Mutex::new(Vec::new()),
            last_rss: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Optimizer reading process memory from the platform probe
    pub fn with_platform_probe(config: MemoryOptimizerConfig) -> Self {
        let probe = probe::platform_probe(ResourceType::Memory)
            .unwrap_or_else(|| Arc::new(probe::MemoryProbe::new()));
        Self::new(config, probe)
    }

    pub fn register_reclaimer(&self, reclaimer: Arc<dyn MemoryReclaimer>) {
        self.reclaimers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reclaimer);
    }

    pub fn memory_limit(&self) -> u64 {
        self.config.memory_limit_bytes
    }

    /// Most recent process resident memory, bytes
    pub fn last_process_memory(&self) -> u64 {
        self.last_rss.load(Ordering::Relaxed)
    }

    fn record_rss(&self, bytes: u64) {
        self.last_rss.store(bytes, Ordering::Relaxed);
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.push_back((Utc::now(), bytes));
        while samples.len() > MAX_TREND_SAMPLES {
            samples.pop_front();
        }
    }

    fn above_limit_ratio(&self) -> bool {
        let limit = self.config.memory_limit_bytes;
        limit > 0 && self.last_process_memory() as f64 > limit as f64 * HIGH_USAGE_RATIO
    }

    fn leak_suspected(&self) -> Option<f64> {
        let samples: Vec<_> = self
            .samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect();
        LeakDetector::default()
            .detect(&samples)
            .map(|trend| trend.mb_per_hour())
    }

    fn reclaim(&self, level: ReclaimLevel, outcome: &mut RoutineOutcome) -> u64 {
        let reclaimers = self
            .reclaimers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut freed = 0;
        for reclaimer in reclaimers {
            match reclaimer.reclaim(level) {
                Ok(bytes) => {
                    debug!(reclaimer = reclaimer.name(), level = %level, bytes = bytes, "Reclaimed memory");
                    freed += bytes;
                }
                Err(e) => outcome
                    .errors
                    .push(format!("reclaimer {} failed: {:#}", reclaimer.name(), e)),
            }
        }
        freed
    }
}

#[async_trait]
impl OptimizationRoutine for MemoryOptimizer {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn default_parameters(&self) -> Parameters {
        Parameters::from([("clean_temp_files".to_string(), json!(true))])
    }

    fn validate_parameters(&self, parameters: &Parameters) -> Result<()> {
        if let Some(flag) = parameters.get("clean_temp_files") {
            anyhow::ensure!(flag.is_boolean(), "clean_temp_files must be a boolean");
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        self.probe
            .initialize()
            .await
            .context("process memory probe unavailable")?;
        let usage = self.probe.sample().await?;
        self.record_rss(usage.process.memory_usage);
        Ok(())
    }

    fn should_optimize(&self) -> bool {
        self.above_limit_ratio() || self.leak_suspected().is_some()
    }

    fn suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();
        let rss_mb = self.last_process_memory() as f64 / BYTES_PER_MB;
        let limit_mb = self.config.memory_limit_bytes as f64 / BYTES_PER_MB;

        if self.above_limit_ratio() {
            suggestions.push(format!(
                "Process memory at {:.0} MB is above 80% of the {:.0} MB limit; run a LowMemory optimization",
                rss_mb, limit_mb
            ));
        }
        if let Some(mb_per_hour) = self.leak_suspected() {
            suggestions.push(format!(
                "Memory grows steadily ({:.1} MB/hour); check for leaks",
                mb_per_hour
            ));
        }
        if self.reclaimers.lock().unwrap_or_else(|e| e.into_inner()).is_empty() {
            suggestions.push(
                "Register cache or pool reclaimers so optimization can release memory".to_string(),
            );
        }
        if suggestions.is_empty() {
            suggestions.push("Memory usage is within limits".to_string());
        }
        suggestions
    }

    fn estimate(&self, strategy: OptimizationStrategy) -> BTreeMap<String, f64> {
        let mode = MemoryStrategy::from(strategy);
        let mut reduction = mode.estimated_reduction();
        if self.above_limit_ratio() {
            reduction += 10.0;
        }
        let throughput = match mode {
            MemoryStrategy::LowMemory => 0.0,
            MemoryStrategy::Balanced => 2.0,
            MemoryStrategy::HighPerformance => 5.0,
        };

        BTreeMap::from([
            ("memory_reduction".to_string(), reduction),
            ("throughput_gain".to_string(), throughput),
        ])
    }

    fn mode_name(&self, strategy: OptimizationStrategy) -> &'static str {
        MemoryStrategy::from(strategy).as_str()
    }

    fn sampling_interval(&self) -> Option<Duration> {
        Some(SAMPLE_INTERVAL)
    }

    async fn sample(&self) {
        match self.probe.sample().await {
            Ok(usage) => self.record_rss(usage.process.memory_usage),
            Err(e) => debug!(error = %e, "Process memory sample failed"),
        }
    }

    async fn capture_metrics(&self) -> MetricSnapshot {
        let mut snapshot = MetricSnapshot::new();
        match self.probe.sample().await {
            Ok(usage) => {
                self.record_rss(usage.process.memory_usage);
                snapshot.insert(
                    "process_memory_mb".to_string(),
                    json!(usage.process.memory_usage as f64 / BYTES_PER_MB),
                );
                snapshot.insert(
                    "system_memory_percent".to_string(),
                    json!(usage.memory.usage_percentage),
                );
            }
            Err(e) => {
                warn!(error = %e, "Memory snapshot failed");
                snapshot.insert("error".to_string(), json!(e.to_string()));
            }
        }
        snapshot.insert(
            "memory_limit_mb".to_string(),
            json!(self.config.memory_limit_bytes as f64 / BYTES_PER_MB),
        );
        snapshot
    }

    async fn run(
        &self,
        strategy: OptimizationStrategy,
        ctx: &OptimizationContext<'_>,
    ) -> Result<RoutineOutcome> {
        let mode = MemoryStrategy::from(strategy);
        let mut outcome = RoutineOutcome::default();

        ctx.progress(20, format!("Releasing memory ({} reclaim)", mode.reclaim_level()));
        let reclaimed = self.reclaim(mode.reclaim_level(), &mut outcome);
        outcome
            .actions
            .push(format!("{} reclaim freed {:.1} MB", mode.reclaim_level(), reclaimed as f64 / BYTES_PER_MB));
        outcome
            .details
            .insert("reclaimed_mb".to_string(), reclaimed as f64 / BYTES_PER_MB);

        if ctx.is_cancelled() {
            return Ok(outcome);
        }

        if let Some(cache_dir) = self.config.cache_dir.clone() {
            ctx.progress(50, "Clearing cache files");
            let max_age = mode.cache_max_age();
            match tokio::task::spawn_blocking(move || remove_stale_files(&cache_dir, max_age, None))
                .await
            {
                Ok(Ok((files, bytes))) => {
                    outcome.actions.push(format!("removed {} cache files", files));
                    outcome.details.insert("cache_files_removed".to_string(), files as f64);
                    outcome
                        .details
                        .insert("cache_mb_removed".to_string(), bytes as f64 / BYTES_PER_MB);
                }
                Ok(Err(e)) => outcome.errors.push(format!("cache cleanup failed: {:#}", e)),
                Err(e) => outcome.errors.push(format!("cache cleanup task failed: {}", e)),
            }
        }

        if ctx.is_cancelled() {
            return Ok(outcome);
        }

        let clean_temp = ctx
            .parameters()
            .get("clean_temp_files")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if clean_temp && mode != MemoryStrategy::HighPerformance {
            if let Some(temp_dir) = self.config.temp_dir.clone() {
                ctx.progress(75, "Removing temporary files");
                match tokio::task::spawn_blocking(move || {
                    remove_stale_files(&temp_dir, Duration::ZERO, Some("tmp"))
                })
                .await
                {
                    Ok(Ok((files, _))) => {
                        outcome.actions.push(format!("removed {} temp files", files));
                        outcome.details.insert("temp_files_removed".to_string(), files as f64);
                    }
                    Ok(Err(e)) => outcome.errors.push(format!("temp cleanup failed: {:#}", e)),
                    Err(e) => outcome.errors.push(format!("temp cleanup task failed: {}", e)),
                }
            }
        }

        if self.reclaimers.lock().unwrap_or_else(|e| e.into_inner()).is_empty() {
            outcome
                .warnings
                .push("no memory reclaimers registered".to_string());
        }

        ctx.progress(90, "Measuring memory after optimization");
        Ok(outcome)
    }

    fn evaluate(
        &self,
        before: &MetricSnapshot,
        after: &MetricSnapshot,
        outcome: &RoutineOutcome,
    ) -> Evaluation {
        let mut improvements = BTreeMap::new();
        let measured = percent_reduction(before, after, "process_memory_mb");

        if let (Some(b), Some(a)) = (
            before.get("process_memory_mb").and_then(|v| v.as_f64()),
            after.get("process_memory_mb").and_then(|v| v.as_f64()),
        ) {
            improvements.insert("memory_mb".to_string(), b - a);
        }

        // Fall back to what the hooks report when RSS does not move
        let reported = before
            .get("process_memory_mb")
            .and_then(|v| v.as_f64())
            .filter(|b| *b > 0.0)
            .and_then(|b| outcome.details.get("reclaimed_mb").map(|r| r / b * 100.0));

        let improvement = measured
            .filter(|m| *m > 0.0)
            .or(reported)
            .unwrap_or(0.0)
            .clamp(0.0, 100.0);
        improvements.insert("memory_percent".to_string(), improvement);

        Evaluation {
            improvements,
            improvement_percentage: improvement,
        }
    }
}

/// Remove regular files under `dir` (recursively) whose modification time is
/// at least `max_age` ago. With `extension`, only matching files are touched.
/// Returns the number of files and bytes removed.
fn remove_stale_files(dir: &Path, max_age: Duration, extension: Option<&str>) -> Result<(usize, u64)> {
    if !dir.exists() {
        return Ok((0, 0));
    }

    let now = SystemTime::now();
    let mut files = 0;
    let mut bytes = 0;

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            if extension.is_none() {
                let (f, b) = remove_stale_files(&path, max_age, extension)?;
                files += f;
                bytes += b;
            }
            continue;
        }

        if let Some(ext) = extension {
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or(Duration::ZERO);
        if age < max_age {
            continue;
        }

        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        files += 1;
        bytes += metadata.len();
    }

    Ok((files, bytes))
}
