//! Startup optimization
//!
//! The host registers the modules it loads at startup with their measured
//! load cost and reports each completed startup through
//! [`StartupOptimizer::record_startup_time`]. Optimization decides a load
//! order, which non-critical modules are deferred until after the first
//! frame, and persists that plan as a manifest the next startup reads.

use super::{
    percent_reduction, Evaluation, MetricSnapshot, OptimizationContext, OptimizationRoutine,
    Parameters, RoutineOutcome,
};
use crate::collector::write_atomic;
use crate::error::PerfError;
use crate::models::OptimizationStrategy;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CACHE_FILE: &str = "startup_cache.json";

const CACHE_VERSION: u32 = 1;

/// Non-critical modules costing more than this are deferred by FastStart
const FAST_START_DEFER_COST_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStrategy {
    FastStart,
    BalancedStart,
    FullStart,
}

impl From<OptimizationStrategy> for StartupStrategy {
    fn from(strategy: OptimizationStrategy) -> Self {
        match strategy {
            OptimizationStrategy::Aggressive => StartupStrategy::FastStart,
            OptimizationStrategy::Balanced => StartupStrategy::BalancedStart,
            OptimizationStrategy::Conservative => StartupStrategy::FullStart,
        }
    }
}

impl StartupStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartupStrategy::FastStart => "FastStart",
            StartupStrategy::BalancedStart => "BalancedStart",
            StartupStrategy::FullStart => "FullStart",
        }
    }

    fn estimated_reduction(&self) -> f64 {
        match self {
            StartupStrategy::FastStart => 40.0,
            StartupStrategy::BalancedStart => 25.0,
            StartupStrategy::FullStart => 15.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartupOptimizerConfig {
    /// Directory holding the startup manifest; no manifest when unset
    pub cache_dir: Option<PathBuf>,
    /// Startups slower than this call for optimization (default: 30 seconds)
    pub startup_timeout: Duration,
    /// Modules that may load after startup completes
    pub deferrable_modules: Vec<String>,
    /// Manifests older than this are stale (default: 7 days)
    pub cache_max_age: Duration,
    /// Startup times kept for averaging (default: 100)
    pub history_cap: usize,
}

impl Default for StartupOptimizerConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            startup_timeout: Duration::from_millis(30_000),
            deferrable_modules: ["help", "tutorial", "analytics", "feedback"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cache_max_age: Duration::from_secs(7 * 24 * 3600),
            history_cap: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupModule {
    pub name: String,
    pub load_cost_ms: u64,
    /// Critical modules are never deferred
    pub critical: bool,
    #[serde(default)]
    pub deferred: bool,
}

impl StartupModule {
    pub fn new(name: impl Into<String>, load_cost_ms: u64, critical: bool) -> Self {
        Self {
            name: name.into(),
            load_cost_ms,
            critical,
            deferred: false,
        }
    }
}

/// Recorded startup durations, milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupTimes {
    pub last_ms: u64,
    pub average_ms: f64,
    pub best_ms: u64,
    pub worst_ms: u64,
    pub count: u64,
    #[serde(skip)]
    history: VecDeque<u64>,
}

impl StartupTimes {
    fn record(&mut self, ms: u64, cap: usize) {
        self.last_ms = ms;
        self.best_ms = if self.count == 0 { ms } else { self.best_ms.min(ms) };
        self.worst_ms = self.worst_ms.max(ms);
        self.count += 1;

        self.history.push_back(ms);
        while self.history.len() > cap.max(1) {
            self.history.pop_front();
        }
        self.average_ms =
            self.history.iter().sum::<u64>() as f64 / self.history.len() as f64;
    }

    pub fn history(&self) -> Vec<u64> {
        self.history.iter().copied().collect()
    }
}

/// Persisted startup plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartupManifest {
    version: u32,
    created_at: DateTime<Utc>,
    strategy: String,
    load_order: Vec<String>,
    deferred: Vec<String>,
    settings: BTreeMap<String, serde_json::Value>,
}

struct StartupState {
    modules: Vec<StartupModule>,
    times: StartupTimes,
}

pub struct StartupOptimizer {
    config: StartupOptimizerConfig,
    cache_valid: AtomicBool,
    state: Mutex<StartupState>,
}

impl Default for StartupOptimizer {
    fn default() -> Self {
        Self::new(StartupOptimizerConfig::default())
    }
}

impl StartupOptimizer {
    pub fn new(config: StartupOptimizerConfig) -> Self {
        Self {
            config,
            cache_valid: AtomicBool::new(false),
            state: Mutex::new(StartupState {
                modules: Vec::new(),
                times: StartupTimes::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StartupState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register_module(&self, module: StartupModule) -> crate::error::Result<()> {
        let mut state = self.lock();
        if state.modules.iter().any(|m| m.name == module.name) {
            return Err(PerfError::DuplicateName(module.name));
        }
        state.modules.push(module);
        Ok(())
    }

    /// Modules in their current load order
    pub fn modules(&self) -> Vec<StartupModule> {
        self.lock().modules.clone()
    }

    pub fn record_startup_time(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.lock().times.record(ms, self.config.history_cap);
        debug!(startup_ms = ms, "Startup time recorded");
    }

    pub fn startup_times(&self) -> StartupTimes {
        self.lock().times.clone()
    }

    /// Estimated startup time: cost of every non-deferred module
    pub fn projected_startup_ms(&self) -> u64 {
        self.lock()
            .modules
            .iter()
            .filter(|m| !m.deferred)
            .map(|m| m.load_cost_ms)
            .sum()
    }

    pub fn cache_path(&self) -> Option<PathBuf> {
        self.config.cache_dir.as_ref().map(|d| d.join(CACHE_FILE))
    }

    /// Whether the manifest on disk exists, is current and covers every
    /// registered module
    pub fn is_cache_valid(&self) -> bool {
        let Some(path) = self.cache_path() else {
            return false;
        };
        let manifest = match read_manifest(&path) {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Startup manifest unusable");
                return false;
            }
        };

        let max_age = chrono::Duration::from_std(self.config.cache_max_age)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        if manifest.version != CACHE_VERSION || Utc::now() - manifest.created_at > max_age {
            return false;
        }

        let state = self.lock();
        state
            .modules
            .iter()
            .all(|m| manifest.load_order.contains(&m.name) || manifest.deferred.contains(&m.name))
    }

    fn refresh_cache_flag(&self) -> bool {
        let valid = self.is_cache_valid();
        self.cache_valid.store(valid, Ordering::Relaxed);
        valid
    }

    fn is_deferrable(&self, module: &StartupModule, mode: StartupStrategy) -> bool {
        if module.critical {
            return false;
        }
        self.config.deferrable_modules.contains(&module.name)
            || (mode == StartupStrategy::FastStart && module.load_cost_ms > FAST_START_DEFER_COST_MS)
    }

    /// Critical modules first, cheapest first within each group
    fn reorder(&self) -> Vec<String> {
        let mut state = self.lock();
        state
            .modules
            .sort_by(|a, b| b.critical.cmp(&a.critical).then(a.load_cost_ms.cmp(&b.load_cost_ms)));
        state.modules.iter().map(|m| m.name.clone()).collect()
    }

    /// Mark deferrable modules; returns the names now deferred
    fn defer_modules(&self, mode: StartupStrategy) -> Vec<String> {
        let mut state = self.lock();
        for module in state.modules.iter_mut() {
            module.deferred = self.is_deferrable(module, mode);
        }
        state
            .modules
            .iter()
            .filter(|m| m.deferred)
            .map(|m| m.name.clone())
            .collect()
    }

    fn build_manifest(
        &self,
        mode: StartupStrategy,
        settings: BTreeMap<String, serde_json::Value>,
    ) -> StartupManifest {
        let state = self.lock();
        StartupManifest {
            version: CACHE_VERSION,
            created_at: Utc::now(),
            strategy: mode.as_str().to_string(),
            load_order: state
                .modules
                .iter()
                .filter(|m| !m.deferred)
                .map(|m| m.name.clone())
                .collect(),
            deferred: state
                .modules
                .iter()
                .filter(|m| m.deferred)
                .map(|m| m.name.clone())
                .collect(),
            settings,
        }
    }

    fn config_settings(mode: StartupStrategy) -> BTreeMap<String, serde_json::Value> {
        let mut settings = BTreeMap::new();
        settings.insert("lazyLoading".to_string(), json!(mode != StartupStrategy::FullStart));
        settings.insert("preloadAssets".to_string(), json!(mode == StartupStrategy::FullStart));
        settings.insert(
            "parallelInit".to_string(),
            json!(mode != StartupStrategy::BalancedStart),
        );
        settings
    }
}

fn read_manifest(path: &Path) -> Result<StartupManifest> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("failed to parse {}", path.display()))
}

async fn write_manifest(path: PathBuf, manifest: &StartupManifest) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(manifest).context("failed to serialize manifest")?;
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .context("manifest write task failed")?
}

#[async_trait]
impl OptimizationRoutine for StartupOptimizer {
    fn kind(&self) -> &'static str {
        "startup"
    }

    fn default_parameters(&self) -> Parameters {
        Parameters::from([
            ("defer_modules".to_string(), json!(true)),
            ("optimize_config".to_string(), json!(true)),
        ])
    }

    fn validate_parameters(&self, parameters: &Parameters) -> Result<()> {
        for key in ["defer_modules", "optimize_config"] {
            if let Some(flag) = parameters.get(key) {
                anyhow::ensure!(flag.is_boolean(), "{} must be a boolean", key);
            }
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        if let Some(dir) = &self.config.cache_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        }
        let valid = self.refresh_cache_flag();
        debug!(cache_valid = valid, "Startup optimizer initialized");
        Ok(())
    }

    fn should_optimize(&self) -> bool {
        let cache_stale =
            self.config.cache_dir.is_some() && !self.cache_valid.load(Ordering::Relaxed);

        let times = self.startup_times();
        let timeout_ms = self.config.startup_timeout.as_millis() as u64;
        let too_slow = times.count > 0 && times.last_ms > timeout_ms;
        let regressed = times.count > 1 && times.last_ms as f64 > times.average_ms * 1.5;

        cache_stale || too_slow || regressed
    }

    fn suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();
        let times = self.startup_times();

        if self.config.cache_dir.is_some() && !self.cache_valid.load(Ordering::Relaxed) {
            suggestions.push("Startup cache is missing or stale; rebuild it".to_string());
        }
        if times.count > 0 && times.last_ms > self.config.startup_timeout.as_millis() as u64 {
            suggestions.push(format!(
                "Last startup took {} ms, above the {} ms timeout; use FastStart",
                times.last_ms,
                self.config.startup_timeout.as_millis()
            ));
        }
        if times.count > 1 && times.last_ms as f64 > times.average_ms * 1.5 {
            suggestions.push(format!(
                "Last startup ({} ms) is well above the {:.0} ms average",
                times.last_ms, times.average_ms
            ));
        }
        let deferrable = self
            .modules()
            .iter()
            .filter(|m| !m.deferred && self.is_deferrable(m, StartupStrategy::BalancedStart))
            .count();
        if deferrable > 0 {
            suggestions.push(format!("{} modules could be loaded after startup", deferrable));
        }
        if suggestions.is_empty() {
            suggestions.push("Startup performance is within limits".to_string());
        }
        suggestions
    }

    fn estimate(&self, strategy: OptimizationStrategy) -> BTreeMap<String, f64> {
        let mode = StartupStrategy::from(strategy);
        let mut reduction = mode.estimated_reduction();
        let times = self.startup_times();
        if times.count > 0 && times.last_ms > self.config.startup_timeout.as_millis() as u64 {
            reduction += 10.0;
        }
        BTreeMap::from([("startup_time_reduction".to_string(), reduction)])
    }

    fn mode_name(&self, strategy: OptimizationStrategy) -> &'static str {
        StartupStrategy::from(strategy).as_str()
    }

    async fn capture_metrics(&self) -> MetricSnapshot {
        let times = self.startup_times();
        let projected = self.projected_startup_ms();
        let deferred = self.modules().iter().filter(|m| m.deferred).count();
        let new_best = times.count > 0 && projected < times.best_ms;

        MetricSnapshot::from([
            ("last_startup_ms".to_string(), json!(times.last_ms)),
            ("average_startup_ms".to_string(), json!(times.average_ms)),
            ("best_startup_ms".to_string(), json!(times.best_ms)),
            ("projected_startup_ms".to_string(), json!(projected)),
            ("deferred_modules".to_string(), json!(deferred)),
            (
                "cache_valid".to_string(),
                json!(self.cache_valid.load(Ordering::Relaxed)),
            ),
            ("newBest".to_string(), json!(new_best)),
        ])
    }

    async fn run(
        &self,
        strategy: OptimizationStrategy,
        ctx: &OptimizationContext<'_>,
    ) -> Result<RoutineOutcome> {
        let mode = StartupStrategy::from(strategy);
        let flag = |key: &str| {
            ctx.parameters()
                .get(key)
                .and_then(|v| v.as_bool())
                .unwrap_or(true)
        };
        let mut outcome = RoutineOutcome::default();

        // BalancedStart keeps the existing order when the manifest is current
        let cache_current = self.refresh_cache_flag();
        if mode != StartupStrategy::BalancedStart || !cache_current {
            ctx.progress(20, "Ordering startup modules");
            let order = self.reorder();
            outcome
                .actions
                .push(format!("ordered {} modules", order.len()));
        }

        if ctx.is_cancelled() {
            return Ok(outcome);
        }

        if flag("defer_modules") {
            ctx.progress(40, "Deferring non-critical modules");
            let deferred = self.defer_modules(mode);
            if !deferred.is_empty() {
                outcome
                    .actions
                    .push(format!("deferred {}", deferred.join(", ")));
            }
            outcome
                .details
                .insert("deferred_modules".to_string(), deferred.len() as f64);
        }

        if ctx.is_cancelled() {
            return Ok(outcome);
        }

        let settings = if flag("optimize_config") {
            ctx.progress(60, "Tuning startup settings");
            outcome.actions.push("tuned startup settings".to_string());
            Self::config_settings(mode)
        } else {
            BTreeMap::new()
        };

        if let Some(path) = self.cache_path() {
            if mode == StartupStrategy::BalancedStart && cache_current {
                outcome.actions.push("validated startup cache".to_string());
            } else {
                ctx.progress(80, "Writing startup cache");
                let manifest = self.build_manifest(mode, settings);
                match write_manifest(path.clone(), &manifest).await {
                    Ok(()) => {
                        info!(path = %path.display(), strategy = mode.as_str(), "Startup cache written");
                        outcome.actions.push("rebuilt startup cache".to_string());
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Startup cache write failed");
                        outcome.errors.push(format!("startup cache write failed: {:#}", e));
                    }
                }
            }
            self.refresh_cache_flag();
        } else {
            outcome
                .warnings
                .push("no cache directory configured; plan not persisted".to_string());
        }

        Ok(outcome)
    }

    fn evaluate(
        &self,
        before: &MetricSnapshot,
        after: &MetricSnapshot,
        _outcome: &RoutineOutcome,
    ) -> Evaluation {
        let reduction = percent_reduction(before, after, "projected_startup_ms")
            .unwrap_or(0.0)
            .max(0.0);
        let value = |snapshot: &MetricSnapshot, key: &str| {
            snapshot.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
        };
        let new_best = after
            .get("newBest")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut improvements = BTreeMap::new();
        improvements.insert(
            "startup_time_ms".to_string(),
            value(before, "projected_startup_ms") - value(after, "projected_startup_ms"),
        );
        improvements.insert("new_best".to_string(), if new_best { 1.0 } else { 0.0 });

        Evaluation {
            improvements,
            improvement_percentage: reduction,
        }
    }
}
