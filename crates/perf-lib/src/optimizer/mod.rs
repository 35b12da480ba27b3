//! Optimizers
//!
//! An [`Optimizer`] drives one [`OptimizationRoutine`] through the common
//! protocol:
//! - rejects runs while disabled or while another run is in progress
//! - captures before/after snapshots around the routine
//! - records results in a bounded history with cumulative statistics
//! - supports cooperative cancellation and periodic auto-optimization
//!
//! The routines ([`MemoryOptimizer`], [`RenderOptimizer`],
//! [`StartupOptimizer`]) map the generic strategy to their own modes.

mod memory;
mod render;
mod result;
mod startup;


pub use memory::{
    MemoryOptimizer, MemoryOptimizerConfig, MemoryReclaimer, MemoryStrategy, ReclaimLevel,
};
pub use render::{
    FrameRateSink, GpuInfo, RenderOptimizer, RenderSettings, RenderStrategy, TextureQuality,
};
pub use result::{MetricSnapshot, OptimizationResult, ResultStatus};
pub use startup::{
    StartupModule, StartupOptimizer, StartupOptimizerConfig, StartupStrategy, StartupTimes,
};

use crate::error::{PerfError, Result};
use crate::events::{EventBus, PerformanceEvent};
use crate::models::{OptimizationStrategy, PerformanceMetrics};
use crate::observability::EngineMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Optimization parameters, opaque to the driver
pub type Parameters = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerStatus {
    Idle,
    Initializing,
    Analyzing,
    Optimizing,
    Running,
    Completed,
    Failed,
    Cancelled,
    Disabled,
}

impl OptimizerStatus {
    pub fn is_busy(&self) -> bool {
        matches!(self, OptimizerStatus::Analyzing | OptimizerStatus::Optimizing)
    }

    fn is_finished(&self) -> bool {
        matches!(
            self,
            OptimizerStatus::Completed | OptimizerStatus::Failed | OptimizerStatus::Cancelled
        )
    }
}

impl fmt::Display for OptimizerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptimizerStatus::Idle => "idle",
            OptimizerStatus::Initializing => "initializing",
            OptimizerStatus::Analyzing => "analyzing",
            OptimizerStatus::Optimizing => "optimizing",
            OptimizerStatus::Running => "running",
            OptimizerStatus::Completed => "completed",
            OptimizerStatus::Failed => "failed",
            OptimizerStatus::Cancelled => "cancelled",
            OptimizerStatus::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// What a routine did, before the driver turns it into a result
#[derive(Debug, Clone, Default)]
pub struct RoutineOutcome {
    /// Human-readable steps that were carried out
    pub actions: Vec<String>,
    pub warnings: Vec<String>,
    /// Step failures; with some actions done the run is Partial
    pub errors: Vec<String>,
    /// Routine-specific figures merged into the result's improvements
    pub details: BTreeMap<String, f64>,
}

/// Improvement figures derived from before/after snapshots
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub improvements: BTreeMap<String, f64>,
    pub improvement_percentage: f64,
}

/// Handle passed to a running routine
pub struct OptimizationContext<'a> {
    optimizer: &'a str,
    events: &'a EventBus,
    cancel: &'a AtomicBool,
    parameters: Parameters,
}

impl OptimizationContext<'_> {
    /// Publish a progress update (0-100)
    pub fn progress(&self, percent: u8, description: impl Into<String>) {
        self.events.publish(PerformanceEvent::OptimizationProgress {
            optimizer: self.optimizer.to_string(),
            percent: percent.min(100),
            description: description.into(),
        });
    }

    /// Routines check this between steps and return early when set
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }
}

/// Strategy-specific part of an optimizer
#[async_trait]
pub trait OptimizationRoutine: Send + Sync {
    /// Short identifier, also the default optimizer name
    fn kind(&self) -> &'static str;

    fn default_parameters(&self) -> Parameters {
        Parameters::new()
    }

    fn validate_parameters(&self, _parameters: &Parameters) -> anyhow::Result<()> {
        Ok(())
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Read-only check of current conditions; must not block
    fn should_optimize(&self) -> bool;

    fn suggestions(&self) -> Vec<String>;

    /// Named estimated percentages for a strategy
    fn estimate(&self, strategy: OptimizationStrategy) -> BTreeMap<String, f64>;

    /// Name of the routine's own mode for a generic strategy
    fn mode_name(&self, strategy: OptimizationStrategy) -> &'static str;

    /// Feed of collected snapshots, called by the manager every tick
    fn observe(&self, _metrics: &PerformanceMetrics) {}

    /// Period of [`OptimizationRoutine::sample`], if the routine needs one
    fn sampling_interval(&self) -> Option<Duration> {
        None
    }

    async fn sample(&self) {}

    async fn capture_metrics(&self) -> MetricSnapshot;

    async fn run(
        &self,
        strategy: OptimizationStrategy,
        ctx: &OptimizationContext<'_>,
    ) -> anyhow::Result<RoutineOutcome>;

    fn evaluate(
        &self,
        before: &MetricSnapshot,
        after: &MetricSnapshot,
        outcome: &RoutineOutcome,
    ) -> Evaluation;
}

/// Percentage drop of a numeric snapshot entry, positive when it went down
pub fn percent_reduction(before: &MetricSnapshot, after: &MetricSnapshot, key: &str) -> Option<f64> {
    let b = before.get(key)?.as_f64()?;
    let a = after.get(key)?.as_f64()?;
    (b > 0.0).then(|| (b - a) / b * 100.0)
}

/// Optimizer driver configuration
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Auto-optimization period (default: 5 minutes)
    pub auto_interval: Duration,
    /// Result history capacity (default: 1000)
    pub history_cap: usize,
    /// Results older than this are pruned (default: 24 hours)
    pub history_max_age: Duration,
    /// Time between history prunes (default: 1 hour)
    pub history_cleanup_interval: Duration,
    /// Delay before a finished run returns to Idle (default: 5 seconds)
    pub status_reset_delay: Duration,
    /// Error ring capacity (default: 100)
    pub max_errors: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            auto_interval: Duration::from_secs(300),
            history_cap: 1000,
            history_max_age: Duration::from_secs(24 * 3600),
            history_cleanup_interval: Duration::from_secs(3600),
            status_reset_delay: Duration::from_secs(5),
            max_errors: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerStatistics {
    pub name: String,
    pub enabled: bool,
    pub status: Option<OptimizerStatus>,
    pub total_optimizations: u64,
    pub successful_optimizations: u64,
    pub failed_optimizations: u64,
    pub success_rate: f64,
    pub total_time_ms: u64,
    pub average_time_ms: f64,
    pub total_improvement: f64,
    pub first_optimization: Option<DateTime<Utc>>,
    pub last_optimization: Option<DateTime<Utc>>,
    pub auto_optimization: bool,
    pub auto_interval_ms: u64,
}

struct OptimizerState {
    status: OptimizerStatus,
    enabled: bool,
    initialized: bool,
    auto_enabled: bool,
    config: OptimizerConfig,
    parameters: Parameters,
    last_result: Option<OptimizationResult>,
    history: VecDeque<OptimizationResult>,
    stats: OptimizerStatistics,
    errors: VecDeque<String>,
    /// Bumped on every run so a stale Idle reset never clobbers a newer run
    run_generation: u64,
    shutdown: Option<broadcast::Sender<()>>,
}

/// Drives one optimization routine
pub struct Optimizer {
    name: String,
    routine: Arc<dyn OptimizationRoutine>,
    events: EventBus,
    metrics: EngineMetrics,
    cancel: AtomicBool,
    state: Arc<Mutex<OptimizerState>>,
}

impl fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimizer")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl Optimizer {
    pub fn new(routine: Arc<dyn OptimizationRoutine>, events: EventBus) -> Self {
        let name = routine.kind();
        Self::with_config(name, routine, events, OptimizerConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        routine: Arc<dyn OptimizationRoutine>,
        events: EventBus,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            routine,
            events,
            metrics: EngineMetrics::new(),
            cancel: AtomicBool::new(false),
            state: Arc::new(Mutex::new(OptimizerState {
                status: OptimizerStatus::Idle,
                enabled: true,
                initialized: false,
                auto_enabled: false,
                config,
                parameters: Parameters::new(),
                last_result: None,
                history: VecDeque::new(),
                stats: OptimizerStatistics::default(),
                errors: VecDeque::new(),
                run_generation: 0,
                shutdown: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OptimizerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn routine(&self) -> Arc<dyn OptimizationRoutine> {
        Arc::clone(&self.routine)
    }

    pub fn status(&self) -> OptimizerStatus {
        self.lock().status
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    fn set_status(&self, status: OptimizerStatus) {
        let changed = {
            let mut state = self.lock();
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            self.publish_status(status);
        }
    }

    fn publish_status(&self, status: OptimizerStatus) {
        debug!(optimizer = %self.name, status = %status, "Optimizer status changed");
        self.events.publish(PerformanceEvent::OptimizerStatusChanged {
            optimizer: self.name.clone(),
            status,
        });
    }

    fn record_error(&self, message: &str) {
        {
            let mut state = self.lock();
            state.errors.push_back(message.to_string());
            while state.errors.len() > state.config.max_errors {
                state.errors.pop_front();
            }
        }
        self.events.error(&self.name, message);
    }

    /// One-time setup: fills in default parameters, validates them and
    /// prepares the routine. Returns false and enters `Failed` on error.
    pub async fn initialize(&self) -> bool {
        if self.status().is_busy() {
            return false;
        }
        self.set_status(OptimizerStatus::Initializing);

        let parameters = {
            let mut state = self.lock();
            for (key, value) in self.routine.default_parameters() {
                state.parameters.entry(key).or_insert(value);
            }
            state.parameters.clone()
        };

        let outcome = match self.routine.validate_parameters(&parameters) {
            Ok(()) => self.routine.initialize().await,
            Err(e) => Err(e.context("invalid optimization parameters")),
        };

        match outcome {
            Ok(()) => {
                let enabled = {
                    let mut state = self.lock();
                    state.initialized = true;
                    state.enabled
                };
                self.set_status(if enabled {
                    OptimizerStatus::Idle
                } else {
                    OptimizerStatus::Disabled
                });
                info!(optimizer = %self.name, "Optimizer initialized");
                true
            }
            Err(e) => {
                let message = format!("initialization failed: {:#}", e);
                warn!(optimizer = %self.name, error = %message, "Optimizer initialization failed");
                self.record_error(&message);
                self.set_status(OptimizerStatus::Failed);
                false
            }
        }
    }

    /// Whether conditions currently call for a run. Never mutates state.
    pub fn should_optimize(&self) -> bool {
        self.is_enabled() && self.routine.should_optimize()
    }

    /// Run the routine with `strategy`.
    ///
    /// A disabled optimizer or one with a run in progress returns a
    /// `Failed` result immediately without touching any state.
    pub async fn optimize(&self, strategy: OptimizationStrategy) -> OptimizationResult {
        let (parameters, generation) = {
            let mut state = self.lock();
            if !state.enabled {
                return OptimizationResult::failed("Optimizer is disabled");
            }
            if state.status.is_busy() {
                return OptimizationResult::failed("Optimization already in progress");
            }
            state.run_generation += 1;
            state.status = OptimizerStatus::Analyzing;
            (state.parameters.clone(), state.run_generation)
        };
        self.publish_status(OptimizerStatus::Analyzing);

        let mode = self.routine.mode_name(strategy);
        self.cancel.store(false, Ordering::SeqCst);
        self.events.publish(PerformanceEvent::OptimizationStarted {
            optimizer: self.name.clone(),
            strategy,
        });
        info!(optimizer = %self.name, strategy = %strategy, mode = mode, "Optimization started");

        let started = Instant::now();
        let ctx = OptimizationContext {
            optimizer: &self.name,
            events: &self.events,
            cancel: &self.cancel,
            parameters,
        };

        ctx.progress(0, format!("Analyzing before {} optimization", mode));
        let before = self.routine.capture_metrics().await;

        self.set_status(OptimizerStatus::Optimizing);
        ctx.progress(10, format!("Running {} optimization", mode));
        let outcome = self.routine.run(strategy, &ctx).await;
        let after = self.routine.capture_metrics().await;
        let cancelled = ctx.is_cancelled();

        let mut result = match outcome {
            Ok(outcome) => self.build_result(mode, &before, &after, outcome, cancelled),
            Err(e) => OptimizationResult::failed(format!("{} optimization failed: {:#}", mode, e)),
        };
        result.strategy = Some(strategy);
        result.before_metrics = before;
        result.after_metrics = after;
        result.execution_time_ms = started.elapsed().as_millis() as u64;

        let final_status = if cancelled {
            OptimizerStatus::Cancelled
        } else if result.is_failed() {
            OptimizerStatus::Failed
        } else {
            OptimizerStatus::Completed
        };

        self.record_result(&result);
        self.metrics.record_optimization(
            &self.name,
            result.status,
            started.elapsed().as_secs_f64(),
        );
        // Disabled mid-run stays Disabled
        if self.is_enabled() {
            self.set_status(final_status);
        } else {
            self.set_status(OptimizerStatus::Disabled);
        }

        if cancelled {
            info!(optimizer = %self.name, "Optimization cancelled");
            self.events.publish(PerformanceEvent::OptimizationCancelled {
                optimizer: self.name.clone(),
            });
        } else if result.is_failed() {
            self.record_error(&result.message);
        }

        ctx.progress(100, result.message.clone());
        self.events.publish(PerformanceEvent::OptimizationCompleted {
            optimizer: self.name.clone(),
            result: Box::new(result.clone()),
        });

        self.schedule_idle_reset(generation);
        result
    }

    fn build_result(
        &self,
        mode: &str,
        before: &MetricSnapshot,
        after: &MetricSnapshot,
        outcome: RoutineOutcome,
        cancelled: bool,
    ) -> OptimizationResult {
        let evaluation = self.routine.evaluate(before, after, &outcome);

        let status = if cancelled {
            ResultStatus::Failed
        } else if outcome.errors.is_empty() {
            ResultStatus::Success
        } else if !outcome.actions.is_empty() {
            ResultStatus::Partial
        } else {
            ResultStatus::Failed
        };

        let message = if cancelled {
            format!("{} optimization cancelled", mode)
        } else if outcome.actions.is_empty() {
            format!("{} optimization finished with no actions", mode)
        } else {
            format!("{} optimization: {}", mode, outcome.actions.join(", "))
        };

        let mut result = OptimizationResult::new(status, message);
        result.improvement_percentage = evaluation.improvement_percentage;
        result.improvements = evaluation.improvements;
        result.improvements.extend(outcome.details);
        result.warnings = outcome.warnings;
        result.errors = outcome.errors;
        if cancelled {
            result.errors.push("cancelled before completion".to_string());
        }
        result
    }

    fn record_result(&self, result: &OptimizationResult) {
        let mut state = self.lock();
        let stats = &mut state.stats;
        stats.total_optimizations += 1;
        if result.is_success() {
            stats.successful_optimizations += 1;
        }
        if result.is_failed() {
            stats.failed_optimizations += 1;
        } else {
            stats.total_improvement += result.improvement_percentage;
        }
        stats.total_time_ms += result.execution_time_ms;
        stats.first_optimization.get_or_insert(result.timestamp);
        stats.last_optimization = Some(result.timestamp);

        state.last_result = Some(result.clone());
        state.history.push_back(result.clone());
        while state.history.len() > state.config.history_cap {
            state.history.pop_front();
        }
    }

    /// Return to Idle once the reset delay has passed, unless another run
    /// started in the meantime
    fn schedule_idle_reset(&self, generation: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let name = self.name.clone();
        let delay = self.lock().config.status_reset_delay;

        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let reset = {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                let due = state.run_generation == generation && state.status.is_finished();
                if due {
                    state.status = if state.enabled {
                        OptimizerStatus::Idle
                    } else {
                        OptimizerStatus::Disabled
                    };
                }
                due.then_some(state.status)
            };
            if let Some(status) = reset {
                events.publish(PerformanceEvent::OptimizerStatusChanged {
                    optimizer: name,
                    status,
                });
            }
        });
    }

    /// Ask a running routine to stop at its next check. Returns false when
    /// nothing is running.
    pub fn cancel_optimization(&self) -> bool {
        if !self.can_cancel() {
            return false;
        }
        self.cancel.store(true, Ordering::SeqCst);
        debug!(optimizer = %self.name, "Cancellation requested");
        true
    }

    pub fn can_cancel(&self) -> bool {
        self.status().is_busy()
    }

    pub fn enable(&self) {
        let was_disabled = {
            let mut state = self.lock();
            state.enabled = true;
            state.status == OptimizerStatus::Disabled
        };
        if was_disabled {
            self.set_status(OptimizerStatus::Idle);
        }
    }

    /// Disable the optimizer and its auto runs. A run in progress is asked
    /// to cancel and enters `Disabled` when it finishes.
    pub fn disable(&self) {
        let busy = {
            let mut state = self.lock();
            state.enabled = false;
            state.auto_enabled = false;
            state.status.is_busy()
        };
        if busy {
            self.cancel_optimization();
        } else {
            self.set_status(OptimizerStatus::Disabled);
        }
    }

    pub fn set_auto_optimization(&self, enabled: bool, interval: Option<Duration>) {
        let mut state = self.lock();
        state.auto_enabled = enabled;
        if let Some(interval) = interval.filter(|i| !i.is_zero()) {
            state.config.auto_interval = interval;
        }
    }

    pub fn is_auto_optimization_enabled(&self) -> bool {
        self.lock().auto_enabled
    }

    pub fn auto_interval(&self) -> Duration {
        self.lock().config.auto_interval
    }

    /// Start the background timers: auto-optimization, history pruning and
    /// the routine's own sampler
    pub fn start(self: &Arc<Self>) -> bool {
        if self.lock().shutdown.is_some() {
            return true;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.record_error("cannot start timers outside an async runtime");
            return false;
        };

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        self.lock().shutdown = Some(shutdown_tx);
        handle.spawn(Arc::clone(self).run(shutdown_rx));
        true
    }

    pub fn stop(&self) {
        if let Some(tx) = self.lock().shutdown.take() {
            let _ = tx.send(());
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let min = Duration::from_millis(1);
        let (auto_period, cleanup_period) = {
            let state = self.lock();
            (
                state.config.auto_interval.max(min),
                state.config.history_cleanup_interval.max(min),
            )
        };
        let sample_period = self.routine.sampling_interval().map(|p| p.max(min));

        let start = Instant::now();
        let mut auto_ticker = interval_at(start + auto_period, auto_period);
        auto_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup_ticker = interval_at(start + cleanup_period, cleanup_period);
        let sample_every = sample_period.unwrap_or(cleanup_period);
        let mut sample_ticker = interval_at(start + sample_every, sample_every);
        sample_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = auto_ticker.tick() => {
                    if self.auto_run_due() {
                        debug!(optimizer = %self.name, "Auto-optimization triggered");
                        self.optimize(OptimizationStrategy::Balanced).await;
                    }

                    let wanted = self.auto_interval().max(min);
                    if wanted != auto_ticker.period() {
                        auto_ticker = interval_at(Instant::now() + wanted, wanted);
                        auto_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
                _ = cleanup_ticker.tick() => {
                    self.prune_history(None);
                }
                _ = sample_ticker.tick(), if sample_period.is_some() => {
                    self.routine.sample().await;
                }
                _ = shutdown.recv() => {
                    debug!(optimizer = %self.name, "Optimizer timers shutting down");
                    break;
                }
            }
        }
    }

    fn auto_run_due(&self) -> bool {
        let ready = {
            let state = self.lock();
            state.auto_enabled && state.enabled && !state.status.is_busy()
        };
        ready && self.routine.should_optimize()
    }

    /// Forward a collected snapshot to the routine
    pub fn observe(&self, metrics: &PerformanceMetrics) {
        self.routine.observe(metrics);
    }

    pub fn get_optimization_suggestions(&self) -> Vec<String> {
        if !self.is_enabled() {
            return vec!["Optimizer is disabled".to_string()];
        }
        self.routine.suggestions()
    }

    pub fn estimate_improvements(&self, strategy: OptimizationStrategy) -> BTreeMap<String, f64> {
        self.routine.estimate(strategy)
    }

    pub fn last_result(&self) -> Option<OptimizationResult> {
        self.lock().last_result.clone()
    }

    /// Results with `from <= timestamp <= to`
    pub fn get_optimization_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<OptimizationResult> {
        self.lock()
            .history
            .iter()
            .filter(|r| r.timestamp >= from && r.timestamp <= to)
            .cloned()
            .collect()
    }

    /// Drop results older than `older_than` (default: now minus max age)
    pub fn prune_history(&self, older_than: Option<DateTime<Utc>>) -> usize {
        let mut state = self.lock();
        let cutoff = older_than.unwrap_or_else(|| {
            let age = chrono::Duration::from_std(state.config.history_max_age)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
            Utc::now() - age
        });
        let before = state.history.len();
        state.history.retain(|r| r.timestamp >= cutoff);
        before - state.history.len()
    }

    pub fn parameters(&self) -> Parameters {
        self.lock().parameters.clone()
    }

    /// Set one parameter; rejected when the resulting set fails validation
    pub fn set_parameter(&self, key: &str, value: Value) -> Result<()> {
        let mut candidate = self.parameters();
        candidate.insert(key.to_string(), value);
        self.routine
            .validate_parameters(&candidate)
            .map_err(|e| PerfError::InvalidConfig(format!("{}: {:#}", self.name, e)))?;
        self.lock().parameters = candidate;
        Ok(())
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock().errors.iter().cloned().collect()
    }

    pub fn statistics(&self) -> OptimizerStatistics {
        let state = self.lock();
        let mut stats = state.stats.clone();
        stats.name = self.name.clone();
        stats.enabled = state.enabled;
        stats.status = Some(state.status);
        stats.auto_optimization = state.auto_enabled;
        stats.auto_interval_ms = state.config.auto_interval.as_millis() as u64;
        if stats.total_optimizations > 0 {
            stats.success_rate =
                stats.successful_optimizations as f64 / stats.total_optimizations as f64 * 100.0;
            stats.average_time_ms = stats.total_time_ms as f64 / stats.total_optimizations as f64;
        }
        stats
    }

    /// Clear history, statistics and errors and return to Idle (or Disabled).
    ///
    /// A run in progress is asked to cancel and keeps its busy status until
    /// it finishes, so no second run can start alongside it.
    pub fn reset(&self) {
        self.cancel_optimization();
        let status = {
            let mut state = self.lock();
            state.history.clear();
            state.last_result = None;
            state.stats = OptimizerStatistics::default();
            state.errors.clear();
            if state.status.is_busy() {
                None
            } else {
                state.run_generation += 1;
                Some(if state.enabled {
                    OptimizerStatus::Idle
                } else {
                    OptimizerStatus::Disabled
                })
            }
        };
        if let Some(status) = status {
            self.set_status(status);
        }
        info!(optimizer = %self.name, "Optimizer reset");
    }
}
