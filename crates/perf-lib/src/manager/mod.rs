//! Performance manager
//!
//! Top-level coordination:
//! - owns the monitor and optimizer registries (unique names)
//! - drives collection on the monitoring timer, then scores the snapshot,
//!   checks thresholds and feeds the optimizers
//! - runs auto-optimization on its own timer, gated by strategy and level
//! - produces read-only reports

mod report;
mod score;

#[cfg(test)]
mod tests;

pub use report::{PerformanceReport, SystemInfo};
pub use score::{
    check_thresholds, level_for_score, performance_score, should_auto_optimize, ThresholdBreach,
};

use crate::collector::MetricsCollector;
use crate::config::{PerformanceConfig, ThresholdConfig};
use crate::error::{PerfError, Result};
use crate::events::{EventBus, PerformanceEvent};
use crate::models::{OptimizationStrategy, PerformanceLevel, PerformanceMetrics};
use crate::monitor::Monitor;
use crate::observability::EngineMetrics;
use crate::optimizer::{OptimizationResult, Optimizer};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const VERSION: &str = "1.0.0";

const COMPONENT: &str = "manager";

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Time between collector retention cleanups
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

struct ManagerState {
    config: PerformanceConfig,
    monitors: BTreeMap<String, Arc<Monitor>>,
    optimizers: BTreeMap<String, Arc<Optimizer>>,
    level: PerformanceLevel,
    score: u32,
    running: bool,
    paused: bool,
    start_time: Option<DateTime<Utc>>,
    shutdown: Option<broadcast::Sender<()>>,
}

pub struct PerformanceManager {
    collector: Arc<MetricsCollector>,
    events: EventBus,
    metrics: EngineMetrics,
    state: Mutex<ManagerState>,
}

impl std::fmt::Debug for PerformanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceManager")
            .field("level", &self.performance_level())
            .field("running", &self.is_running())
            .finish()
    }
}

impl PerformanceManager {
    pub fn new(config: PerformanceConfig, collector: Arc<MetricsCollector>, events: EventBus) -> Self {
        Self {
            collector,
            events,
            metrics: EngineMetrics::new(),
            state: Mutex::new(ManagerState {
                config,
                monitors: BTreeMap::new(),
                optimizers: BTreeMap::new(),
                level: PerformanceLevel::Excellent,
                score: 100,
                running: false,
                paused: false,
                start_time: None,
                shutdown: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn config(&self) -> PerformanceConfig {
        self.lock().config.clone()
    }

    /// Replace the configuration; timers pick up new intervals on next start
    pub fn apply_config(&self, config: PerformanceConfig) {
        self.lock().config = config;
    }

    pub fn set_thresholds(&self, thresholds: ThresholdConfig) {
        self.lock().config.thresholds = thresholds;
    }

    // Registries

    /// Register a monitor with the manager and the collector. A monitor
    /// added while running starts tracking immediately.
    pub fn add_monitor(&self, monitor: Arc<Monitor>) -> Result<()> {
        let name = monitor.name().to_string();
        let running = {
            let mut state = self.lock();
            if state.monitors.contains_key(&name) {
                return Err(PerfError::DuplicateName(name));
            }
            state.monitors.insert(name.clone(), Arc::clone(&monitor));
            state.running
        };

        if let Err(e) = self.collector.register_monitor(Arc::clone(&monitor)) {
            self.lock().monitors.remove(&name);
            return Err(e);
        }
        if running {
            monitor.start_tracking();
        }
        debug!(monitor = %name, "Monitor added");
        Ok(())
    }

    pub fn remove_monitor(&self, name: &str) -> Result<Arc<Monitor>> {
        let monitor = self
            .lock()
            .monitors
            .remove(name)
            .ok_or_else(|| PerfError::NotFound(name.to_string()))?;
        monitor.stop_tracking();
        let _ = self.collector.unregister_monitor(name);
        debug!(monitor = %name, "Monitor removed");
        Ok(monitor)
    }

    pub fn monitor(&self, name: &str) -> Option<Arc<Monitor>> {
        self.lock().monitors.get(name).cloned()
    }

    pub fn monitor_names(&self) -> Vec<String> {
        self.lock().monitors.keys().cloned().collect()
    }

    pub fn monitors(&self) -> Vec<Arc<Monitor>> {
        self.lock().monitors.values().cloned().collect()
    }

    pub fn add_optimizer(&self, optimizer: Arc<Optimizer>) -> Result<()> {
        let name = optimizer.name().to_string();
        let running = {
            let mut state = self.lock();
            if state.optimizers.contains_key(&name) {
                return Err(PerfError::DuplicateName(name));
            }
            state.optimizers.insert(name.clone(), Arc::clone(&optimizer));
            state.running
        };
        if running {
            optimizer.start();
        }
        debug!(optimizer = %name, "Optimizer added");
        Ok(())
    }

    pub fn remove_optimizer(&self, name: &str) -> Result<Arc<Optimizer>> {
        let optimizer = self
            .lock()
            .optimizers
            .remove(name)
            .ok_or_else(|| PerfError::NotFound(name.to_string()))?;
        optimizer.stop();
        Ok(optimizer)
    }

    pub fn optimizer(&self, name: &str) -> Option<Arc<Optimizer>> {
        self.lock().optimizers.get(name).cloned()
    }

    pub fn optimizer_names(&self) -> Vec<String> {
        self.lock().optimizers.keys().cloned().collect()
    }

    pub fn optimizers(&self) -> Vec<Arc<Optimizer>> {
        self.lock().optimizers.values().cloned().collect()
    }

    // Policy

    pub fn optimization_strategy(&self) -> OptimizationStrategy {
        self.lock().config.optimization.strategy
    }

    pub fn set_optimization_strategy(&self, strategy: OptimizationStrategy) {
        self.lock().config.optimization.strategy = strategy;
        info!(strategy = %strategy, "Optimization strategy changed");
    }

    pub fn is_auto_optimization_enabled(&self) -> bool {
        self.lock().config.optimization.auto_optimization
    }

    pub fn set_auto_optimization(&self, enabled: bool) {
        self.lock().config.optimization.auto_optimization = enabled;
    }

    pub fn performance_level(&self) -> PerformanceLevel {
        self.lock().level
    }

    pub fn performance_score(&self) -> u32 {
        self.lock().score
    }

    pub fn current_metrics(&self) -> Option<PerformanceMetrics> {
        self.collector.get_latest_metrics()
    }

    pub fn historical_metrics(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<PerformanceMetrics> {
        self.collector.get_historical_metrics(from, to)
    }

    // Lifecycle

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Start every monitor and optimizer, then the monitoring and
    /// auto-optimization timers
    pub fn start(self: &Arc<Self>) -> bool {
        if self.is_running() {
            return true;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.events
                .error(COMPONENT, "cannot start outside an async runtime");
            return false;
        };

        for monitor in self.monitors() {
            if !monitor.start_tracking() {
                warn!(monitor = %monitor.name(), status = %monitor.status(), "Monitor did not start");
            }
        }
        for optimizer in self.optimizers() {
            optimizer.start();
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        {
            let mut state = self.lock();
            state.shutdown = Some(shutdown_tx);
            state.running = true;
            state.paused = false;
            state.start_time = Some(Utc::now());
        }
        handle.spawn(Arc::clone(self).run(shutdown_rx));

        let config = self.config();
        info!(
            interval_ms = config.monitoring.interval_ms,
            auto_optimization = config.optimization.auto_optimization,
            "Performance manager started"
        );
        true
    }

    /// Stop the timers, monitors and optimizer timers. An in-flight tick
    /// finishes on its own.
    pub fn stop(&self) -> bool {
        let shutdown = {
            let mut state = self.lock();
            state.running = false;
            state.paused = false;
            state.shutdown.take()
        };
        let Some(tx) = shutdown else {
            return true;
        };
        let _ = tx.send(());

        for monitor in self.monitors() {
            monitor.stop_tracking();
        }
        for optimizer in self.optimizers() {
            optimizer.stop();
        }
        info!("Performance manager stopped");
        true
    }

    /// Suspend collection without tearing down the timers
    pub fn pause(&self) -> bool {
        {
            let mut state = self.lock();
            if !state.running {
                return false;
            }
            state.paused = true;
        }
        for monitor in self.monitors() {
            monitor.pause();
        }
        true
    }

    pub fn resume(&self) -> bool {
        {
            let mut state = self.lock();
            if !state.running {
                return false;
            }
            state.paused = false;
        }
        for monitor in self.monitors() {
            monitor.resume();
        }
        true
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let (monitor_period, optimize_period) = {
            let state = self.lock();
            (
                Duration::from_millis(state.config.monitoring.interval_ms).max(MIN_PERIOD),
                Duration::from_millis(state.config.optimization.interval_ms).max(MIN_PERIOD),
            )
        };

        let start = Instant::now();
        let mut monitor_ticker = interval_at(start + monitor_period, monitor_period);
        monitor_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut optimize_ticker = interval_at(start + optimize_period, optimize_period);
        optimize_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup_ticker = interval_at(start + CLEANUP_INTERVAL, CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                _ = monitor_ticker.tick() => {
                    if !self.is_paused() {
                        if let Err(e) = self.collect_current_metrics().await {
                            debug!(error = %e, "Monitoring tick failed");
                        }
                    }
                }
                _ = optimize_ticker.tick() => {
                    if !self.is_paused() {
                        self.perform_auto_optimization().await;
                    }
                }
                _ = cleanup_ticker.tick() => {
                    self.collector.cleanup_old_data(None).await;
                }
                _ = shutdown.recv() => {
                    debug!("Manager loop shutting down");
                    break;
                }
            }
        }
    }

    /// One monitoring tick: collect, score, check thresholds and feed the
    /// optimizers
    pub async fn collect_current_metrics(&self) -> Result<PerformanceMetrics> {
        let snapshot = self.collector.collect_current_metrics().await?;

        let score = performance_score(&snapshot);
        let level = level_for_score(score);
        let (old_level, thresholds) = {
            let mut state = self.lock();
            let old = state.level;
            state.level = level;
            state.score = score;
            (old, state.config.thresholds.clone())
        };
        self.metrics.set_performance_score(score);

        if old_level != level {
            info!(old = %old_level, new = %level, score = score, "Performance level changed");
            self.events.publish(PerformanceEvent::PerformanceLevelChanged {
                old: old_level,
                new: level,
                score,
            });
        }

        for breach in check_thresholds(&snapshot, &thresholds) {
            self.metrics.inc_threshold_breaches();
            self.events.publish(PerformanceEvent::ThresholdExceeded {
                source: COMPONENT.to_string(),
                resource: breach.resource,
                metric: breach.metric.to_string(),
                value: breach.value,
                threshold: breach.threshold,
            });
        }

        for optimizer in self.optimizers() {
            optimizer.observe(&snapshot);
        }
        Ok(snapshot)
    }

    /// Run every optimizer that wants to, when auto-optimization is on and
    /// the current level passes the strategy's gate
    pub async fn perform_auto_optimization(&self) -> Vec<OptimizationResult> {
        let (enabled, strategy, level) = {
            let state = self.lock();
            (
                state.config.optimization.auto_optimization,
                state.config.optimization.strategy,
                state.level,
            )
        };
        if !enabled || !should_auto_optimize(strategy, level) {
            return Vec::new();
        }

        let mut results = Vec::new();
        for optimizer in self.optimizers() {
            if optimizer.status().is_busy() || !optimizer.should_optimize() {
                continue;
            }
            debug!(optimizer = %optimizer.name(), level = %level, "Auto-optimizing");
            results.push(optimizer.optimize(strategy).await);
        }
        results
    }

    /// Run one optimizer by name
    pub async fn optimize_now(&self, name: &str, strategy: OptimizationStrategy) -> Result<OptimizationResult> {
        let optimizer = self
            .optimizer(name)
            .ok_or_else(|| PerfError::NotFound(name.to_string()))?;
        Ok(optimizer.optimize(strategy).await)
    }

    pub fn system_info(&self) -> SystemInfo {
        let state = self.lock();
        SystemInfo {
            version: VERSION.to_string(),
            running: state.running,
            paused: state.paused,
            monitor_count: state.monitors.len(),
            optimizer_count: state.optimizers.len(),
            start_time: state.start_time,
        }
    }

    /// Snapshot of score, level, latest metrics and every component status.
    /// Read-only.
    pub fn generate_performance_report(&self) -> PerformanceReport {
        let (level, score, strategy, auto, monitors, optimizers) = {
            let state = self.lock();
            (
                state.level,
                state.score,
                state.config.optimization.strategy,
                state.config.optimization.auto_optimization,
                state.monitors.values().cloned().collect::<Vec<_>>(),
                state.optimizers.values().cloned().collect::<Vec<_>>(),
            )
        };

        PerformanceReport {
            timestamp: Utc::now(),
            level,
            score,
            metrics: self.collector.get_latest_metrics().unwrap_or_default(),
            monitors: monitors.iter().map(|m| m.tracker_status()).collect(),
            optimizers: optimizers.iter().map(|o| o.statistics()).collect(),
            strategy,
            auto_optimization: auto,
        }
    }

    /// Clear collector history and optimizer results, and return the level
    /// to its initial value
    pub async fn reset(&self) {
        self.collector
            .cleanup_old_data(Some(Utc::now() + chrono::Duration::seconds(1)))
            .await;
        for optimizer in self.optimizers() {
            optimizer.reset();
        }
        for monitor in self.monitors() {
            monitor.clear_historical_data(Some(Utc::now() + chrono::Duration::seconds(1)));
        }
        let mut state = self.lock();
        state.level = PerformanceLevel::Excellent;
        state.score = 100;
    }
}
