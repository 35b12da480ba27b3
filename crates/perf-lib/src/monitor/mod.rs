//! Resource monitors
//!
//! A [`Monitor`] owns a [`ResourceProbe`] and drives it on its own timer:
//! - stores every successful sample in a bounded FIFO history
//! - checks each registered threshold against the new sample
//! - runs an hourly retention cleanup
//! - optionally tracks process memory growth for leak detection
//!
//! Failed ticks are logged into a bounded error ring and skipped. Only a
//! failed `initialize()` moves the monitor into `Error`.

mod leak;

#[cfg(test)]
mod tests;

pub use leak::{LeakDetector, LeakTracker, LeakTrend, DEFAULT_LEAK_THRESHOLD};

use crate::error::{PerfError, Result};
use crate::events::{EventBus, PerformanceEvent};
use crate::models::{ResourceType, ResourceUsage};
use crate::observability::EngineMetrics;
use crate::probe::{self, LatencyConfig, ResourceProbe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Lower bound for every timer period; tokio intervals reject zero
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Monitor lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Stopped,
    Starting,
    Running,
    Paused,
    Error,
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MonitorStatus::Stopped => "stopped",
            MonitorStatus::Starting => "starting",
            MonitorStatus::Running => "running",
            MonitorStatus::Paused => "paused",
            MonitorStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Leak detection settings for memory monitors
#[derive(Debug, Clone)]
pub struct LeakDetectionConfig {
    /// Time between leak-detection ticks (default: 60 seconds)
    pub interval: Duration,
    /// Growth rate in bytes/sec above which a breach is raised
    pub threshold_bytes_per_sec: f64,
}

impl Default for LeakDetectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            threshold_bytes_per_sec: DEFAULT_LEAK_THRESHOLD,
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between collection ticks (default: 5 seconds)
    pub tracking_interval: Duration,
    /// Samples older than this are removed by cleanup (default: 24 hours)
    pub retention: Duration,
    /// Time between retention cleanups (default: 1 hour)
    pub cleanup_interval: Duration,
    /// History capacity (default: 10000)
    pub max_history: usize,
    /// Error ring capacity (default: 100)
    pub max_errors: usize,
    /// Leak detection, memory monitors only
    pub leak_detection: Option<LeakDetectionConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tracking_interval: Duration::from_secs(5),
            retention: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            max_history: 10_000,
            max_errors: 100,
            leak_detection: None,
        }
    }
}

/// Collection counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorStatistics {
    pub total_collections: u64,
    pub successful_collections: u64,
    pub failed_collections: u64,
    /// Percentage of successful ticks, 0 when nothing ran yet
    pub success_rate: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub last_collection_time: Option<DateTime<Utc>>,
    pub uptime_secs: i64,
}

/// Point-in-time description of a monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerStatus {
    pub name: String,
    pub status: MonitorStatus,
    pub supported_types: Vec<ResourceType>,
    pub tracking_interval_ms: u64,
    pub retention_hours: u64,
    pub history_size: usize,
    pub error_count: usize,
    pub thresholds: BTreeMap<ResourceType, f64>,
}

struct MonitorState {
    status: MonitorStatus,
    initialized: bool,
    config: MonitorConfig,
    thresholds: BTreeMap<ResourceType, f64>,
    history: VecDeque<ResourceUsage>,
    errors: VecDeque<String>,
    stats: MonitorStatistics,
    leak: LeakTracker,
    shutdown: Option<broadcast::Sender<()>>,
}

/// Periodic sampler for one probe
pub struct Monitor {
    name: String,
    probe: Arc<dyn ResourceProbe>,
    events: EventBus,
    metrics: EngineMetrics,
    state: Mutex<MonitorState>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("name", &self.name)
            .field("probe", &self.probe.name())
            .field("status", &self.status())
            .finish()
    }
}

impl Monitor {
    /// Create a monitor with default configuration
    pub fn new(name: impl Into<String>, probe: Arc<dyn ResourceProbe>, events: EventBus) -> Self {
        Self::with_config(name, probe, events, MonitorConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        probe: Arc<dyn ResourceProbe>,
        events: EventBus,
        config: MonitorConfig,
    ) -> Self {
        let leak = LeakTracker::new(
            config
                .leak_detection
                .as_ref()
                .map(|l| l.threshold_bytes_per_sec)
                .unwrap_or(DEFAULT_LEAK_THRESHOLD),
        );

        Self {
            name: name.into(),
            probe,
            events,
            metrics: EngineMetrics::new(),
            state: Mutex::new(MonitorState {
                status: MonitorStatus::Stopped,
                initialized: false,
                config,
                thresholds: BTreeMap::new(),
                history: VecDeque::new(),
                errors: VecDeque::new(),
                stats: MonitorStatistics::default(),
                leak,
                shutdown: None,
            }),
        }
    }

    /// CPU monitor on the platform probe
    pub fn cpu(events: EventBus, config: MonitorConfig) -> Self {
        Self::with_config("cpu", Arc::new(probe::CpuProbe::new()), events, config)
    }

    /// Memory monitor on the platform probe, leak detection enabled
    pub fn memory(events: EventBus, mut config: MonitorConfig) -> Self {
        config.leak_detection.get_or_insert_with(LeakDetectionConfig::default);
        Self::with_config("memory", Arc::new(probe::MemoryProbe::new()), events, config)
    }

    /// Network monitor on the platform probe
    pub fn network(events: EventBus, config: MonitorConfig, latency: LatencyConfig) -> Self {
        Self::with_config("network", probe::network_probe(latency), events, config)
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supported_types(&self) -> Vec<ResourceType> {
        self.probe.supported_types().to_vec()
    }

    pub fn status(&self) -> MonitorStatus {
        self.lock().status
    }

    pub fn is_tracking(&self) -> bool {
        self.status() == MonitorStatus::Running
    }

    fn set_status(&self, status: MonitorStatus) {
        let changed = {
            let mut state = self.lock();
            let changed = state.status != status;
            state.status = status;
            changed
        };

        if changed {
            debug!(monitor = %self.name, status = %status, "Monitor status changed");
            self.events.publish(PerformanceEvent::MonitorStatusChanged {
                monitor: self.name.clone(),
                status,
            });
        }
    }

    fn record_error(&self, message: &str) {
        {
            let mut state = self.lock();
            let entry = format!("[{}] {}", Utc::now().format("%Y-%m-%d %H:%M:%S"), message);
            state.errors.push_back(entry);
            while state.errors.len() > state.config.max_errors {
                state.errors.pop_front();
            }
        }
        self.events.error(&self.name, message);
    }

    /// One-time platform setup. Only allowed while `Stopped`.
    pub async fn initialize(&self) -> Result<()> {
        let current = self.status();
        if current != MonitorStatus::Stopped {
            return Err(PerfError::InvalidState {
                component: self.name.clone(),
                status: current.to_string(),
                expected: "stopped",
            });
        }

        self.set_status(MonitorStatus::Starting);

        match self.probe.initialize().await {
            Ok(()) => {
                self.lock().initialized = true;
                self.set_status(MonitorStatus::Stopped);
                info!(monitor = %self.name, probe = %self.probe.name(), "Monitor initialized");
                Ok(())
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(monitor = %self.name, error = %reason, "Monitor initialization failed");
                self.record_error(&format!("initialization failed: {}", reason));
                self.set_status(MonitorStatus::Error);
                Err(PerfError::ProbeUnavailable {
                    component: self.name.clone(),
                    reason,
                })
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Start the collection timer.
    ///
    /// Returns true if the monitor is running afterwards. Starting a running
    /// monitor is a no-op; any status other than `Stopped` is rejected.
    pub fn start_tracking(self: &Arc<Self>) -> bool {
        match self.status() {
            MonitorStatus::Running => return true,
            MonitorStatus::Stopped => {}
            other => {
                debug!(monitor = %self.name, status = %other, "Refusing to start monitor");
                return false;
            }
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.record_error("cannot start tracking outside an async runtime");
            return false;
        };

        self.set_status(MonitorStatus::Starting);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        {
            let mut state = self.lock();
            state.shutdown = Some(shutdown_tx);
            state.stats.start_time = Some(Utc::now());
        }

        handle.spawn(Arc::clone(self).run(shutdown_rx));

        self.set_status(MonitorStatus::Running);
        self.metrics.monitor_started();
        info!(
            monitor = %self.name,
            interval_ms = self.tracking_interval().as_millis() as u64,
            "Monitor tracking started"
        );
        true
    }

    /// Stop the collection timer. An in-flight tick is allowed to finish.
    pub fn stop_tracking(&self) -> bool {
        let (was, shutdown) = {
            let mut state = self.lock();
            (state.status, state.shutdown.take())
        };

        match was {
            MonitorStatus::Stopped => return true,
            MonitorStatus::Error => return false,
            _ => {}
        }

        if let Some(tx) = shutdown {
            let _ = tx.send(());
            self.metrics.monitor_stopped();
        }

        self.set_status(MonitorStatus::Stopped);
        info!(monitor = %self.name, "Monitor tracking stopped");
        true
    }

    pub fn pause(&self) -> bool {
        match self.status() {
            MonitorStatus::Paused => true,
            MonitorStatus::Running => {
                self.set_status(MonitorStatus::Paused);
                true
            }
            _ => false,
        }
    }

    pub fn resume(&self) -> bool {
        match self.status() {
            MonitorStatus::Running => true,
            MonitorStatus::Paused => {
                self.set_status(MonitorStatus::Running);
                true
            }
            _ => false,
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let (period, cleanup_period, leak_period) = {
            let state = self.lock();
            (
                state.config.tracking_interval,
                state.config.cleanup_interval,
                state
                    .config
                    .leak_detection
                    .as_ref()
                    .map(|l| l.interval),
            )
        };

        let period = period.max(MIN_PERIOD);
        let cleanup_period = cleanup_period.max(MIN_PERIOD);
        let leak_period = leak_period.map(|p| p.max(MIN_PERIOD));

        let start = Instant::now();
        let mut ticker = interval_at(start + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup_ticker = interval_at(start + cleanup_period, cleanup_period);
        // Without leak detection this ticker never matters; it only fires hourly
        let leak_every = leak_period.unwrap_or(cleanup_period);
        let mut leak_ticker = interval_at(start + leak_every, leak_every);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.status() != MonitorStatus::Running {
                        continue;
                    }
                    if let Err(e) = self.collect_now().await {
                        debug!(monitor = %self.name, error = %e, "Collection tick failed");
                    }

                    let wanted = self.tracking_interval().max(MIN_PERIOD);
                    if wanted != ticker.period() {
                        ticker = interval_at(Instant::now() + wanted, wanted);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
                _ = cleanup_ticker.tick() => {
                    self.clear_historical_data(None);
                }
                _ = leak_ticker.tick(), if leak_period.is_some() => {
                    if self.status() == MonitorStatus::Running {
                        self.check_for_leak().await;
                    }
                }
                _ = shutdown.recv() => {
                    debug!(monitor = %self.name, "Monitor loop shutting down");
                    break;
                }
            }
        }
    }

    /// Run one collection tick now.
    ///
    /// On success the sample is stored and thresholds are evaluated. On
    /// failure the error is recorded and nothing is stored.
    pub async fn collect_now(&self) -> Result<ResourceUsage> {
        let started = Instant::now();
        let sampled = self.probe.sample().await;
        self.metrics
            .observe_collection_latency(started.elapsed().as_secs_f64());

        let sample = match sampled {
            Ok(sample) => sample,
            Err(e) => {
                let message = format!("collection failed: {:#}", e);
                {
                    let mut state = self.lock();
                    state.stats.total_collections += 1;
                    state.stats.failed_collections += 1;
                }
                self.metrics.inc_collection_errors();
                self.record_error(&message);
                return Err(PerfError::Sample(message));
            }
        };

        let breaches = {
            let mut state = self.lock();
            state.history.push_back(sample.clone());
            while state.history.len() > state.config.max_history {
                state.history.pop_front();
            }
            state.stats.total_collections += 1;
            state.stats.successful_collections += 1;
            state.stats.last_collection_time = Some(sample.timestamp);

            state
                .thresholds
                .iter()
                .filter(|(_, threshold)| **threshold > 0.0)
                .filter_map(|(resource, threshold)| {
                    let value = sample.scalar(*resource);
                    (value > *threshold).then_some((*resource, value, *threshold))
                })
                .collect::<Vec<_>>()
        };

        self.metrics.inc_samples_collected();

        for (resource, value, threshold) in breaches {
            self.metrics.inc_threshold_breaches();
            self.events.publish(PerformanceEvent::ThresholdExceeded {
                source: self.name.clone(),
                resource: Some(resource),
                metric: resource.to_string(),
                value,
                threshold,
            });
        }

        Ok(sample)
    }

    /// One leak-detection tick.
    ///
    /// Samples process memory, compares it with the previous tick and raises
    /// a Memory breach when the growth rate exceeds the leak threshold.
    /// Returns the measured rate in bytes/sec.
    pub async fn check_for_leak(&self) -> Option<f64> {
        let sample = match self.probe.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                self.record_error(&format!("leak check failed: {:#}", e));
                return None;
            }
        };

        let (rate, leaking, threshold) = {
            let mut state = self.lock();
            let rate = state.leak.record(Instant::now(), sample.process.memory_usage)?;
            (rate, state.leak.is_leaking(rate), state.leak.threshold())
        };

        if leaking {
            warn!(
                monitor = %self.name,
                rate_bytes_per_sec = rate,
                threshold = threshold,
                "Process memory growing faster than leak threshold"
            );
            self.metrics.inc_threshold_breaches();
            self.events.publish(PerformanceEvent::ThresholdExceeded {
                source: self.name.clone(),
                resource: Some(ResourceType::Memory),
                metric: "memory_leak_rate".to_string(),
                value: rate,
                threshold,
            });
        }

        Some(rate)
    }

    /// Regression-based verdict over all leak-detection readings so far
    pub fn leak_trend(&self) -> Option<LeakTrend> {
        let (samples, threshold) = {
            let state = self.lock();
            (state.leak.samples(), state.leak.threshold())
        };
        LeakDetector::new(Duration::from_secs(3600), threshold).detect(&samples)
    }

    pub fn set_leak_threshold(&self, bytes_per_sec: f64) {
        self.lock().leak.set_threshold(bytes_per_sec);
    }

    pub fn leak_threshold(&self) -> f64 {
        self.lock().leak.threshold()
    }

    /// Most recent sample, or a zeroed one if nothing was collected yet
    pub fn current_usage(&self) -> ResourceUsage {
        self.lock().history.back().cloned().unwrap_or_default()
    }

    /// Scalar projection of the most recent sample
    pub fn current_value(&self, resource: ResourceType) -> f64 {
        self.current_usage().scalar(resource)
    }

    /// Samples with `from <= timestamp <= to`
    pub fn historical_usage(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<ResourceUsage> {
        self.lock()
            .history
            .iter()
            .filter(|u| u.timestamp >= from && u.timestamp <= to)
            .cloned()
            .collect()
    }

    /// Sample with the largest projection for `resource` in the range
    pub fn peak_usage(
        &self,
        resource: ResourceType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Option<ResourceUsage> {
        self.historical_usage(from, to).into_iter().max_by(|a, b| {
            a.scalar(resource)
                .partial_cmp(&b.scalar(resource))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Mean projection for `resource` in the range
    pub fn average_usage(
        &self,
        resource: ResourceType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Option<f64> {
        let samples = self.historical_usage(from, to);
        if samples.is_empty() {
            return None;
        }
        let sum: f64 = samples.iter().map(|s| s.scalar(resource)).sum();
        Some(sum / samples.len() as f64)
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// Set the alert threshold for a resource type. Zero disables it.
    pub fn set_resource_threshold(&self, resource: ResourceType, threshold: f64) {
        self.lock().thresholds.insert(resource, threshold);
    }

    /// Configured threshold, zero when unset
    pub fn resource_threshold(&self, resource: ResourceType) -> f64 {
        self.lock()
            .thresholds
            .get(&resource)
            .copied()
            .unwrap_or(0.0)
    }

    /// Whether the most recent sample exceeds the threshold for `resource`
    pub fn is_threshold_exceeded(&self, resource: ResourceType) -> bool {
        let threshold = self.resource_threshold(resource);
        threshold > 0.0 && self.current_value(resource) > threshold
    }

    pub fn tracking_interval(&self) -> Duration {
        self.lock().config.tracking_interval
    }

    /// Change the collection interval. A running loop picks it up after its next tick.
    pub fn set_tracking_interval(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            return false;
        }
        self.lock().config.tracking_interval = interval;
        true
    }

    pub fn data_retention(&self) -> Duration {
        self.lock().config.retention
    }

    pub fn set_data_retention(&self, retention: Duration) {
        self.lock().config.retention = retention;
    }

    /// Drop samples older than `older_than` (default: now minus retention).
    /// Returns how many were removed.
    pub fn clear_historical_data(&self, older_than: Option<DateTime<Utc>>) -> usize {
        let removed = {
            let mut state = self.lock();
            let cutoff = older_than.unwrap_or_else(|| {
                let retention = chrono::Duration::from_std(state.config.retention)
                    .unwrap_or_else(|_| chrono::Duration::hours(24));
                Utc::now() - retention
            });
            let before = state.history.len();
            state.history.retain(|u| u.timestamp >= cutoff);
            before - state.history.len()
        };

        if removed > 0 {
            debug!(monitor = %self.name, removed = removed, "Removed expired samples");
        }
        self.events.publish(PerformanceEvent::DataCleanupCompleted {
            source: self.name.clone(),
            removed,
        });
        removed
    }

    /// Stop tracking and clear history, errors and counters. Leaves `Error`.
    pub fn reset(&self) {
        self.stop_tracking();
        {
            let mut state = self.lock();
            state.history.clear();
            state.errors.clear();
            state.stats = MonitorStatistics::default();
            state.leak.clear();
            if let Some(tx) = state.shutdown.take() {
                let _ = tx.send(());
            }
        }
        self.set_status(MonitorStatus::Stopped);
        info!(monitor = %self.name, "Monitor reset");
    }

    /// Timestamped error log, oldest first
    pub fn errors(&self) -> Vec<String> {
        self.lock().errors.iter().cloned().collect()
    }

    pub fn statistics(&self) -> MonitorStatistics {
        let state = self.lock();
        let mut stats = state.stats.clone();
        if stats.total_collections > 0 {
            stats.success_rate =
                stats.successful_collections as f64 / stats.total_collections as f64 * 100.0;
        }
        if let Some(start) = stats.start_time {
            stats.uptime_secs = (Utc::now() - start).num_seconds();
        }
        stats
    }

    pub fn tracker_status(&self) -> TrackerStatus {
        let state = self.lock();
        TrackerStatus {
            name: self.name.clone(),
            status: state.status,
            supported_types: self.probe.supported_types().to_vec(),
            tracking_interval_ms: state.config.tracking_interval.as_millis() as u64,
            retention_hours: state.config.retention.as_secs() / 3600,
            history_size: state.history.len(),
            error_count: state.errors.len(),
            thresholds: state.thresholds.clone(),
        }
    }
}
