//! Metrics collection across monitors
//!
//! The [`MetricsCollector`] fans in the current sample of every registered,
//! tracking [`Monitor`] into one [`PerformanceMetrics`] snapshot per tick.
//! It provides:
//! - a bounded FIFO history with hourly retention cleanup
//! - named custom metric series outside the fixed schema
//! - aggregation and per-field statistics over a time window
//! - optional JSON-lines persistence and JSON export/import

mod aggregate;
mod export;
mod storage;

#[cfg(test)]
mod tests;

pub use aggregate::{aggregate, field_value, AggregationType, MetricStatistics, FIELD_PATHS};
pub use export::{ExportDocument, ExportFormat, EXPORT_VERSION};
pub use storage::{MetricsStore, StorageStrategy};

pub(crate) use storage::write_atomic;

use crate::error::{PerfError, Result};
use crate::events::{EventBus, PerformanceEvent};
use crate::models::{AudioMetrics, PerformanceMetrics, ResourceType, VideoMetrics};
use crate::monitor::Monitor;
use crate::observability::EngineMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMPONENT: &str = "collector";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Entries younger than this are never compressed
const COMPRESSION_MIN_AGE_SECS: i64 = 3600;

/// Collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Time between collection ticks (default: 1 second)
    pub collection_interval: Duration,
    /// Entries older than this are removed by cleanup (default: 24 hours)
    pub retention: Duration,
    /// Time between cleanups (default: 1 hour)
    pub cleanup_interval: Duration,
    /// History capacity (default: 10000)
    pub max_history: usize,
    /// Capacity of each custom metric series (default: 10000)
    pub max_custom_points: usize,
    pub storage_strategy: StorageStrategy,
    /// Directory for file persistence
    pub storage_path: Option<PathBuf>,
    /// Size of the metrics file above which `StorageSpaceLow` is reported
    /// (default: 100 MB)
    pub max_storage_bytes: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(1),
            retention: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            max_history: 10_000,
            max_custom_points: 10_000,
            storage_strategy: StorageStrategy::MemoryOnly,
            storage_path: None,
            max_storage_bytes: 100 * 1024 * 1024,
        }
    }
}

/// One point of a custom metric series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Collection counters and sizes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorStatistics {
    pub running: bool,
    pub registered_monitors: usize,
    pub total_collections: u64,
    pub failed_collections: u64,
    /// Failures since the last successful tick
    pub consecutive_failures: u64,
    pub history_len: usize,
    pub custom_series: usize,
    pub custom_points: usize,
    pub storage_strategy: StorageStrategy,
    pub start_time: Option<DateTime<Utc>>,
    pub last_collection_time: Option<DateTime<Utc>>,
}

struct CollectorState {
    config: CollectorConfig,
    monitors: BTreeMap<String, Arc<Monitor>>,
    history: VecDeque<PerformanceMetrics>,
    custom: BTreeMap<String, VecDeque<CustomMetricPoint>>,
    audio: AudioMetrics,
    video: VideoMetrics,
    stats: CollectorStatistics,
    shutdown: Option<broadcast::Sender<()>>,
}

/// Fan-in of monitor samples into unified snapshots
pub struct MetricsCollector {
    events: EventBus,
    metrics: EngineMetrics,
    state: Mutex<CollectorState>,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MetricsCollector")
            .field("monitors", &state.monitors.keys().collect::<Vec<_>>())
            .field("history_len", &state.history.len())
            .finish()
    }
}

impl MetricsCollector {
    pub fn new(events: EventBus) -> Self {
        Self::with_config(events, CollectorConfig::default())
    }

    pub fn with_config(events: EventBus, config: CollectorConfig) -> Self {
        let stats = CollectorStatistics {
            storage_strategy: config.storage_strategy,
            ..Default::default()
        };

        Self {
            events,
            metrics: EngineMetrics::new(),
            state: Mutex::new(CollectorState {
                config,
                monitors: BTreeMap::new(),
                history: VecDeque::new(),
                custom: BTreeMap::new(),
                audio: AudioMetrics::default(),
                video: VideoMetrics::default(),
                stats,
                shutdown: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a monitor. Names are unique; a duplicate is rejected unchanged.
    pub fn register_monitor(&self, monitor: Arc<Monitor>) -> Result<()> {
        let name = monitor.name().to_string();
        {
            let mut state = self.lock();
            if state.monitors.contains_key(&name) {
                return Err(PerfError::DuplicateName(name));
            }
            state.monitors.insert(name.clone(), monitor);
        }
        debug!(monitor = %name, "Monitor registered with collector");
        Ok(())
    }

    pub fn unregister_monitor(&self, name: &str) -> Result<Arc<Monitor>> {
        let removed = self.lock().monitors.remove(name);
        match removed {
            Some(monitor) => {
                debug!(monitor = %name, "Monitor unregistered from collector");
                Ok(monitor)
            }
            None => Err(PerfError::NotFound(name.to_string())),
        }
    }

    pub fn monitor_names(&self) -> Vec<String> {
        self.lock().monitors.keys().cloned().collect()
    }

    /// Audio and video groups pushed by the media layer; they are copied
    /// into every following snapshot.
    pub fn set_media_metrics(&self, audio: AudioMetrics, video: VideoMetrics) {
        let mut state = self.lock();
        state.audio = audio;
        state.video = video;
    }

    /// Frame rate measured by the render layer; the rest of the video group
    /// is left as the media layer pushed it
    pub fn set_frame_rate(&self, fps: f64) {
        self.lock().video.frame_rate = fps;
    }

    pub fn collection_interval(&self) -> Duration {
        self.lock().config.collection_interval
    }

    pub fn set_collection_interval(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            return false;
        }
        self.lock().config.collection_interval = interval;
        true
    }

    pub fn data_retention(&self) -> Duration {
        self.lock().config.retention
    }

    pub fn set_data_retention(&self, retention: Duration) {
        self.lock().config.retention = retention;
    }

    pub fn storage_strategy(&self) -> StorageStrategy {
        self.lock().config.storage_strategy
    }

    pub fn set_storage_strategy(&self, strategy: StorageStrategy, path: Option<PathBuf>) {
        let mut state = self.lock();
        state.config.storage_strategy = strategy;
        state.config.storage_path = path;
        state.stats.storage_strategy = strategy;
    }

    fn store(&self) -> Option<MetricsStore> {
        let state = self.lock();
        if !state.config.storage_strategy.persists_to_file() {
            return None;
        }
        state.config.storage_path.as_ref().map(MetricsStore::new)
    }

    /// Start the collection and cleanup timers
    pub fn start(self: &Arc<Self>) -> bool {
        if self.is_running() {
            return true;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.events
                .error(COMPONENT, "cannot start collection outside an async runtime");
            return false;
        };

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        {
            let mut state = self.lock();
            state.shutdown = Some(shutdown_tx);
            state.stats.running = true;
            state.stats.start_time = Some(Utc::now());
        }

        handle.spawn(Arc::clone(self).run(shutdown_rx));
        info!(
            interval_ms = self.collection_interval().as_millis() as u64,
            strategy = %self.storage_strategy(),
            "Metrics collection started"
        );
        true
    }

    pub fn stop(&self) -> bool {
        let shutdown = {
            let mut state = self.lock();
            state.stats.running = false;
            state.shutdown.take()
        };

        if let Some(tx) = shutdown {
            let _ = tx.send(());
            info!("Metrics collection stopped");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.lock().stats.running
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if self.store().is_some() {
            if let Err(e) = self.restore_from_storage().await {
                self.report_storage_failure(&e.to_string());
            }
        }

        let (period, cleanup_period) = {
            let state = self.lock();
            (
                state.config.collection_interval.max(Duration::from_millis(1)),
                state.config.cleanup_interval.max(Duration::from_millis(1)),
            )
        };

        let start = Instant::now();
        let mut ticker = interval_at(start + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup_ticker = interval_at(start + cleanup_period, cleanup_period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.collect_current_metrics().await {
                        debug!(error = %e, "Collection tick failed");
                    }
                }
                _ = cleanup_ticker.tick() => {
                    self.cleanup_old_data(None).await;
                }
                _ = shutdown.recv() => {
                    debug!("Collector loop shutting down");
                    break;
                }
            }
        }
    }

    /// Run one collection tick now.
    ///
    /// Reads the current sample of every tracking monitor, appends the
    /// combined snapshot to history and persists it per the storage
    /// strategy. Persistence failures are reported but never undo the append.
    pub async fn collect_current_metrics(&self) -> Result<PerformanceMetrics> {
        let (monitors, audio, video) = {
            let state = self.lock();
            (
                state.monitors.values().cloned().collect::<Vec<_>>(),
                state.audio.clone(),
                state.video.clone(),
            )
        };

        let mut snapshot = PerformanceMetrics::now();
        snapshot.audio = audio;
        snapshot.video = video;

        let mut process_seen = false;
        for monitor in monitors.iter().filter(|m| m.is_tracking()) {
            let usage = monitor.current_usage();
            let types = monitor.supported_types();

            if types.contains(&ResourceType::Cpu) {
                snapshot.system.cpu_usage = usage.cpu.total_usage;
            }
            if types.contains(&ResourceType::Memory) {
                snapshot.system.memory_usage = usage.memory.used_memory as f64 / BYTES_PER_MB;
                snapshot.system.memory_percentage = usage.memory.usage_percentage;
            }
            if types.contains(&ResourceType::Disk) {
                snapshot.system.disk_usage = usage.disk.usage_percentage;
            }
            if types.contains(&ResourceType::Network) {
                let net = &mut snapshot.network;
                net.latency = usage.network.latency_ms;
                net.receive_speed = usage.network.receive_speed;
                net.send_speed = usage.network.send_speed;
                net.bandwidth = usage.network.receive_speed + usage.network.send_speed;
                net.connection_count = usage.network.connection_count;
                net.connection_quality = connection_quality(usage.network.latency_ms);
            }
            if types.contains(&ResourceType::Process) && !process_seen {
                snapshot.system.thread_count = usage.process.thread_count;
                process_seen = true;
            }
        }

        if !snapshot.is_valid() {
            let message = "collected snapshot has out-of-range values".to_string();
            {
                let mut state = self.lock();
                state.stats.total_collections += 1;
                state.stats.failed_collections += 1;
                state.stats.consecutive_failures += 1;
            }
            self.metrics.inc_collection_errors();
            self.events.error(COMPONENT, &message);
            return Err(PerfError::Sample(message));
        }

        let (strategy, limit) = {
            let mut state = self.lock();
            state.history.push_back(snapshot.clone());
            while state.history.len() > state.config.max_history {
                state.history.pop_front();
            }
            state.stats.total_collections += 1;
            state.stats.consecutive_failures = 0;
            state.stats.last_collection_time = Some(snapshot.timestamp);
            self.metrics.set_history_len(state.history.len());
            (state.config.storage_strategy, state.config.max_storage_bytes)
        };

        self.events.publish(PerformanceEvent::MetricsUpdated {
            metrics: Box::new(snapshot.clone()),
        });

        self.persist(strategy, &snapshot, limit).await;
        Ok(snapshot)
    }

    async fn persist(&self, strategy: StorageStrategy, snapshot: &PerformanceMetrics, limit: u64) {
        match strategy {
            StorageStrategy::MemoryOnly => {}
            StorageStrategy::Database => {
                self.report_storage_failure("database storage is not available in this build");
            }
            StorageStrategy::File | StorageStrategy::Hybrid => {
                let Some(store) = self.store() else {
                    self.report_storage_failure("no storage path configured");
                    return;
                };

                match store.append(snapshot).await {
                    Ok(size) if limit > 0 && size > limit => {
                        self.events.publish(PerformanceEvent::StorageSpaceLow {
                            used_bytes: size,
                            limit_bytes: limit,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => self.report_storage_failure(&e.to_string()),
                }
            }
        }
    }

    fn report_storage_failure(&self, message: &str) {
        self.metrics.inc_storage_errors();
        self.events.publish(PerformanceEvent::StorageFailed {
            message: message.to_string(),
        });
    }

    /// Load persisted snapshots into the in-memory history
    pub async fn restore_from_storage(&self) -> Result<usize> {
        let Some(store) = self.store() else {
            return Ok(0);
        };

        let loaded = store.load().await?;
        let count = loaded.len();
        self.merge_history(loaded);
        info!(entries = count, path = %store.file_path().display(), "Restored stored metrics");
        Ok(count)
    }

    fn merge_history(&self, entries: Vec<PerformanceMetrics>) {
        let mut state = self.lock();
        let mut merged: Vec<PerformanceMetrics> = state.history.drain(..).collect();
        merged.extend(entries);
        merged.sort_by_key(|m| m.timestamp);
        merged.dedup_by(|a, b| a == b);

        let cap = state.config.max_history;
        let skip = merged.len().saturating_sub(cap);
        state.history = merged.into_iter().skip(skip).collect();
        self.metrics.set_history_len(state.history.len());
    }

    /// Remove entries older than `older_than` (default: now minus retention)
    /// from the history and every custom series. Returns how many were removed.
    pub async fn cleanup_old_data(&self, older_than: Option<DateTime<Utc>>) -> usize {
        let (removed, remaining) = {
            let mut state = self.lock();
            let cutoff = older_than.unwrap_or_else(|| {
                let retention = chrono::Duration::from_std(state.config.retention)
                    .unwrap_or_else(|_| chrono::Duration::hours(24));
                Utc::now() - retention
            });

            let before = state.history.len();
            state.history.retain(|m| m.timestamp >= cutoff);
            let mut removed = before - state.history.len();

            for series in state.custom.values_mut() {
                let before = series.len();
                series.retain(|p| p.timestamp >= cutoff);
                removed += before - series.len();
            }
            state.custom.retain(|_, series| !series.is_empty());

            self.metrics.set_history_len(state.history.len());
            (removed, state.history.iter().cloned().collect::<Vec<_>>())
        };

        if removed > 0 {
            info!(removed = removed, "Removed expired metrics");
            self.rewrite_store(&remaining).await;
        }

        self.events.publish(PerformanceEvent::DataCleanupCompleted {
            source: COMPONENT.to_string(),
            removed,
        });
        removed
    }

    async fn rewrite_store(&self, entries: &[PerformanceMetrics]) {
        if let Some(store) = self.store() {
            if let Err(e) = store.rewrite(entries).await {
                self.report_storage_failure(&e.to_string());
            }
        }
    }

    /// Thin out entries older than one hour, keeping an evenly spaced
    /// `ratio` fraction of them. Returns how many were dropped.
    pub async fn compress_historical_data(&self, ratio: f64) -> usize {
        if !(ratio > 0.0 && ratio < 1.0) {
            return 0;
        }

        let (dropped, remaining) = {
            let mut state = self.lock();
            let cutoff = Utc::now() - chrono::Duration::seconds(COMPRESSION_MIN_AGE_SECS);
            let old = state.history.iter().take_while(|m| m.timestamp < cutoff).count();
            if old < 2 {
                return 0;
            }

            let keep = ((old as f64 * ratio).ceil() as usize).clamp(1, old);
            let kept_indexes: BTreeSet<usize> = (0..keep).map(|j| j * old / keep).collect();

            let history: Vec<PerformanceMetrics> = state.history.drain(..).collect();
            state.history = history
                .into_iter()
                .enumerate()
                .filter(|(i, _)| *i >= old || kept_indexes.contains(i))
                .map(|(_, m)| m)
                .collect();

            self.metrics.set_history_len(state.history.len());
            (old - keep, state.history.iter().cloned().collect::<Vec<_>>())
        };

        debug!(dropped = dropped, ratio = ratio, "Compressed historical metrics");
        self.rewrite_store(&remaining).await;
        dropped
    }

    pub fn get_latest_metrics(&self) -> Option<PerformanceMetrics> {
        self.lock().history.back().cloned()
    }

    /// Snapshots with `from <= timestamp <= to`
    pub fn get_historical_metrics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<PerformanceMetrics> {
        self.lock()
            .history
            .iter()
            .filter(|m| m.timestamp >= from && m.timestamp <= to)
            .cloned()
            .collect()
    }

    /// Reduce the window to one snapshot; `None` when it is empty
    pub fn get_aggregated_metrics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        kind: AggregationType,
    ) -> Option<PerformanceMetrics> {
        aggregate(&self.get_historical_metrics(from, to), kind)
    }

    /// Statistics for a fixed-schema field path (`system.cpuUsage`, ...)
    /// or a custom metric name
    pub fn get_metric_statistics(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MetricStatistics {
        let values: Vec<f64> = if FIELD_PATHS.contains(&name) {
            self.get_historical_metrics(from, to)
                .iter()
                .filter_map(|m| field_value(m, name))
                .collect()
        } else {
            self.get_custom_metric(name, from, to)
                .iter()
                .map(|p| p.value)
                .collect()
        };
        MetricStatistics::from_values(&values)
    }

    /// Record a custom metric value stamped now
    pub fn record_custom_metric(&self, name: &str, value: f64) {
        self.record_custom_metric_at(name, Utc::now(), value);
    }

    pub fn record_custom_metric_at(&self, name: &str, timestamp: DateTime<Utc>, value: f64) {
        let mut state = self.lock();
        let cap = state.config.max_custom_points;
        let series = state.custom.entry(name.to_string()).or_default();
        series.push_back(CustomMetricPoint { timestamp, value });
        while series.len() > cap {
            series.pop_front();
        }
    }

    pub fn get_custom_metric(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<CustomMetricPoint> {
        self.lock()
            .custom
            .get(name)
            .map(|series| {
                series
                    .iter()
                    .filter(|p| p.timestamp >= from && p.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn custom_metric_names(&self) -> Vec<String> {
        self.lock().custom.keys().cloned().collect()
    }

    pub fn statistics(&self) -> CollectorStatistics {
        let state = self.lock();
        CollectorStatistics {
            registered_monitors: state.monitors.len(),
            history_len: state.history.len(),
            custom_series: state.custom.len(),
            custom_points: state.custom.values().map(VecDeque::len).sum(),
            ..state.stats.clone()
        }
    }

    /// Approximate in-memory footprint in bytes
    pub fn data_size(&self) -> usize {
        let state = self.lock();
        let history: usize = state
            .history
            .iter()
            .map(|m| std::mem::size_of::<PerformanceMetrics>() + m.video.resolution.len())
            .sum();
        let custom: usize = state
            .custom
            .iter()
            .map(|(name, series)| name.len() + series.len() * std::mem::size_of::<CustomMetricPoint>())
            .sum();
        history + custom
    }

    /// History entries plus custom metric points
    pub fn data_count(&self) -> usize {
        let state = self.lock();
        state.history.len() + state.custom.values().map(VecDeque::len).sum::<usize>()
    }

    /// Build an export document for the window
    pub fn export_document(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> ExportDocument {
        let custom = {
            let state = self.lock();
            state
                .custom
                .iter()
                .map(|(name, series)| {
                    let points: Vec<CustomMetricPoint> = series
                        .iter()
                        .filter(|p| p.timestamp >= from && p.timestamp <= to)
                        .cloned()
                        .collect();
                    (name.clone(), points)
                })
                .filter(|(_, points)| !points.is_empty())
                .collect()
        };
        ExportDocument::new(from, to, self.get_historical_metrics(from, to), custom)
    }

    /// Write the window to `path`. Returns the number of snapshots written.
    pub fn export_data(
        &self,
        path: &Path,
        format: ExportFormat,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<usize> {
        let document = self.export_document(from, to);
        let count = document.metrics.len();
        document.write(path, format).map_err(|e| {
            self.events.error(COMPONENT, &e.to_string());
            e
        })?;
        info!(path = %path.display(), entries = count, "Exported metrics");
        Ok(count)
    }

    /// Validate and merge a previously exported document. Returns the number
    /// of snapshots imported. Nothing is merged when validation fails.
    pub fn import_data(&self, path: &Path, format: ExportFormat) -> Result<usize> {
        let document = ExportDocument::read(path, format).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Import rejected");
            self.events.error(COMPONENT, &e.to_string());
            e
        })?;

        let count = document.metrics.len();
        self.merge_history(document.metrics);
        for (name, points) in document.custom_metrics {
            for point in points {
                self.record_custom_metric_at(&name, point.timestamp, point.value);
            }
        }

        info!(path = %path.display(), entries = count, "Imported metrics");
        Ok(count)
    }
}

/// Connection quality 0-100 from latency; 500 ms and above scores zero
fn connection_quality(latency_ms: f64) -> f64 {
    (100.0 - latency_ms / 5.0).clamp(0.0, 100.0)
}
