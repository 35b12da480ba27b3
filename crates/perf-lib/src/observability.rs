//! Observability infrastructure for the performance engine
//!
//! Provides:
//! - Prometheus metrics (collection latency, samples, breaches, score, optimizer runs)
//! - Structured JSON logging of engine events with tracing

use crate::events::PerformanceEvent;
use crate::optimizer::ResultStatus;
use prometheus::{
    register_gauge, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, Gauge, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Default histogram buckets for probe latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Buckets for optimization routines, which can scan the filesystem
const OPTIMIZATION_BUCKETS: &[f64] = &[0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    collection_latency_seconds: Histogram,
    samples_collected: IntCounter,
    collection_errors: IntCounter,
    threshold_breaches: IntCounter,
    monitors_running: IntGauge,
    metrics_history_len: IntGauge,
    performance_score: Gauge,
    storage_errors: IntCounter,
    optimizations: IntCounterVec,
    optimization_duration_seconds: HistogramVec,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            collection_latency_seconds: register_histogram!(
                "perf_engine_collection_latency_seconds",
                "Time spent taking one resource sample",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            samples_collected: register_int_counter!(
                "perf_engine_samples_collected_total",
                "Resource samples stored by monitors"
            )
            .expect("Failed to register samples_collected"),

            collection_errors: register_int_counter!(
                "perf_engine_collection_errors_total",
                "Failed monitor collection ticks"
            )
            .expect("Failed to register collection_errors"),

            threshold_breaches: register_int_counter!(
                "perf_engine_threshold_breaches_total",
                "Threshold-exceeded notifications raised"
            )
            .expect("Failed to register threshold_breaches"),

            monitors_running: register_int_gauge!(
                "perf_engine_monitors_running",
                "Monitors currently tracking"
            )
            .expect("Failed to register monitors_running"),

            metrics_history_len: register_int_gauge!(
                "perf_engine_metrics_history_entries",
                "Snapshots held in the collector history"
            )
            .expect("Failed to register metrics_history_len"),

            performance_score: register_gauge!(
                "perf_engine_performance_score",
                "Most recent aggregate performance score (0-100)"
            )
            .expect("Failed to register performance_score"),

            storage_errors: register_int_counter!(
                "perf_engine_storage_errors_total",
                "Failed persistence attempts"
            )
            .expect("Failed to register storage_errors"),

            optimizations: register_int_counter_vec!(
                "perf_engine_optimizations_total",
                "Optimization runs by optimizer and outcome",
                &["optimizer", "status"]
            )
            .expect("Failed to register optimizations"),

            optimization_duration_seconds: register_histogram_vec!(
                "perf_engine_optimization_duration_seconds",
                "Wall time of optimization routines",
                &["optimizer"],
                OPTIMIZATION_BUCKETS.to_vec()
            )
            .expect("Failed to register optimization_duration_seconds"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance. Clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    inner: &'static EngineMetricsInner,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics").finish_non_exhaustive()
    }
}

impl EngineMetrics {
    /// Create a metrics handle (registers global metrics on first call)
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(EngineMetricsInner::new),
        }
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner.collection_latency_seconds.observe(duration_secs);
    }

    pub fn inc_samples_collected(&self) {
        self.inner.samples_collected.inc();
    }

    pub fn inc_collection_errors(&self) {
        self.inner.collection_errors.inc();
    }

    pub fn inc_threshold_breaches(&self) {
        self.inner.threshold_breaches.inc();
    }

    pub fn monitor_started(&self) {
        self.inner.monitors_running.inc();
    }

    pub fn monitor_stopped(&self) {
        self.inner.monitors_running.dec();
    }

    pub fn set_history_len(&self, len: usize) {
        self.inner.metrics_history_len.set(len as i64);
    }

    pub fn set_performance_score(&self, score: u32) {
        self.inner.performance_score.set(score as f64);
    }

    pub fn inc_storage_errors(&self) {
        self.inner.storage_errors.inc();
    }

    /// Record one finished optimization run
    pub fn record_optimization(&self, optimizer: &str, status: ResultStatus, duration_secs: f64) {
        self.inner
            .optimizations
            .with_label_values(&[optimizer, status.as_str()])
            .inc();
        self.inner
            .optimization_duration_seconds
            .with_label_values(&[optimizer])
            .observe(duration_secs);
    }
}

/// Structured logger for engine events
///
/// Turns [`PerformanceEvent`]s into consistent JSON log lines with an
/// `event` field, tagged with the host name.
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Log engine startup
    pub fn log_startup(&self, version: &str, monitors: usize, optimizers: usize) {
        info!(
            event = "engine_started",
            host = %self.host,
            version = %version,
            monitors = monitors,
            optimizers = optimizers,
            "Performance engine started"
        );
    }

    /// Log engine shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            host = %self.host,
            reason = %reason,
            "Performance engine shutting down"
        );
    }

    /// Log one engine event. Per-tick metric updates only go to debug.
    pub fn log_event(&self, event: &PerformanceEvent) {
        match event {
            PerformanceEvent::MetricsUpdated { metrics } => {
                debug!(
                    event = "metrics_updated",
                    host = %self.host,
                    cpu_usage = metrics.system.cpu_usage,
                    memory_mb = metrics.system.memory_usage,
                    latency_ms = metrics.network.latency,
                    frame_rate = metrics.video.frame_rate,
                    "Metrics collected"
                );
            }
            PerformanceEvent::PerformanceLevelChanged { old, new, score } => {
                let degraded = new < old;
                if degraded {
                    warn!(
                        event = "performance_level_changed",
                        host = %self.host,
                        old_level = %old,
                        new_level = %new,
                        score = score,
                        "Performance level dropped"
                    );
                } else {
                    info!(
                        event = "performance_level_changed",
                        host = %self.host,
                        old_level = %old,
                        new_level = %new,
                        score = score,
                        "Performance level improved"
                    );
                }
            }
            PerformanceEvent::ThresholdExceeded {
                source,
                metric,
                value,
                threshold,
                ..
            } => {
                warn!(
                    event = "threshold_exceeded",
                    host = %self.host,
                    source = %source,
                    metric = %metric,
                    value = value,
                    threshold = threshold,
                    "Threshold exceeded"
                );
            }
            PerformanceEvent::OptimizationStarted {
                optimizer,
                strategy,
            } => {
                info!(
                    event = "optimization_started",
                    host = %self.host,
                    optimizer = %optimizer,
                    strategy = %strategy,
                    "Optimization started"
                );
            }
            PerformanceEvent::OptimizationProgress {
                optimizer,
                percent,
                description,
            } => {
                debug!(
                    event = "optimization_progress",
                    host = %self.host,
                    optimizer = %optimizer,
                    percent = percent,
                    description = %description,
                    "Optimization progress"
                );
            }
            PerformanceEvent::OptimizationCompleted { optimizer, result } => {
                info!(
                    event = "optimization_completed",
                    host = %self.host,
                    optimizer = %optimizer,
                    status = %result.status.as_str(),
                    improvement_percent = result.improvement_percentage,
                    execution_ms = result.execution_time_ms,
                    message = %result.message,
                    "Optimization completed"
                );
            }
            PerformanceEvent::OptimizationCancelled { optimizer } => {
                info!(
                    event = "optimization_cancelled",
                    host = %self.host,
                    optimizer = %optimizer,
                    "Optimization cancelled"
                );
            }
            PerformanceEvent::MonitorStatusChanged { monitor, status } => {
                debug!(
                    event = "monitor_status_changed",
                    host = %self.host,
                    monitor = %monitor,
                    status = %status,
                    "Monitor status changed"
                );
            }
            PerformanceEvent::OptimizerStatusChanged { optimizer, status } => {
                debug!(
                    event = "optimizer_status_changed",
                    host = %self.host,
                    optimizer = %optimizer,
                    status = %status,
                    "Optimizer status changed"
                );
            }
            PerformanceEvent::ModuleStatusChanged { status } => {
                info!(
                    event = "module_status_changed",
                    host = %self.host,
                    status = %status,
                    "Module status changed"
                );
            }
            PerformanceEvent::DataCleanupCompleted { source, removed } => {
                debug!(
                    event = "data_cleanup_completed",
                    host = %self.host,
                    source = %source,
                    removed = removed,
                    "Historical data cleaned up"
                );
            }
            PerformanceEvent::StorageFailed { message } => {
                warn!(
                    event = "storage_failed",
                    host = %self.host,
                    error = %message,
                    "Metrics persistence failed, continuing in memory"
                );
            }
            PerformanceEvent::StorageSpaceLow {
                used_bytes,
                limit_bytes,
            } => {
                warn!(
                    event = "storage_space_low",
                    host = %self.host,
                    used_bytes = used_bytes,
                    limit_bytes = limit_bytes,
                    "Metrics storage exceeds configured size"
                );
            }
            PerformanceEvent::ErrorOccurred { component, message } => {
                warn!(
                    event = "component_error",
                    host = %self.host,
                    component = %component,
                    error = %message,
                    "Component reported an error"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_metrics_creation() {
        // Global registry: a second handle must reuse the first registration
        let metrics = EngineMetrics::new();
        let again = EngineMetrics::new();

        metrics.observe_collection_latency(0.001);
        metrics.inc_samples_collected();
        metrics.inc_threshold_breaches();
        metrics.set_performance_score(87);
        again.record_optimization("memory", ResultStatus::Success, 0.2);
        again.set_history_len(10);
    }

    #[test]
    fn test_structured_logger_handles_every_event() {
        let logger = StructuredLogger::new("test-host");
        assert_eq!(logger.host, "test-host");

        logger.log_event(&PerformanceEvent::StorageFailed {
            message: "disk full".to_string(),
        });
        logger.log_event(&PerformanceEvent::DataCleanupCompleted {
            source: "collector".to_string(),
            removed: 4,
        });
    }
}
