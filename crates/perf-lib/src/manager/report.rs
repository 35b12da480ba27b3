//! Point-in-time performance report

use crate::models::{OptimizationStrategy, PerformanceLevel, PerformanceMetrics};
use crate::monitor::TrackerStatus;
use crate::optimizer::OptimizerStatistics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub timestamp: DateTime<Utc>,
    pub level: PerformanceLevel,
    pub score: u32,
    /// Latest collected snapshot; zeroed before the first tick
    pub metrics: PerformanceMetrics,
    pub monitors: Vec<TrackerStatus>,
    pub optimizers: Vec<OptimizerStatistics>,
    pub strategy: OptimizationStrategy,
    pub auto_optimization: bool,
}

impl PerformanceReport {
    /// Monitors that are not running
    pub fn inactive_monitors(&self) -> impl Iterator<Item = &TrackerStatus> {
        self.monitors
            .iter()
            .filter(|m| m.status != crate::monitor::MonitorStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub version: String,
    pub running: bool,
    pub paused: bool,
    pub monitor_count: usize,
    pub optimizer_count: usize,
    pub start_time: Option<DateTime<Utc>>,
}
