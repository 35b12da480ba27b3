//! Field-by-field reduction of metric snapshots

use crate::models::PerformanceMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reducer applied to every numeric field of a window of snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Average,
    Maximum,
    Minimum,
    Sum,
    /// Number of snapshots in the window, written into every numeric field
    /// (not a per-field count)
    Count,
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregationType::Average => "average",
            AggregationType::Maximum => "maximum",
            AggregationType::Minimum => "minimum",
            AggregationType::Sum => "sum",
            AggregationType::Count => "count",
        };
        f.write_str(s)
    }
}

impl FromStr for AggregationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avg" | "average" | "mean" => Ok(AggregationType::Average),
            "max" | "maximum" => Ok(AggregationType::Maximum),
            "min" | "minimum" => Ok(AggregationType::Minimum),
            "sum" => Ok(AggregationType::Sum),
            "count" => Ok(AggregationType::Count),
            other => Err(format!("unknown aggregation '{}'", other)),
        }
    }
}

trait FromAggregate {
    fn from_aggregate(value: f64) -> Self;
}

impl FromAggregate for f64 {
    fn from_aggregate(value: f64) -> Self {
        value
    }
}

impl FromAggregate for u32 {
    fn from_aggregate(value: f64) -> Self {
        value.round().clamp(0.0, u32::MAX as f64) as u32
    }
}

macro_rules! metric_fields {
    ($($path:literal => $group:ident . $field:ident),* $(,)?) => {
        /// Dotted names of every numeric field, as they appear in exported JSON
        pub const FIELD_PATHS: &[&str] = &[$($path),*];

        /// Read a numeric field by its dotted name
        pub fn field_value(metrics: &PerformanceMetrics, path: &str) -> Option<f64> {
            match path {
                $($path => Some(metrics.$group.$field as f64),)*
                _ => None,
            }
        }

        fn set_field(metrics: &mut PerformanceMetrics, path: &str, value: f64) {
            match path {
                $($path => metrics.$group.$field = FromAggregate::from_aggregate(value),)*
                _ => {}
            }
        }
    };
}

metric_fields! {
    "system.cpuUsage" => system.cpu_usage,
    "system.memoryUsage" => system.memory_usage,
    "system.memoryPercentage" => system.memory_percentage,
    "system.threadCount" => system.thread_count,
    "system.diskUsage" => system.disk_usage,
    "network.latency" => network.latency,
    "network.bandwidth" => network.bandwidth,
    "network.receiveSpeed" => network.receive_speed,
    "network.sendSpeed" => network.send_speed,
    "network.packetLoss" => network.packet_loss,
    "network.connectionCount" => network.connection_count,
    "network.connectionQuality" => network.connection_quality,
    "audio.latency" => audio.latency,
    "audio.jitter" => audio.jitter,
    "audio.packetLoss" => audio.packet_loss,
    "audio.bitrate" => audio.bitrate,
    "audio.sampleRate" => audio.sample_rate,
    "video.frameRate" => video.frame_rate,
    "video.bitrate" => video.bitrate,
    "video.encodingTime" => video.encoding_time,
    "video.decodingTime" => video.decoding_time,
}

/// Reduce a window of snapshots into one.
///
/// The result carries the newest timestamp and resolution of the window.
/// Returns `None` for an empty window.
pub fn aggregate(window: &[PerformanceMetrics], kind: AggregationType) -> Option<PerformanceMetrics> {
    let newest = window.iter().max_by_key(|m| m.timestamp)?;

    let mut out = PerformanceMetrics {
        timestamp: newest.timestamp,
        ..Default::default()
    };
    out.video.resolution = newest.video.resolution.clone();

    let n = window.len() as f64;
    for path in FIELD_PATHS {
        let values = window.iter().filter_map(|m| field_value(m, path));
        let reduced = match kind {
            AggregationType::Average => values.sum::<f64>() / n,
            AggregationType::Maximum => values.fold(f64::NEG_INFINITY, f64::max),
            AggregationType::Minimum => values.fold(f64::INFINITY, f64::min),
            AggregationType::Sum => values.sum(),
            AggregationType::Count => n,
        };
        set_field(&mut out, path, reduced);
    }

    Some(out)
}

/// Summary statistics over a series of values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl MetricStatistics {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            count: values.len(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            std_dev: variance.sqrt(),
        }
    }
}
