//! Core data models for the performance engine
//!
//! - [`ResourceUsage`]: one point-in-time sample produced by a monitor
//! - [`PerformanceMetrics`]: the unified cross-resource snapshot produced by the collector
//! - [`PerformanceLevel`] and [`OptimizationStrategy`]: policy vocabulary shared by
//!   the manager and the optimizers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of resource a probe or monitor deals with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Cpu,
    Memory,
    Disk,
    Network,
    Process,
    /// Aggregate of CPU, memory, network and disk
    All,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Cpu => "cpu",
            ResourceType::Memory => "memory",
            ResourceType::Disk => "disk",
            ResourceType::Network => "network",
            ResourceType::Process => "process",
            ResourceType::All => "all",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(ResourceType::Cpu),
            "memory" => Ok(ResourceType::Memory),
            "disk" => Ok(ResourceType::Disk),
            "network" => Ok(ResourceType::Network),
            "process" => Ok(ResourceType::Process),
            "all" => Ok(ResourceType::All),
            other => Err(format!("unknown resource type '{}'", other)),
        }
    }
}

/// CPU section of a sample. Percentages are 0-100 across all cores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub total_usage: f64,
    pub user_usage: f64,
    pub system_usage: f64,
    pub idle_usage: f64,
    pub core_count: u32,
    pub frequency_mhz: f64,
    pub temperature: f64,
}

/// Memory section of a sample, sizes in bytes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub total_memory: u64,
    pub used_memory: u64,
    pub free_memory: u64,
    pub cached_memory: u64,
    pub buffer_memory: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub usage_percentage: f64,
}

/// Disk section of a sample, sizes in bytes and speeds in bytes/sec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total_space: u64,
    pub used_space: u64,
    pub free_space: u64,
    pub usage_percentage: f64,
    pub read_speed: f64,
    pub write_speed: f64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Network section of a sample. Speeds are bytes/sec, latency in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkUsage {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub receive_speed: f64,
    pub send_speed: f64,
    pub latency_ms: f64,
    pub connection_count: u32,
}

/// Section describing the engine's own process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessUsage {
    pub pid: u32,
    pub process_name: String,
    pub cpu_usage: f64,
    /// Resident set size in bytes
    pub memory_usage: u64,
    pub virtual_memory: u64,
    pub peak_memory: u64,
    pub thread_count: u32,
    pub handle_count: u32,
    pub start_time: Option<DateTime<Utc>>,
}

/// Point-in-time snapshot of resource usage
///
/// Produced by a monitor on each collection tick and never mutated afterwards.
/// Probes only fill the sections they support; the rest stay zeroed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuUsage,
    pub memory: MemoryUsage,
    pub disk: DiskUsage,
    pub network: NetworkUsage,
    pub process: ProcessUsage,
}

impl ResourceUsage {
    /// Zeroed sample stamped with the current time
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            ..Default::default()
        }
    }

    /// Single representative value used for thresholds, peaks and averages.
    ///
    /// `All` is the unweighted mean of the CPU, memory, network and disk
    /// projections. Network is a raw speed rather than a percentage, so the
    /// mean mixes units.
    pub fn scalar(&self, resource: ResourceType) -> f64 {
        match resource {
            ResourceType::Cpu => self.cpu.total_usage,
            ResourceType::Memory => self.memory.usage_percentage,
            ResourceType::Network => (self.network.receive_speed + self.network.send_speed) / 2.0,
            ResourceType::Disk => self.disk.usage_percentage,
            ResourceType::Process => self.process.cpu_usage,
            ResourceType::All => {
                (self.scalar(ResourceType::Cpu)
                    + self.scalar(ResourceType::Memory)
                    + self.scalar(ResourceType::Network)
                    + self.scalar(ResourceType::Disk))
                    / 4.0
            }
        }
    }
}

/// System group of a [`PerformanceMetrics`] snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    /// CPU usage percentage
    pub cpu_usage: f64,
    /// Memory in use, megabytes
    pub memory_usage: f64,
    /// Memory in use as a percentage of total
    pub memory_percentage: f64,
    pub thread_count: u32,
    /// Disk usage percentage
    pub disk_usage: f64,
}

/// Network group of a [`PerformanceMetrics`] snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    /// Round-trip latency, milliseconds
    pub latency: f64,
    /// Combined receive and send speed, bytes/sec
    pub bandwidth: f64,
    pub receive_speed: f64,
    pub send_speed: f64,
    /// Packet loss percentage
    pub packet_loss: f64,
    pub connection_count: u32,
    /// Connection quality, 0-100
    pub connection_quality: f64,
}

/// Audio group, pushed by the media layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMetrics {
    pub latency: f64,
    pub jitter: f64,
    pub packet_loss: f64,
    pub bitrate: f64,
    pub sample_rate: u32,
}

/// Video group, pushed by the media or render layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetrics {
    pub frame_rate: f64,
    pub resolution: String,
    pub bitrate: f64,
    pub encoding_time: f64,
    pub decoding_time: f64,
}

/// Unified cross-resource snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub network: NetworkMetrics,
    pub audio: AudioMetrics,
    pub video: VideoMetrics,
}

impl PerformanceMetrics {
    /// Empty snapshot stamped with the current time
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            ..Default::default()
        }
    }

    /// A snapshot is valid when it carries a real timestamp and every
    /// percentage field lies within 0-100.
    pub fn is_valid(&self) -> bool {
        if self.timestamp <= DateTime::<Utc>::default() {
            return false;
        }

        let percentages = [
            self.system.cpu_usage,
            self.system.memory_percentage,
            self.system.disk_usage,
            self.network.packet_loss,
            self.network.connection_quality,
            self.audio.packet_loss,
        ];

        percentages
            .iter()
            .all(|p| p.is_finite() && (0.0..=100.0).contains(p))
    }
}

/// Ordinal performance category derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceLevel {
    Critical = 1,
    Poor = 2,
    Fair = 3,
    Good = 4,
    Excellent = 5,
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PerformanceLevel::Critical => "critical",
            PerformanceLevel::Poor => "poor",
            PerformanceLevel::Fair => "fair",
            PerformanceLevel::Good => "good",
            PerformanceLevel::Excellent => "excellent",
        };
        f.write_str(s)
    }
}

/// Generic optimization aggressiveness, mapped by each optimizer to its own modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationStrategy {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptimizationStrategy::Conservative => "conservative",
            OptimizationStrategy::Balanced => "balanced",
            OptimizationStrategy::Aggressive => "aggressive",
        };
        f.write_str(s)
    }
}

impl FromStr for OptimizationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(OptimizationStrategy::Conservative),
            "balanced" => Ok(OptimizationStrategy::Balanced),
            "aggressive" => Ok(OptimizationStrategy::Aggressive),
            other => Err(format!("unknown optimization strategy '{}'", other)),
        }
    }
}
