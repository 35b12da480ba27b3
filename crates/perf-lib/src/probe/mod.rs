//! Resource probes
//!
//! A probe samples one snapshot of one or more resource types. Monitors own a
//! probe and drive it on a timer. Platform sampling is selected at build time:
//! on Linux the probes read `/proc`, elsewhere they fail `initialize()` with a
//! clear reason so the owning monitor enters `Error`.

mod latency;
mod mock;

#[cfg(target_os = "linux")]
mod procfs;
#[cfg(not(target_os = "linux"))]
mod unsupported;

#[cfg(all(test, target_os = "linux"))]
mod tests;

pub use latency::{measure_latency, LatencyConfig, DEFAULT_LATENCY_TARGETS};
pub use mock::MockProbe;

#[cfg(target_os = "linux")]
pub use procfs::{
    count_tcp_connections, parse_cpuinfo, parse_meminfo, parse_net_dev, parse_proc_stat,
    parse_process_stat, parse_process_status, CpuProbe, CpuTimes, InterfaceCounters,
    MemoryProbe, NetworkProbe, ProcessStatus,
};
#[cfg(not(target_os = "linux"))]
pub use unsupported::{CpuProbe, MemoryProbe, NetworkProbe};

use crate::models::{ResourceType, ResourceUsage};
use anyhow::Result;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Capability interface implemented by every probe
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Resource types this probe fills in
    fn supported_types(&self) -> &[ResourceType];

    /// One-time platform setup (open counters, read static facts, take baselines)
    async fn initialize(&self) -> Result<()>;

    /// Take one bounded sample. Sections the probe does not support stay zeroed.
    async fn sample(&self) -> Result<ResourceUsage>;
}

/// Platform probe for the given resource type, if one exists
pub fn platform_probe(resource: ResourceType) -> Option<Arc<dyn ResourceProbe>> {
    match resource {
        ResourceType::Cpu => Some(Arc::new(CpuProbe::new())),
        ResourceType::Memory => Some(Arc::new(MemoryProbe::new())),
        ResourceType::Network => Some(Arc::new(NetworkProbe::new())),
        _ => None,
    }
}

/// Platform network probe that also measures latency against `latency.targets`
pub fn network_probe(latency: LatencyConfig) -> Arc<dyn ResourceProbe> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(NetworkProbe::new().with_latency(latency))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = latency;
        Arc::new(NetworkProbe::new())
    }
}
