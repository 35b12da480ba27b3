//! `/proc` backed probes for Linux
//!
//! Reads:
//! - `/proc/stat` and `/proc/cpuinfo` for CPU usage, core count and clock
//! - `/proc/meminfo` for system memory and swap
//! - `/proc/net/dev` and `/proc/net/tcp{,6}` for interface counters and connections
//! - `/proc/self/status` and `/proc/self/stat` for the engine's own process
//!
//! Usage percentages and speeds are computed from the delta between two
//! consecutive reads, so the first sample after `initialize()` is relative to
//! the baseline taken there.

use super::latency::{measure_latency, LatencyConfig};
use super::ResourceProbe;
use crate::models::{ResourceType, ResourceUsage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tokio::fs;
use tracing::debug;

const CPU_TYPES: &[ResourceType] = &[ResourceType::Cpu, ResourceType::Process];
const MEMORY_TYPES: &[ResourceType] = &[ResourceType::Memory, ResourceType::Process];
const NETWORK_TYPES: &[ResourceType] = &[ResourceType::Network];

/// Aggregate CPU time counters from the `cpu` line of `/proc/stat`, in jiffies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// Parse the aggregate `cpu` line of `/proc/stat`
pub fn parse_proc_stat(content: &str) -> Result<CpuTimes> {
    let line = content
        .lines()
        .find(|l| l.starts_with("cpu "))
        .context("missing aggregate cpu line")?;

    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse().unwrap_or(0))
        .collect();

    if values.len() < 4 {
        anyhow::bail!("aggregate cpu line has only {} fields", values.len());
    }

    let field = |i: usize| values.get(i).copied().unwrap_or(0);

    Ok(CpuTimes {
        user: field(0),
        nice: field(1),
        system: field(2),
        idle: field(3),
        iowait: field(4),
        irq: field(5),
        softirq: field(6),
        steal: field(7),
    })
}

/// Parse `/proc/cpuinfo`
/// Returns (logical processor count, mean clock in MHz)
pub fn parse_cpuinfo(content: &str) -> (u32, f64) {
    let mut cores = 0u32;
    let mut mhz_sum = 0.0;
    let mut mhz_count = 0u32;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "processor" => cores += 1,
            "cpu MHz" => {
                if let Ok(mhz) = value.trim().parse::<f64>() {
                    mhz_sum += mhz;
                    mhz_count += 1;
                }
            }
            _ => {}
        }
    }

    let mhz = if mhz_count > 0 {
        mhz_sum / mhz_count as f64
    } else {
        0.0
    };

    (cores, mhz)
}

/// Parse `/proc/meminfo` into a map of field name to bytes
pub fn parse_meminfo(content: &str) -> HashMap<String, u64> {
    let mut fields = HashMap::new();

    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        let Some(Ok(value)) = parts.next().map(str::parse::<u64>) else {
            continue;
        };
        let bytes = match parts.next() {
            Some("kB") => value * 1024,
            _ => value,
        };
        fields.insert(key.trim().to_string(), bytes);
    }

    fields
}

/// Byte and packet counters for one interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
}

/// Parse `/proc/net/dev`, skipping the two header lines
pub fn parse_net_dev(content: &str) -> Vec<(String, InterfaceCounters)> {
    content
        .lines()
        .skip(2)
        .filter_map(|line| {
            let (name, rest) = line.split_once(':')?;
            let f: Vec<u64> = rest
                .split_whitespace()
                .map(|v| v.parse().unwrap_or(0))
                .collect();
            if f.len() < 10 {
                return None;
            }
            Some((
                name.trim().to_string(),
                InterfaceCounters {
                    rx_bytes: f[0],
                    rx_packets: f[1],
                    tx_bytes: f[8],
                    tx_packets: f[9],
                },
            ))
        })
        .collect()
}

/// Count established sockets (state `01`) in a `/proc/net/tcp` style table
pub fn count_tcp_connections(content: &str) -> u32 {
    content
        .lines()
        .skip(1)
        .filter(|l| l.split_whitespace().nth(3) == Some("01"))
        .count() as u32
}

/// Fields of interest from `/proc/[pid]/status`, sizes in bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessStatus {
    pub name: String,
    pub pid: u32,
    pub vm_rss: u64,
    pub vm_size: u64,
    pub vm_peak: u64,
    pub threads: u32,
}

/// Parse `/proc/[pid]/status`
pub fn parse_process_status(content: &str) -> ProcessStatus {
    let mut status = ProcessStatus::default();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let kb = || {
            value
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
                * 1024
        };
        match key {
            "Name" => status.name = value.to_string(),
            "Pid" => status.pid = value.parse().unwrap_or(0),
            "VmRSS" => status.vm_rss = kb(),
            "VmSize" => status.vm_size = kb(),
            "VmPeak" => status.vm_peak = kb(),
            "Threads" => status.threads = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    status
}

/// Parse `/proc/[pid]/stat`
/// Returns utime + stime in clock ticks
pub fn parse_process_stat(content: &str) -> Result<u64> {
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let (_, rest) = content
        .rsplit_once(')')
        .context("malformed process stat line")?;
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // state is field 3, so utime (14) and stime (15) land at 11 and 12
    let utime: u64 = fields
        .get(11)
        .context("missing utime")?
        .parse()
        .context("invalid utime")?;
    let stime: u64 = fields
        .get(12)
        .context("missing stime")?
        .parse()
        .context("invalid stime")?;

    Ok(utime + stime)
}

async fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn read_process_status(proc_path: &Path) -> Result<ProcessStatus> {
    let content = read_file(&proc_path.join("self/status")).await?;
    Ok(parse_process_status(&content))
}

fn fill_process(usage: &mut ResourceUsage, status: &ProcessStatus) {
    usage.process.pid = status.pid;
    usage.process.process_name = status.name.clone();
    usage.process.memory_usage = status.vm_rss;
    usage.process.virtual_memory = status.vm_size;
    usage.process.peak_memory = status.vm_peak;
    usage.process.thread_count = status.threads;
}

#[derive(Debug, Default)]
struct CpuSampleState {
    previous: Option<CpuTimes>,
    previous_process_ticks: Option<u64>,
    core_count: u32,
    frequency_mhz: f64,
}

/// CPU probe reading `/proc/stat`
pub struct CpuProbe {
    proc_path: PathBuf,
    state: Mutex<CpuSampleState>,
}

impl Default for CpuProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuProbe {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create probe with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            state: Mutex::new(CpuSampleState::default()),
        }
    }

    async fn read_cpu_times(&self) -> Result<CpuTimes> {
        parse_proc_stat(&read_file(&self.proc_path.join("stat")).await?)
    }

    async fn read_process_ticks(&self) -> Result<u64> {
        parse_process_stat(&read_file(&self.proc_path.join("self/stat")).await?)
    }
}

#[async_trait]
impl ResourceProbe for CpuProbe {
    fn name(&self) -> &str {
        "cpu"
    }

    fn supported_types(&self) -> &[ResourceType] {
        CPU_TYPES
    }

    async fn initialize(&self) -> Result<()> {
        let baseline = self.read_cpu_times().await?;

        let (cores, mhz) = match read_file(&self.proc_path.join("cpuinfo")).await {
            Ok(content) => parse_cpuinfo(&content),
            Err(e) => {
                debug!(error = %e, "cpuinfo unavailable, falling back to available parallelism");
                (0, 0.0)
            }
        };
        let cores = if cores == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1)
        } else {
            cores
        };
        let process_ticks = self.read_process_ticks().await.ok();

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.previous = Some(baseline);
        state.previous_process_ticks = process_ticks;
        state.core_count = cores;
        state.frequency_mhz = mhz;

        debug!(cores = cores, mhz = mhz, "CPU probe initialized");
        Ok(())
    }

    async fn sample(&self) -> Result<ResourceUsage> {
        let current = self.read_cpu_times().await?;
        let process_ticks = self.read_process_ticks().await.ok();
        let status = read_process_status(&self.proc_path).await.ok();

        let mut usage = ResourceUsage::now();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

            if let Some(prev) = state.previous.replace(current) {
                let total_delta = current.total().saturating_sub(prev.total());
                if total_delta > 0 {
                    let pct = |delta: u64| delta as f64 / total_delta as f64 * 100.0;
                    let idle = current.idle_total().saturating_sub(prev.idle_total());

                    usage.cpu.idle_usage = pct(idle).clamp(0.0, 100.0);
                    usage.cpu.total_usage = (100.0 - usage.cpu.idle_usage).clamp(0.0, 100.0);
                    usage.cpu.user_usage = pct(
                        (current.user + current.nice).saturating_sub(prev.user + prev.nice),
                    );
                    usage.cpu.system_usage = pct(current.system.saturating_sub(prev.system));

                    // process ticks and jiffies share USER_HZ
                    if let (Some(now), Some(before)) = (process_ticks, state.previous_process_ticks)
                    {
                        usage.process.cpu_usage =
                            pct(now.saturating_sub(before)).clamp(0.0, 100.0);
                    }
                }
            }

            state.previous_process_ticks = process_ticks;
            usage.cpu.core_count = state.core_count;
            usage.cpu.frequency_mhz = state.frequency_mhz;
        }

        if let Some(status) = status {
            fill_process(&mut usage, &status);
        }

        Ok(usage)
    }
}

/// Memory probe reading `/proc/meminfo` and the process status file
pub struct MemoryProbe {
    proc_path: PathBuf,
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create probe with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
        }
    }
}

#[async_trait]
impl ResourceProbe for MemoryProbe {
    fn name(&self) -> &str {
        "memory"
    }

    fn supported_types(&self) -> &[ResourceType] {
        MEMORY_TYPES
    }

    async fn initialize(&self) -> Result<()> {
        let info = parse_meminfo(&read_file(&self.proc_path.join("meminfo")).await?);
        if !info.contains_key("MemTotal") {
            anyhow::bail!("meminfo has no MemTotal field");
        }
        Ok(())
    }

    async fn sample(&self) -> Result<ResourceUsage> {
        let info = parse_meminfo(&read_file(&self.proc_path.join("meminfo")).await?);
        let get = |key: &str| info.get(key).copied().unwrap_or(0);

        let total = get("MemTotal");
        if total == 0 {
            anyhow::bail!("meminfo reports zero MemTotal");
        }
        let free = get("MemFree");
        let cached = get("Cached");
        let buffers = get("Buffers");
        let available = info
            .get("MemAvailable")
            .copied()
            .unwrap_or(free + cached + buffers);
        let used = total.saturating_sub(available);
        let swap_total = get("SwapTotal");

        let mut usage = ResourceUsage::now();
        usage.memory.total_memory = total;
        usage.memory.used_memory = used;
        usage.memory.free_memory = free;
        usage.memory.cached_memory = cached;
        usage.memory.buffer_memory = buffers;
        usage.memory.swap_total = swap_total;
        usage.memory.swap_used = swap_total.saturating_sub(get("SwapFree"));
        usage.memory.usage_percentage = (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0);

        match read_process_status(&self.proc_path).await {
            Ok(status) => fill_process(&mut usage, &status),
            Err(e) => debug!(error = %e, "Process status unavailable"),
        }

        Ok(usage)
    }
}

#[derive(Debug, Default)]
struct NetworkSampleState {
    previous: Option<(InterfaceCounters, Instant)>,
}

/// Network probe reading `/proc/net/dev`, loopback excluded
pub struct NetworkProbe {
    proc_path: PathBuf,
    latency: LatencyConfig,
    state: Mutex<NetworkSampleState>,
}

impl Default for NetworkProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkProbe {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create probe with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            latency: LatencyConfig::default(),
            state: Mutex::new(NetworkSampleState::default()),
        }
    }

    /// Measure latency against the given targets on every sample
    pub fn with_latency(mut self, latency: LatencyConfig) -> Self {
        self.latency = latency;
        self
    }

    async fn read_totals(&self) -> Result<InterfaceCounters> {
        let content = read_file(&self.proc_path.join("net/dev")).await?;
        let totals = parse_net_dev(&content)
            .into_iter()
            .filter(|(name, _)| name != "lo")
            .fold(InterfaceCounters::default(), |acc, (_, c)| InterfaceCounters {
                rx_bytes: acc.rx_bytes + c.rx_bytes,
                rx_packets: acc.rx_packets + c.rx_packets,
                tx_bytes: acc.tx_bytes + c.tx_bytes,
                tx_packets: acc.tx_packets + c.tx_packets,
            });
        Ok(totals)
    }

    async fn connection_count(&self) -> u32 {
        let mut count = 0;
        for table in ["net/tcp", "net/tcp6"] {
            if let Ok(content) = read_file(&self.proc_path.join(table)).await {
                count += count_tcp_connections(&content);
            }
        }
        count
    }
}

#[async_trait]
impl ResourceProbe for NetworkProbe {
    fn name(&self) -> &str {
        "network"
    }

    fn supported_types(&self) -> &[ResourceType] {
        NETWORK_TYPES
    }

    async fn initialize(&self) -> Result<()> {
        let baseline = self.read_totals().await?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.previous = Some((baseline, Instant::now()));
        Ok(())
    }

    async fn sample(&self) -> Result<ResourceUsage> {
        let current = self.read_totals().await?;
        let connections = self.connection_count().await;
        let latency = measure_latency(&self.latency).await;
        let now = Instant::now();

        let mut usage = ResourceUsage::now();
        usage.network.bytes_received = current.rx_bytes;
        usage.network.bytes_sent = current.tx_bytes;
        usage.network.packets_received = current.rx_packets;
        usage.network.packets_sent = current.tx_packets;
        usage.network.connection_count = connections;
        usage.network.latency_ms = latency.unwrap_or(0.0);

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((prev, at)) = state.previous.replace((current, now)) {
                let secs = now.duration_since(at).as_secs_f64();
                if secs > 0.0 {
                    usage.network.receive_speed =
                        current.rx_bytes.saturating_sub(prev.rx_bytes) as f64 / secs;
                    usage.network.send_speed =
                        current.tx_bytes.saturating_sub(prev.tx_bytes) as f64 / secs;
                }
            }
        }

        Ok(usage)
    }
}
