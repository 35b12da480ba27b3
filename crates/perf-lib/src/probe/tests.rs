//! Probe tests against a mock `/proc` tree
//!
//! These build a fake proc filesystem in a temp directory so parsing and
//! delta computation can be checked without depending on the host.

use super::*;
use std::path::Path;
use tempfile::TempDir;
use tokio::fs;

const MEMINFO: &str = "MemTotal:       16384000 kB
MemFree:         2048000 kB
MemAvailable:    8192000 kB
Buffers:          512000 kB
Cached:          4096000 kB
SwapTotal:       2048000 kB
SwapFree:        1024000 kB
";

const NET_DEV: &str = "Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 9999999     100    0    0    0     0          0         0  9999999     100    0    0    0     0       0          0
  eth0: 1000000    2000    0    0    0     0          0         0   500000    1000    0    0    0     0       0          0
 wlan0:  200000     300    0    0    0     0          0         0   100000     150    0    0    0     0       0          0
";

const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 1
   1: 0A00020F:A1B2 5DB8D822:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 2
   2: 0A00020F:A1B3 5DB8D822:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 3
";

const STATUS: &str = "Name:\tperf-agent
State:\tS (sleeping)
Pid:\t4242
VmPeak:\t  300000 kB
VmSize:\t  250000 kB
VmRSS:\t   51200 kB
Threads:\t7
";

async fn write_stat(root: &Path, user: u64, system: u64, idle: u64) {
    let content = format!(
        "cpu  {} 0 {} {} 0 0 0 0 0 0\ncpu0 {} 0 {} {} 0 0 0 0 0 0\n",
        user, system, idle, user, system, idle
    );
    fs::write(root.join("stat"), content).await.unwrap();
}

async fn write_process_stat(root: &Path, utime: u64, stime: u64) {
    let content = format!(
        "4242 (perf agent) S 1 4242 4242 0 -1 4194304 100 0 0 0 {} {} 0 0 20 0 7 0 100 0 0\n",
        utime, stime
    );
    fs::write(root.join("self/stat"), content).await.unwrap();
}

async fn create_mock_proc() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    fs::create_dir_all(root.join("self")).await.unwrap();
    fs::create_dir_all(root.join("net")).await.unwrap();

    write_stat(root, 1000, 500, 8500).await;
    write_process_stat(root, 10, 5).await;
    fs::write(
        root.join("cpuinfo"),
        "processor\t: 0\ncpu MHz\t\t: 2400.000\n\nprocessor\t: 1\ncpu MHz\t\t: 2600.000\n",
    )
    .await
    .unwrap();
    fs::write(root.join("meminfo"), MEMINFO).await.unwrap();
    fs::write(root.join("net/dev"), NET_DEV).await.unwrap();
    fs::write(root.join("net/tcp"), TCP).await.unwrap();
    fs::write(root.join("self/status"), STATUS).await.unwrap();

    temp_dir
}

#[test]
fn test_parse_proc_stat() {
    let times = parse_proc_stat("cpu  10 2 30 400 5 1 1 0 0 0\ncpu0 10 2 30 400 5 1 1 0 0 0\n").unwrap();
    assert_eq!(times.user, 10);
    assert_eq!(times.nice, 2);
    assert_eq!(times.system, 30);
    assert_eq!(times.idle, 400);
    assert_eq!(times.total(), 449);
    assert_eq!(times.idle_total(), 405);

    assert!(parse_proc_stat("intr 1 2 3\n").is_err());
}

#[test]
fn test_parse_meminfo_converts_kb() {
    let info = parse_meminfo(MEMINFO);
    assert_eq!(info["MemTotal"], 16384000 * 1024);
    assert_eq!(info["SwapFree"], 1024000 * 1024);
}

#[test]
fn test_parse_net_dev() {
    let interfaces = parse_net_dev(NET_DEV);
    assert_eq!(interfaces.len(), 3);

    let (name, eth0) = &interfaces[1];
    assert_eq!(name, "eth0");
    assert_eq!(eth0.rx_bytes, 1000000);
    assert_eq!(eth0.rx_packets, 2000);
    assert_eq!(eth0.tx_bytes, 500000);
    assert_eq!(eth0.tx_packets, 1000);
}

#[test]
fn test_count_tcp_connections_only_established() {
    assert_eq!(count_tcp_connections(TCP), 2);
}

#[test]
fn test_parse_process_status_and_stat() {
    let status = parse_process_status(STATUS);
    assert_eq!(status.name, "perf-agent");
    assert_eq!(status.pid, 4242);
    assert_eq!(status.vm_rss, 51200 * 1024);
    assert_eq!(status.vm_peak, 300000 * 1024);
    assert_eq!(status.threads, 7);

    let ticks = parse_process_stat(
        "4242 (perf agent) S 1 4242 4242 0 -1 4194304 100 0 0 0 25 15 0 0 20 0 7 0\n",
    )
    .unwrap();
    assert_eq!(ticks, 40);
}

#[test]
fn test_parse_cpuinfo() {
    let (cores, mhz) = parse_cpuinfo("processor : 0\ncpu MHz : 2000.0\nprocessor : 1\ncpu MHz : 3000.0\n");
    assert_eq!(cores, 2);
    assert!((mhz - 2500.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_cpu_probe_uses_delta_between_reads() {
    let temp_dir = create_mock_proc().await;
    let probe = CpuProbe::with_proc_path(temp_dir.path());
    probe.initialize().await.unwrap();

    // +300 user, +100 system, +600 idle => 40% busy
    write_stat(temp_dir.path(), 1300, 600, 9100).await;
    write_process_stat(temp_dir.path(), 60, 5).await;

    let usage = probe.sample().await.unwrap();
    assert!((usage.cpu.total_usage - 40.0).abs() < 0.001);
    assert!((usage.cpu.user_usage - 30.0).abs() < 0.001);
    assert!((usage.cpu.system_usage - 10.0).abs() < 0.001);
    assert!((usage.cpu.idle_usage - 60.0).abs() < 0.001);
    assert!((usage.process.cpu_usage - 5.0).abs() < 0.001);
    assert_eq!(usage.cpu.core_count, 2);
    assert_eq!(usage.process.thread_count, 7);
}

#[tokio::test]
async fn test_memory_probe_sample() {
    let temp_dir = create_mock_proc().await;
    let probe = MemoryProbe::with_proc_path(temp_dir.path());
    probe.initialize().await.unwrap();

    let usage = probe.sample().await.unwrap();
    assert_eq!(usage.memory.total_memory, 16384000 * 1024);
    assert_eq!(usage.memory.used_memory, (16384000 - 8192000) * 1024);
    assert!((usage.memory.usage_percentage - 50.0).abs() < 0.001);
    assert_eq!(usage.memory.swap_used, 1024000 * 1024);
    assert_eq!(usage.process.memory_usage, 51200 * 1024);
}

#[tokio::test]
async fn test_network_probe_excludes_loopback() {
    let temp_dir = create_mock_proc().await;
    let probe = NetworkProbe::with_proc_path(temp_dir.path());
    probe.initialize().await.unwrap();

    let usage = probe.sample().await.unwrap();
    assert_eq!(usage.network.bytes_received, 1200000);
    assert_eq!(usage.network.bytes_sent, 600000);
    assert_eq!(usage.network.packets_received, 2300);
    assert_eq!(usage.network.connection_count, 2);
    assert_eq!(usage.network.latency_ms, 0.0);
}

#[tokio::test]
async fn test_probe_initialize_fails_without_proc() {
    let temp_dir = TempDir::new().unwrap();

    assert!(CpuProbe::with_proc_path(temp_dir.path()).initialize().await.is_err());
    assert!(MemoryProbe::with_proc_path(temp_dir.path()).initialize().await.is_err());
    assert!(NetworkProbe::with_proc_path(temp_dir.path()).initialize().await.is_err());
}

#[tokio::test]
async fn test_mock_probe_script() {
    let mut usage = ResourceUsage::default();
    usage.cpu.total_usage = 12.0;
    let probe = MockProbe::new("mock", &[ResourceType::Cpu]).with_usage(usage);

    let mut queued = ResourceUsage::default();
    queued.cpu.total_usage = 99.0;
    probe.push_sample(queued);
    probe.push_failure("counter vanished");

    assert_eq!(probe.sample().await.unwrap().cpu.total_usage, 99.0);
    assert!(probe.sample().await.is_err());
    assert_eq!(probe.sample().await.unwrap().cpu.total_usage, 12.0);
    assert_eq!(probe.samples_taken(), 3);
}
