//! Monitor behaviour tests using scripted probes

use super::*;
use crate::probe::MockProbe;
use tokio::sync::broadcast::Receiver;

fn usage_with(cpu: f64, mem_pct: f64, rss: u64) -> ResourceUsage {
    let mut usage = ResourceUsage::default();
    usage.cpu.total_usage = cpu;
    usage.memory.usage_percentage = mem_pct;
    usage.process.memory_usage = rss;
    usage
}

fn mock_monitor(config: MonitorConfig) -> (Arc<Monitor>, Arc<MockProbe>, EventBus) {
    let probe = Arc::new(
        MockProbe::new("mock", &[ResourceType::Cpu, ResourceType::Memory])
            .with_usage(usage_with(10.0, 20.0, 1024)),
    );
    let events = EventBus::new();
    let monitor = Arc::new(Monitor::with_config(
        "mock",
        probe.clone(),
        events.clone(),
        config,
    ));
    (monitor, probe, events)
}

fn drain(rx: &mut Receiver<PerformanceEvent>) -> Vec<PerformanceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn breaches(events: &[PerformanceEvent]) -> Vec<(ResourceType, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            PerformanceEvent::ThresholdExceeded {
                resource: Some(r),
                metric,
                ..
            } => Some((*r, metric.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_history_never_exceeds_cap() {
    let config = MonitorConfig {
        max_history: 5,
        ..Default::default()
    };
    let (monitor, _probe, _events) = mock_monitor(config);

    for _ in 0..8 {
        monitor.collect_now().await.unwrap();
        assert!(monitor.history_len() <= 5);
    }
    assert_eq!(monitor.history_len(), 5);
}

#[tokio::test]
async fn test_start_tracking_is_idempotent() {
    let (monitor, _probe, _events) = mock_monitor(MonitorConfig::default());
    monitor.initialize().await.unwrap();

    assert!(monitor.start_tracking());
    assert_eq!(monitor.status(), MonitorStatus::Running);

    assert!(monitor.start_tracking());
    assert_eq!(monitor.status(), MonitorStatus::Running);

    assert!(monitor.stop_tracking());
    assert_eq!(monitor.status(), MonitorStatus::Stopped);
    assert!(monitor.stop_tracking());
}

#[tokio::test]
async fn test_start_rejected_unless_stopped() {
    let (monitor, _probe, _events) = mock_monitor(MonitorConfig::default());

    assert!(monitor.start_tracking());
    assert!(monitor.pause());
    assert_eq!(monitor.status(), MonitorStatus::Paused);
    assert!(!monitor.start_tracking());

    assert!(monitor.resume());
    assert_eq!(monitor.status(), MonitorStatus::Running);
    monitor.stop_tracking();

    assert!(!monitor.pause());
    assert!(!monitor.resume());
}

#[tokio::test]
async fn test_initialize_failure_enters_error_until_reset() {
    let probe = Arc::new(
        MockProbe::new("broken", &[ResourceType::Cpu]).failing_initialize("no counters"),
    );
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let monitor = Arc::new(Monitor::new("broken", probe, events));

    let err = monitor.initialize().await.unwrap_err();
    assert!(matches!(err, PerfError::ProbeUnavailable { .. }));
    assert_eq!(monitor.status(), MonitorStatus::Error);
    assert!(!monitor.start_tracking());
    assert!(monitor.errors()[0].contains("no counters"));

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, PerformanceEvent::ErrorOccurred { component, .. } if component == "broken")));

    // a second initialize is refused while in Error
    assert!(monitor.initialize().await.is_err());

    monitor.reset();
    assert_eq!(monitor.status(), MonitorStatus::Stopped);
    assert!(monitor.errors().is_empty());
}

#[tokio::test]
async fn test_threshold_breach_once_per_type_per_tick() {
    let (monitor, probe, events) = mock_monitor(MonitorConfig::default());
    let mut rx = events.subscribe();

    monitor.set_resource_threshold(ResourceType::Cpu, 50.0);
    monitor.set_resource_threshold(ResourceType::Memory, 0.0);
    monitor.set_resource_threshold(ResourceType::Disk, 5.0);

    probe.set_usage(usage_with(75.0, 90.0, 0));
    monitor.collect_now().await.unwrap();

    let found = breaches(&drain(&mut rx));
    assert_eq!(found, vec![(ResourceType::Cpu, "cpu".to_string())]);
    assert!(monitor.is_threshold_exceeded(ResourceType::Cpu));
    assert!(!monitor.is_threshold_exceeded(ResourceType::Memory));

    probe.set_usage(usage_with(30.0, 90.0, 0));
    monitor.collect_now().await.unwrap();
    assert!(breaches(&drain(&mut rx)).is_empty());
}

#[tokio::test]
async fn test_failed_tick_is_recorded_and_skipped() {
    let config = MonitorConfig {
        max_errors: 3,
        ..Default::default()
    };
    let (monitor, probe, _events) = mock_monitor(config);
    monitor.start_tracking();

    for i in 0..5 {
        probe.push_failure(format!("read error {}", i));
        assert!(monitor.collect_now().await.is_err());
    }

    assert_eq!(monitor.history_len(), 0);
    assert_eq!(monitor.status(), MonitorStatus::Running);

    let errors = monitor.errors();
    assert_eq!(errors.len(), 3);
    assert!(errors[0].contains("read error 2"));
    assert!(errors[2].starts_with('['));

    let stats = monitor.statistics();
    assert_eq!(stats.failed_collections, 5);
    assert_eq!(stats.success_rate, 0.0);
    monitor.stop_tracking();
}

#[tokio::test]
async fn test_peak_and_average_over_range() {
    let (monitor, probe, _events) = mock_monitor(MonitorConfig::default());
    let from = Utc::now() - chrono::Duration::seconds(1);

    for cpu in [10.0, 70.0, 40.0] {
        probe.push_sample(usage_with(cpu, 0.0, 0));
        monitor.collect_now().await.unwrap();
    }
    let to = Utc::now() + chrono::Duration::seconds(1);

    let peak = monitor.peak_usage(ResourceType::Cpu, from, to).unwrap();
    assert_eq!(peak.cpu.total_usage, 70.0);

    let avg = monitor.average_usage(ResourceType::Cpu, from, to).unwrap();
    assert!((avg - 40.0).abs() < 1e-9);

    assert_eq!(monitor.historical_usage(from, to).len(), 3);
    let future = to + chrono::Duration::hours(1);
    assert!(monitor.average_usage(ResourceType::Cpu, future, future).is_none());
}

#[tokio::test]
async fn test_current_usage_defaults_to_zero() {
    let (monitor, _probe, _events) = mock_monitor(MonitorConfig::default());
    let usage = monitor.current_usage();
    assert_eq!(usage.cpu.total_usage, 0.0);
    assert_eq!(monitor.current_value(ResourceType::All), 0.0);
}

#[tokio::test]
async fn test_clear_historical_data_with_cutoff() {
    let (monitor, _probe, events) = mock_monitor(MonitorConfig::default());
    let mut rx = events.subscribe();

    monitor.collect_now().await.unwrap();
    monitor.collect_now().await.unwrap();

    assert_eq!(monitor.clear_historical_data(None), 0);
    let removed = monitor.clear_historical_data(Some(Utc::now() + chrono::Duration::seconds(1)));
    assert_eq!(removed, 2);
    assert_eq!(monitor.history_len(), 0);

    let cleanups: Vec<usize> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PerformanceEvent::DataCleanupCompleted { removed, .. } => Some(removed),
            _ => None,
        })
        .collect();
    assert_eq!(cleanups, vec![0, 2]);
}

#[tokio::test]
async fn test_leak_ticks_raise_memory_breach() {
    let config = MonitorConfig {
        leak_detection: Some(LeakDetectionConfig {
            interval: Duration::from_secs(60),
            threshold_bytes_per_sec: 1.0,
        }),
        ..Default::default()
    };
    let (monitor, probe, events) = mock_monitor(config);
    let mut rx = events.subscribe();
    assert_eq!(monitor.leak_threshold(), 1.0);

    probe.push_sample(usage_with(0.0, 0.0, 10_000_000));
    probe.push_sample(usage_with(0.0, 0.0, 12_000_000));

    assert!(monitor.check_for_leak().await.is_none());
    tokio::time::sleep(Duration::from_millis(20)).await;
    let rate = monitor.check_for_leak().await.unwrap();
    assert!(rate > 1.0);

    let found = breaches(&drain(&mut rx));
    assert_eq!(
        found,
        vec![(ResourceType::Memory, "memory_leak_rate".to_string())]
    );
}

#[tokio::test]
async fn test_running_loop_collects_and_pause_stops_it() {
    let config = MonitorConfig {
        tracking_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let (monitor, probe, _events) = mock_monitor(config);

    assert!(monitor.start_tracking());
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(probe.samples_taken() > 0);
    assert!(monitor.history_len() > 0);

    monitor.pause();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let paused_len = monitor.history_len();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(monitor.history_len(), paused_len);

    monitor.stop_tracking();
    assert_eq!(monitor.status(), MonitorStatus::Stopped);
}

#[tokio::test]
async fn test_tracker_status_and_interval() {
    let (monitor, _probe, _events) = mock_monitor(MonitorConfig::default());
    monitor.set_resource_threshold(ResourceType::Cpu, 80.0);

    assert!(!monitor.set_tracking_interval(Duration::ZERO));
    assert!(monitor.set_tracking_interval(Duration::from_millis(2500)));

    let status = monitor.tracker_status();
    assert_eq!(status.name, "mock");
    assert_eq!(status.tracking_interval_ms, 2500);
    assert_eq!(status.retention_hours, 24);
    assert_eq!(status.thresholds[&ResourceType::Cpu], 80.0);
    assert_eq!(monitor.resource_threshold(ResourceType::Network), 0.0);
}
