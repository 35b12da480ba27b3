//! Collector tests with scripted monitors

use super::*;
use crate::models::ResourceUsage;
use crate::probe::MockProbe;
use tempfile::tempdir;
use tokio::sync::broadcast::Receiver;

fn cpu_usage(total: f64) -> ResourceUsage {
    let mut usage = ResourceUsage::now();
    usage.cpu.total_usage = total;
    usage.process.thread_count = 12;
    usage
}

fn memory_usage(used_mb: u64, pct: f64) -> ResourceUsage {
    let mut usage = ResourceUsage::now();
    usage.memory.used_memory = used_mb * 1024 * 1024;
    usage.memory.usage_percentage = pct;
    usage
}

async fn tracking_monitor(
    name: &str,
    types: &[ResourceType],
    usage: ResourceUsage,
    events: &EventBus,
) -> Arc<Monitor> {
    let probe = Arc::new(MockProbe::new(name, types).with_usage(usage));
    let monitor = Arc::new(Monitor::new(name, probe, events.clone()));
    assert!(monitor.start_tracking());
    monitor.collect_now().await.unwrap();
    monitor
}

fn snapshot_at(offset_secs: i64, cpu: f64) -> PerformanceMetrics {
    let mut m = PerformanceMetrics::now();
    m.timestamp += chrono::Duration::seconds(offset_secs);
    m.system.cpu_usage = cpu;
    m
}

fn drain(rx: &mut Receiver<PerformanceEvent>) -> Vec<PerformanceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_one_tick_combines_two_monitors() {
    let events = EventBus::new();
    let collector = MetricsCollector::new(events.clone());

    let cpu = tracking_monitor("CPU", &[ResourceType::Cpu, ResourceType::Process], cpu_usage(35.0), &events).await;
    let memory = tracking_monitor("Memory", &[ResourceType::Memory], memory_usage(1500, 18.0), &events).await;
    collector.register_monitor(cpu.clone()).unwrap();
    collector.register_monitor(memory.clone()).unwrap();

    let mut rx = events.subscribe();
    let snapshot = collector.collect_current_metrics().await.unwrap();

    assert_eq!(collector.statistics().history_len, 1);
    assert_eq!(snapshot.system.cpu_usage, 35.0);
    assert_eq!(snapshot.system.memory_usage, 1500.0);
    assert_eq!(snapshot.system.memory_percentage, 18.0);
    assert_eq!(snapshot.system.thread_count, 12);
    assert_eq!(collector.get_latest_metrics().unwrap(), snapshot);

    let updates = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, PerformanceEvent::MetricsUpdated { .. }))
        .count();
    assert_eq!(updates, 1);

    cpu.stop_tracking();
    memory.stop_tracking();
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let events = EventBus::new();
    let collector = MetricsCollector::new(events.clone());

    let first = tracking_monitor("cpu", &[ResourceType::Cpu], cpu_usage(10.0), &events).await;
    let second = tracking_monitor("cpu", &[ResourceType::Cpu], cpu_usage(90.0), &events).await;

    collector.register_monitor(first.clone()).unwrap();
    let err = collector.register_monitor(second.clone()).unwrap_err();
    assert!(matches!(err, PerfError::DuplicateName(name) if name == "cpu"));

    let snapshot = collector.collect_current_metrics().await.unwrap();
    assert_eq!(snapshot.system.cpu_usage, 10.0);

    assert!(collector.unregister_monitor("cpu").is_ok());
    assert!(matches!(
        collector.unregister_monitor("cpu"),
        Err(PerfError::NotFound(_))
    ));

    first.stop_tracking();
    second.stop_tracking();
}

#[tokio::test]
async fn test_stopped_monitors_are_skipped() {
    let events = EventBus::new();
    let collector = MetricsCollector::new(events.clone());

    let cpu = tracking_monitor("cpu", &[ResourceType::Cpu], cpu_usage(55.0), &events).await;
    cpu.stop_tracking();
    collector.register_monitor(cpu).unwrap();

    let snapshot = collector.collect_current_metrics().await.unwrap();
    assert_eq!(snapshot.system.cpu_usage, 0.0);
}

#[tokio::test]
async fn test_history_cap_and_media_metrics() {
    let config = CollectorConfig {
        max_history: 3,
        ..Default::default()
    };
    let collector = MetricsCollector::with_config(EventBus::new(), config);

    let video = VideoMetrics {
        frame_rate: 29.5,
        resolution: "1920x1080".to_string(),
        ..Default::default()
    };
    let audio = AudioMetrics {
        jitter: 4.0,
        sample_rate: 48000,
        ..Default::default()
    };
    collector.set_media_metrics(audio, video);

    for _ in 0..5 {
        collector.collect_current_metrics().await.unwrap();
    }

    let stats = collector.statistics();
    assert_eq!(stats.history_len, 3);
    assert_eq!(stats.total_collections, 5);

    let latest = collector.get_latest_metrics().unwrap();
    assert_eq!(latest.video.frame_rate, 29.5);
    assert_eq!(latest.video.resolution, "1920x1080");
    assert_eq!(latest.audio.sample_rate, 48000);
}

#[tokio::test]
async fn test_out_of_range_snapshot_is_a_failed_tick() {
    let events = EventBus::new();
    let collector = MetricsCollector::new(events.clone());
    let cpu = tracking_monitor("cpu", &[ResourceType::Cpu], cpu_usage(180.0), &events).await;
    collector.register_monitor(cpu.clone()).unwrap();

    assert!(collector.collect_current_metrics().await.is_err());
    let stats = collector.statistics();
    assert_eq!(stats.failed_collections, 1);
    assert_eq!(stats.consecutive_failures, 1);
    assert_eq!(stats.history_len, 0);

    cpu.stop_tracking();
}

#[tokio::test]
async fn test_single_entry_average_equals_entry() {
    let collector = MetricsCollector::new(EventBus::new());
    let entry = snapshot_at(0, 42.0);
    collector.merge_history(vec![entry.clone()]);

    let from = entry.timestamp - chrono::Duration::seconds(1);
    let to = entry.timestamp + chrono::Duration::seconds(1);
    let avg = collector
        .get_aggregated_metrics(from, to, AggregationType::Average)
        .unwrap();
    assert_eq!(avg, entry);

    let far = to + chrono::Duration::hours(1);
    assert!(collector
        .get_aggregated_metrics(far, far, AggregationType::Average)
        .is_none());
}

#[tokio::test]
async fn test_custom_metrics_and_statistics() {
    let config = CollectorConfig {
        max_custom_points: 4,
        ..Default::default()
    };
    let collector = MetricsCollector::with_config(EventBus::new(), config);
    let now = Utc::now();

    for (i, value) in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0].into_iter().enumerate() {
        collector.record_custom_metric_at("render.queue", now + chrono::Duration::seconds(i as i64), value);
    }

    let from = now - chrono::Duration::seconds(1);
    let to = now + chrono::Duration::seconds(10);
    let series = collector.get_custom_metric("render.queue", from, to);
    assert_eq!(series.len(), 4);
    assert_eq!(series[0].value, 3.0);

    let stats = collector.get_metric_statistics("render.queue", from, to);
    assert_eq!(stats.count, 4);
    assert_eq!(stats.min, 3.0);
    assert_eq!(stats.max, 6.0);

    collector.merge_history(vec![snapshot_at(0, 20.0), snapshot_at(1, 40.0)]);
    let cpu = collector.get_metric_statistics("system.cpuUsage", from, to);
    assert_eq!(cpu.count, 2);
    assert_eq!(cpu.mean, 30.0);

    assert_eq!(collector.custom_metric_names(), vec!["render.queue".to_string()]);
    assert_eq!(collector.data_count(), 6);
    assert!(collector.data_size() > 0);
    assert!(collector
        .get_custom_metric("missing", from, to)
        .is_empty());
}

#[tokio::test]
async fn test_cleanup_removes_history_and_custom_points() {
    let events = EventBus::new();
    let collector = MetricsCollector::new(events.clone());
    let mut rx = events.subscribe();

    collector.merge_history(vec![snapshot_at(-7200, 1.0), snapshot_at(-10, 2.0)]);
    collector.record_custom_metric_at("old", Utc::now() - chrono::Duration::hours(2), 1.0);
    collector.record_custom_metric("fresh", 2.0);

    let removed = collector
        .cleanup_old_data(Some(Utc::now() - chrono::Duration::hours(1)))
        .await;
    assert_eq!(removed, 2);
    assert_eq!(collector.statistics().history_len, 1);
    assert_eq!(collector.custom_metric_names(), vec!["fresh".to_string()]);

    let cleanups: Vec<usize> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PerformanceEvent::DataCleanupCompleted { source, removed } if source == "collector" => {
                Some(removed)
            }
            _ => None,
        })
        .collect();
    assert_eq!(cleanups, vec![2]);
}

#[tokio::test]
async fn test_compress_thins_only_old_entries() {
    let collector = MetricsCollector::new(EventBus::new());
    let mut entries: Vec<PerformanceMetrics> = (0..10)
        .map(|i| snapshot_at(-7200 + i * 60, i as f64))
        .collect();
    entries.push(snapshot_at(-5, 99.0));
    collector.merge_history(entries);

    let dropped = collector.compress_historical_data(0.5).await;
    assert_eq!(dropped, 5);
    assert_eq!(collector.statistics().history_len, 6);

    let latest = collector.get_latest_metrics().unwrap();
    assert_eq!(latest.system.cpu_usage, 99.0);

    assert_eq!(collector.compress_historical_data(1.0).await, 0);
    assert_eq!(collector.compress_historical_data(0.0).await, 0);
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("export.json");

    let source = MetricsCollector::new(EventBus::new());
    let mut first = snapshot_at(-30, 12.345678);
    first.network.latency = 48.125;
    first.video.resolution = "640x360".to_string();
    let mut second = snapshot_at(-20, 87.5);
    second.system.memory_usage = 2048.75;
    second.audio.sample_rate = 44100;
    source.merge_history(vec![first, second]);
    source.record_custom_metric("fps.dropped", 3.0);

    let from = Utc::now() - chrono::Duration::minutes(5);
    let to = Utc::now() + chrono::Duration::minutes(5);
    assert_eq!(source.export_data(&path, ExportFormat::Json, from, to).unwrap(), 2);

    let fresh = MetricsCollector::new(EventBus::new());
    assert_eq!(fresh.import_data(&path, ExportFormat::Json).unwrap(), 2);

    assert_eq!(
        fresh.get_historical_metrics(from, to),
        source.get_historical_metrics(from, to)
    );
    assert_eq!(fresh.get_custom_metric("fps.dropped", from, to).len(), 1);
}

#[tokio::test]
async fn test_import_rejects_invalid_document() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, r#"{"version": 2, "metrics": []}"#).unwrap();

    let collector = MetricsCollector::new(EventBus::new());
    collector.merge_history(vec![snapshot_at(0, 5.0)]);

    assert!(matches!(
        collector.import_data(&path, ExportFormat::Json),
        Err(PerfError::Import(_))
    ));
    assert_eq!(collector.statistics().history_len, 1);
}

#[tokio::test]
async fn test_file_storage_appends_and_reports_size() {
    let dir = tempdir().unwrap();
    let config = CollectorConfig {
        storage_strategy: StorageStrategy::Hybrid,
        storage_path: Some(dir.path().to_path_buf()),
        max_storage_bytes: 10,
        ..Default::default()
    };
    let events = EventBus::new();
    let collector = MetricsCollector::with_config(events.clone(), config);
    let mut rx = events.subscribe();

    collector.collect_current_metrics().await.unwrap();
    collector.collect_current_metrics().await.unwrap();

    let stored = MetricsStore::new(dir.path()).load().await.unwrap();
    assert_eq!(stored.len(), 2);

    let low = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, PerformanceEvent::StorageSpaceLow { .. }))
        .count();
    assert_eq!(low, 2);

    let restored = MetricsCollector::with_config(
        EventBus::new(),
        CollectorConfig {
            storage_strategy: StorageStrategy::File,
            storage_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        },
    );
    assert_eq!(restored.restore_from_storage().await.unwrap(), 2);
    assert_eq!(restored.statistics().history_len, 2);
}

#[tokio::test]
async fn test_unavailable_storage_keeps_memory_history() {
    let events = EventBus::new();
    let collector = MetricsCollector::new(events.clone());
    collector.set_storage_strategy(StorageStrategy::Database, None);
    let mut rx = events.subscribe();

    collector.collect_current_metrics().await.unwrap();
    assert_eq!(collector.statistics().history_len, 1);

    collector.set_storage_strategy(StorageStrategy::File, None);
    collector.collect_current_metrics().await.unwrap();
    assert_eq!(collector.statistics().history_len, 2);

    let failures = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, PerformanceEvent::StorageFailed { .. }))
        .count();
    assert_eq!(failures, 2);
}

#[tokio::test]
async fn test_running_loop_collects() {
    let config = CollectorConfig {
        collection_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let collector = Arc::new(MetricsCollector::with_config(EventBus::new(), config));

    assert!(collector.start());
    assert!(collector.is_running());
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(collector.stop());
    assert!(!collector.is_running());

    // let an in-flight tick finish
    tokio::time::sleep(Duration::from_millis(20)).await;
    let collected = collector.statistics().total_collections;
    assert!(collected > 0);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(collector.statistics().total_collections, collected);
}
