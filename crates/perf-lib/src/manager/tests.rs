//! Manager tests with scripted monitors and a counting optimizer

use super::*;
use crate::models::{AudioMetrics, ResourceType, ResourceUsage, VideoMetrics};
use crate::optimizer::{
    Evaluation, MetricSnapshot, OptimizationContext, OptimizationRoutine, RoutineOutcome,
};
use crate::probe::MockProbe;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct CountingRoutine {
    runs: AtomicUsize,
    observed: AtomicUsize,
}

#[async_trait]
impl OptimizationRoutine for CountingRoutine {
    fn kind(&self) -> &'static str {
        "counting"
    }

    fn should_optimize(&self) -> bool {
        true
    }

    fn suggestions(&self) -> Vec<String> {
        Vec::new()
    }

    fn estimate(&self, _strategy: OptimizationStrategy) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }

    fn mode_name(&self, _strategy: OptimizationStrategy) -> &'static str {
        "Counting"
    }

    fn observe(&self, _metrics: &PerformanceMetrics) {
        self.observed.fetch_add(1, Ordering::SeqCst);
    }

    async fn capture_metrics(&self) -> MetricSnapshot {
        MetricSnapshot::new()
    }

    async fn run(
        &self,
        _strategy: OptimizationStrategy,
        _ctx: &OptimizationContext<'_>,
    ) -> anyhow::Result<RoutineOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(RoutineOutcome {
            actions: vec!["counted".to_string()],
            ..Default::default()
        })
    }

    fn evaluate(
        &self,
        _before: &MetricSnapshot,
        _after: &MetricSnapshot,
        _outcome: &RoutineOutcome,
    ) -> Evaluation {
        Evaluation::default()
    }
}

fn cpu_usage(total: f64) -> ResourceUsage {
    let mut usage = ResourceUsage::now();
    usage.cpu.total_usage = total;
    usage
}

fn memory_usage(used_mb: u64) -> ResourceUsage {
    let mut usage = ResourceUsage::now();
    usage.memory.used_memory = used_mb * 1024 * 1024;
    usage.memory.usage_percentage = 50.0;
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

/// Manager whose snapshots carry smooth 60 fps video
fn manager(config: PerformanceConfig, events: &EventBus) -> Arc<PerformanceManager> {
    let collector = Arc::new(MetricsCollector::new(events.clone()));
    collector.set_media_metrics(
        AudioMetrics::default(),
        VideoMetrics {
            frame_rate: 60.0,
            ..Default::default()
        },
    );
    Arc::new(PerformanceManager::new(config, collector, events.clone()))
}

fn counting_optimizer(events: &EventBus) -> (Arc<Optimizer>, Arc<CountingRoutine>) {
    let routine = Arc::new(CountingRoutine::default());
    let optimizer = Arc::new(Optimizer::new(routine.clone(), events.clone()));
    (optimizer, routine)
}

#[tokio::test]
async fn test_tick_scores_and_reports_level_change_once() {
    let events = EventBus::new();
    let manager = manager(PerformanceConfig::default(), &events);
    let cpu = tracking_monitor("cpu", &[ResourceType::Cpu], cpu_usage(85.0), &events).await;
    manager.add_monitor(cpu).unwrap();
    let (optimizer, routine) = counting_optimizer(&events);
    manager.add_optimizer(optimizer).unwrap();

    let mut rx = events.subscribe();
    let snapshot = manager.collect_current_metrics().await.unwrap();
    assert_eq!(snapshot.system.cpu_usage, 85.0);
    assert_eq!(manager.performance_score(), 75);
    assert_eq!(manager.performance_level(), PerformanceLevel::Good);
    assert_eq!(routine.observed.load(Ordering::SeqCst), 1);

    manager.collect_current_metrics().await.unwrap();

    let mut level_changes = 0;
    let mut cpu_breaches = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            PerformanceEvent::PerformanceLevelChanged { old, new, score } => {
                assert_eq!(old, PerformanceLevel::Excellent);
                assert_eq!(new, PerformanceLevel::Good);
                assert_eq!(score, 75);
                level_changes += 1;
            }
            PerformanceEvent::ThresholdExceeded {
                metric, threshold, ..
            } if metric == "cpu_usage" => {
                assert_eq!(threshold, 80.0);
                cpu_breaches += 1;
            }
            _ => {}
        }
    }
    assert_eq!(level_changes, 1);
    assert_eq!(cpu_breaches, 2);
}

#[tokio::test]
async fn test_auto_optimization_is_gated_by_strategy() {
    let events = EventBus::new();
    let mut config = PerformanceConfig::default();
    config.optimization.auto_optimization = true;
    let manager = manager(config, &events);

    manager
        .add_monitor(tracking_monitor("cpu", &[ResourceType::Cpu], cpu_usage(85.0), &events).await)
        .unwrap();
    manager
        .add_monitor(
            tracking_monitor("memory", &[ResourceType::Memory], memory_usage(5000), &events).await,
        )
        .unwrap();
    let (optimizer, routine) = counting_optimizer(&events);
    manager.add_optimizer(optimizer).unwrap();

    manager.collect_current_metrics().await.unwrap();
    assert_eq!(manager.performance_score(), 65);
    assert_eq!(manager.performance_level(), PerformanceLevel::Fair);

    // Balanced waits for Poor
    assert!(manager.perform_auto_optimization().await.is_empty());
    assert_eq!(routine.runs.load(Ordering::SeqCst), 0);

    manager.set_optimization_strategy(OptimizationStrategy::Aggressive);
    let results = manager.perform_auto_optimization().await;
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert_eq!(results[0].strategy, Some(OptimizationStrategy::Aggressive));

    manager.set_auto_optimization(false);
    assert!(manager.perform_auto_optimization().await.is_empty());
    assert_eq!(routine.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_registries_enforce_unique_names() {
    let events = EventBus::new();
    let manager = manager(PerformanceConfig::default(), &events);
    let cpu = tracking_monitor("cpu", &[ResourceType::Cpu], cpu_usage(10.0), &events).await;
    manager.add_monitor(cpu.clone()).unwrap();
    assert!(matches!(
        manager.add_monitor(cpu),
        Err(PerfError::DuplicateName(_))
    ));

    let (optimizer, _) = counting_optimizer(&events);
    manager.add_optimizer(optimizer.clone()).unwrap();
    assert!(manager.add_optimizer(optimizer).is_err());
    assert_eq!(manager.optimizer_names(), vec!["counting".to_string()]);

    let removed = manager.remove_monitor("cpu").unwrap();
    assert_eq!(removed.status(), crate::monitor::MonitorStatus::Stopped);
    assert!(manager.collector().monitor_names().is_empty());
    assert!(matches!(
        manager.remove_monitor("cpu"),
        Err(PerfError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_optimize_now_by_name() {
    let events = EventBus::new();
    let manager = manager(PerformanceConfig::default(), &events);
    let (optimizer, routine) = counting_optimizer(&events);
    manager.add_optimizer(optimizer).unwrap();

    let result = manager
        .optimize_now("counting", OptimizationStrategy::Conservative)
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(routine.runs.load(Ordering::SeqCst), 1);

    assert!(matches!(
        manager
            .optimize_now("missing", OptimizationStrategy::Balanced)
            .await,
        Err(PerfError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_report_is_read_only() {
    let events = EventBus::new();
    let manager = manager(PerformanceConfig::default(), &events);
    manager
        .add_monitor(tracking_monitor("cpu", &[ResourceType::Cpu], cpu_usage(30.0), &events).await)
        .unwrap();
    let (optimizer, _) = counting_optimizer(&events);
    manager.add_optimizer(optimizer).unwrap();
    manager.collect_current_metrics().await.unwrap();

    let count = manager.collector().data_count();
    let report = manager.generate_performance_report();
    assert_eq!(manager.collector().data_count(), count);

    assert_eq!(report.score, 100);
    assert_eq!(report.level, PerformanceLevel::Excellent);
    assert_eq!(report.metrics.system.cpu_usage, 30.0);
    assert_eq!(report.monitors.len(), 1);
    assert_eq!(report.monitors[0].name, "cpu");
    assert_eq!(report.optimizers[0].name, "counting");
    assert_eq!(report.strategy, OptimizationStrategy::Balanced);
    assert!(!report.auto_optimization);
    assert_eq!(report.inactive_monitors().count(), 0);

    let info = manager.system_info();
    assert_eq!(info.version, VERSION);
    assert_eq!(info.monitor_count, 1);
    assert_eq!(info.optimizer_count, 1);
    assert!(!info.running);
}

#[tokio::test]
async fn test_start_pause_stop() {
    let events = EventBus::new();
    let mut config = PerformanceConfig::default();
    config.monitoring.interval_ms = 20;
    let manager = manager(config, &events);

    let probe = Arc::new(MockProbe::new("cpu", &[ResourceType::Cpu]).with_usage(cpu_usage(10.0)));
    let monitor = Arc::new(Monitor::new("cpu", probe, events.clone()));
    monitor.initialize().await.unwrap();
    manager.add_monitor(monitor.clone()).unwrap();

    assert!(manager.start());
    assert!(manager.is_running());
    assert!(monitor.is_tracking());
    monitor.collect_now().await.unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(manager.collector().data_count() >= 2);

    assert!(manager.pause());
    tokio::time::sleep(Duration::from_millis(30)).await;
    let paused_count = manager.collector().data_count();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(manager.collector().data_count(), paused_count);

    assert!(manager.resume());
    assert!(manager.stop());
    assert!(!manager.is_running());
    assert_eq!(monitor.status(), crate::monitor::MonitorStatus::Stopped);
    assert!(!manager.pause());
}
