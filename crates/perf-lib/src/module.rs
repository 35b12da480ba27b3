//! Host-facing lifecycle of the performance engine
//!
//! A [`PerformanceModule`] is constructed explicitly by the host and owns
//! the collector, the manager and every monitor and optimizer built from
//! the configuration.

use crate::collector::{CollectorConfig, CollectorStatistics, MetricsCollector};
use crate::config::PerformanceConfig;
use crate::events::{EventBus, PerformanceEvent};
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::manager::{PerformanceManager, SystemInfo, VERSION};
use crate::monitor::{LeakDetectionConfig, Monitor, MonitorConfig, MonitorStatus};
use crate::optimizer::{
    MemoryOptimizer, MemoryOptimizerConfig, Optimizer, OptimizerStatus, RenderOptimizer,
    StartupOptimizer, StartupOptimizerConfig,
};
use crate::probe::LatencyConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

const COMPONENT: &str = "module";

/// Collector failures in a row before health reports it degraded
const DEGRADED_COLLECTION_FAILURES: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    NotInitialized,
    Initializing,
    Ready,
    Running,
    Paused,
    Error,
    Shutdown,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleStatus::NotInitialized => "not_initialized",
            ModuleStatus::Initializing => "initializing",
            ModuleStatus::Ready => "ready",
            ModuleStatus::Running => "running",
            ModuleStatus::Paused => "paused",
            ModuleStatus::Error => "error",
            ModuleStatus::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatistics {
    pub status: ModuleStatus,
    pub version: String,
    pub start_time: Option<DateTime<Utc>>,
    pub uptime_secs: i64,
    pub error_count: usize,
    pub system: Option<SystemInfo>,
    pub collector: Option<CollectorStatistics>,
}

/// Engine parts built by `initialize()`
struct Engine {
    manager: Arc<PerformanceManager>,
    memory: Option<Arc<MemoryOptimizer>>,
    render: Option<Arc<RenderOptimizer>>,
    startup: Option<Arc<StartupOptimizer>>,
}

struct ModuleState {
    status: ModuleStatus,
    config: PerformanceConfig,
    engine: Option<Engine>,
    errors: Vec<String>,
    start_time: Option<DateTime<Utc>>,
}

pub struct PerformanceModule {
    events: EventBus,
    config_path: Option<PathBuf>,
    state: Mutex<ModuleState>,
}

impl fmt::Debug for PerformanceModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceModule")
            .field("status", &self.status())
            .field("config_path", &self.config_path)
            .finish()
    }
}

impl PerformanceModule {
    pub fn new(config: PerformanceConfig, events: EventBus) -> Self {
        Self {
            events,
            config_path: None,
            state: Mutex::new(ModuleState {
                status: ModuleStatus::NotInitialized,
                config,
                engine: None,
                errors: Vec::new(),
                start_time: None,
            }),
        }
    }

    /// Save the configuration to `path` on shutdown
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, ModuleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    pub fn status(&self) -> ModuleStatus {
        self.lock().status
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> PerformanceConfig {
        match self.manager() {
            Some(manager) => manager.config(),
            None => self.lock().config.clone(),
        }
    }

    pub fn manager(&self) -> Option<Arc<PerformanceManager>> {
        self.lock().engine.as_ref().map(|e| Arc::clone(&e.manager))
    }

    pub fn collector(&self) -> Option<Arc<MetricsCollector>> {
        self.manager().map(|m| Arc::clone(m.collector()))
    }

    /// Memory routine, for registering reclaimers
    pub fn memory_optimizer(&self) -> Option<Arc<MemoryOptimizer>> {
        self.lock().engine.as_ref().and_then(|e| e.memory.clone())
    }

    /// Render routine, for frame reporting and settings
    pub fn render_optimizer(&self) -> Option<Arc<RenderOptimizer>> {
        self.lock().engine.as_ref().and_then(|e| e.render.clone())
    }

    /// Startup routine, for module registration and startup times
    pub fn startup_optimizer(&self) -> Option<Arc<StartupOptimizer>> {
        self.lock().engine.as_ref().and_then(|e| e.startup.clone())
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock().errors.clone()
    }

    fn set_status(&self, status: ModuleStatus) {
        let changed = {
            let mut state = self.lock();
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            self.events
                .publish(PerformanceEvent::ModuleStatusChanged { status });
        }
    }

    fn record_error(&self, message: String) {
        error!(component = COMPONENT, error = %message, "Module error");
        self.events.error(COMPONENT, message.clone());
        self.lock().errors.push(message);
    }

    /// Build and initialize the engine from the configuration. Only valid
    /// from `NotInitialized`; unknown monitor or optimizer names are
    /// skipped with a warning.
    pub async fn initialize(&self) -> bool {
        let config = {
            let state = self.lock();
            match state.status {
                ModuleStatus::NotInitialized => state.config.clone(),
                ModuleStatus::Ready | ModuleStatus::Running | ModuleStatus::Paused => return true,
                _ => return false,
            }
        };
        self.set_status(ModuleStatus::Initializing);

        if let Err(e) = config.validate() {
            self.record_error(format!("initialization failed: {}", e));
            self.set_status(ModuleStatus::Error);
            return false;
        }

        let collector = Arc::new(MetricsCollector::with_config(
            self.events.clone(),
            collector_config(&config),
        ));
        let manager = Arc::new(PerformanceManager::new(
            config.clone(),
            collector,
            self.events.clone(),
        ));
        let mut engine = Engine {
            manager: Arc::clone(&manager),
            memory: None,
            render: None,
            startup: None,
        };

        if config.monitoring.enabled {
            for name in &config.monitoring.monitors {
                let Some(monitor) = self.build_monitor(name, &config) else {
                    warn!(monitor = %name, "Unknown monitor in configuration, skipping");
                    continue;
                };
                // A monitor that fails here stays registered in Error so
                // health reports it
                if let Err(e) = monitor.initialize().await {
                    warn!(monitor = %name, error = %e, "Monitor unavailable");
                }
                if let Err(e) = manager.add_monitor(monitor) {
                    self.record_error(format!("monitor {}: {}", name, e));
                }
            }
        }

        for name in &config.optimization.optimizers {
            let optimizer = match name.as_str() {
                "memory" => {
                    let routine = Arc::new(MemoryOptimizer::with_platform_probe(
                        MemoryOptimizerConfig {
                            memory_limit_bytes: config.optimization.memory_limit_mb * 1024 * 1024,
                            cache_dir: config.optimization.cache_dir.clone(),
                            temp_dir: config.optimization.temp_dir.clone(),
                        },
                    ));
                    engine.memory = Some(Arc::clone(&routine));
                    Optimizer::new(routine, self.events.clone())
                }
                "render" => {
                    let routine = Arc::new(RenderOptimizer::default());
                    let collector = Arc::clone(manager.collector());
                    routine.set_frame_rate_sink(move |fps| collector.set_frame_rate(fps));
                    engine.render = Some(Arc::clone(&routine));
                    Optimizer::new(routine, self.events.clone())
                }
                "startup" => {
                    let routine = Arc::new(StartupOptimizer::new(StartupOptimizerConfig {
                        cache_dir: config.optimization.cache_dir.clone(),
                        ..Default::default()
                    }));
                    engine.startup = Some(Arc::clone(&routine));
                    Optimizer::new(routine, self.events.clone())
                }
                other => {
                    warn!(optimizer = %other, "Unknown optimizer in configuration, skipping");
                    continue;
                }
            };

            let optimizer = Arc::new(optimizer);
            if !optimizer.initialize().await {
                warn!(optimizer = %name, "Optimizer failed to initialize");
            }
            if let Err(e) = manager.add_optimizer(optimizer) {
                self.record_error(format!("optimizer {}: {}", name, e));
            }
        }

        info!(
            monitors = manager.monitor_names().len(),
            optimizers = manager.optimizer_names().len(),
            version = VERSION,
            "Performance module initialized"
        );
        self.lock().engine = Some(engine);
        self.set_status(ModuleStatus::Ready);
        true
    }

    fn build_monitor(&self, name: &str, config: &PerformanceConfig) -> Option<Arc<Monitor>> {
        let monitor_config = MonitorConfig {
            tracking_interval: config.monitoring_interval(),
            retention: config.retention(),
            ..Default::default()
        };

        let monitor = match name {
            "cpu" => Monitor::cpu(self.events.clone(), monitor_config),
            "memory" => Monitor::memory(
                self.events.clone(),
                MonitorConfig {
                    leak_detection: Some(LeakDetectionConfig {
                        threshold_bytes_per_sec: config.thresholds.memory_leak_bytes_per_sec,
                        ..Default::default()
                    }),
                    ..monitor_config
                },
            ),
            "network" => Monitor::network(
                self.events.clone(),
                monitor_config,
                LatencyConfig {
                    targets: config.monitoring.latency_targets.clone(),
                    ..Default::default()
                },
            ),
            _ => return None,
        };
        Some(Arc::new(monitor))
    }

    /// Start monitoring. Valid from `Ready`; a running module is a no-op.
    pub fn start(&self) -> bool {
        match self.status() {
            ModuleStatus::Running => return true,
            ModuleStatus::Ready => {}
            _ => return false,
        }
        let Some(manager) = self.manager() else {
            return false;
        };
        if !manager.start() {
            self.record_error("manager failed to start".to_string());
            self.set_status(ModuleStatus::Error);
            return false;
        }
        self.lock().start_time = Some(Utc::now());
        self.set_status(ModuleStatus::Running);
        info!("Performance module started");
        true
    }

    /// Stop monitoring and return to `Ready`
    pub fn stop(&self) -> bool {
        match self.status() {
            ModuleStatus::Ready => return true,
            ModuleStatus::Running | ModuleStatus::Paused => {}
            _ => return false,
        }
        if let Some(manager) = self.manager() {
            manager.stop();
        }
        self.set_status(ModuleStatus::Ready);
        info!("Performance module stopped");
        true
    }

    pub fn pause(&self) -> bool {
        match self.status() {
            ModuleStatus::Paused => return true,
            ModuleStatus::Running => {}
            _ => return false,
        }
        if let Some(manager) = self.manager() {
            manager.pause();
        }
        self.set_status(ModuleStatus::Paused);
        true
    }

    pub fn resume(&self) -> bool {
        match self.status() {
            ModuleStatus::Running => return true,
            ModuleStatus::Paused => {}
            _ => return false,
        }
        if let Some(manager) = self.manager() {
            manager.resume();
        }
        self.set_status(ModuleStatus::Running);
        true
    }

    /// Stop everything and save the configuration when a path is set
    pub fn shutdown(&self) -> bool {
        if self.status() == ModuleStatus::Shutdown {
            return true;
        }
        if let Some(manager) = self.manager() {
            manager.stop();
        }

        let config = self.config();
        self.lock().config = config.clone();
        if let Some(path) = &self.config_path {
            if let Err(e) = config.save(path) {
                self.record_error(format!("failed to save configuration: {}", e));
            }
        }

        self.set_status(ModuleStatus::Shutdown);
        info!("Performance module shut down");
        true
    }

    /// Return an `Error` or `Shutdown` module to `NotInitialized`, dropping
    /// the engine and its histories. Other states only clear histories.
    pub async fn reset(&self) -> bool {
        match self.status() {
            ModuleStatus::Error | ModuleStatus::Shutdown => {
                let engine = {
                    let mut state = self.lock();
                    state.errors.clear();
                    state.start_time = None;
                    state.engine.take()
                };
                if let Some(engine) = engine {
                    engine.manager.stop();
                }
                self.set_status(ModuleStatus::NotInitialized);
                true
            }
            ModuleStatus::Ready | ModuleStatus::Running | ModuleStatus::Paused => {
                if let Some(manager) = self.manager() {
                    manager.reset().await;
                }
                self.lock().errors.clear();
                true
            }
            _ => false,
        }
    }

    pub fn statistics(&self) -> ModuleStatistics {
        let manager = self.manager();
        let state = self.lock();
        ModuleStatistics {
            status: state.status,
            version: VERSION.to_string(),
            start_time: state.start_time,
            uptime_secs: state
                .start_time
                .map(|s| (Utc::now() - s).num_seconds())
                .unwrap_or(0),
            error_count: state.errors.len(),
            system: manager.as_ref().map(|m| m.system_info()),
            collector: manager.as_ref().map(|m| m.collector().statistics()),
        }
    }

    /// Refresh `registry` from the current component state
    pub async fn update_health(&self, registry: &HealthRegistry) {
        let status = self.status();
        let module_health = match status {
            ModuleStatus::Error => ComponentHealth::unhealthy("module is in error"),
            ModuleStatus::Shutdown => ComponentHealth::unhealthy("module is shut down"),
            ModuleStatus::NotInitialized | ModuleStatus::Initializing => {
                ComponentHealth::degraded(format!("module is {}", status))
            }
            _ => ComponentHealth::healthy(),
        };
        registry.update(components::MODULE, module_health).await;

        let ready = status == ModuleStatus::Running;
        registry
            .set_ready(ready, Some(format!("module is {}", status)))
            .await;

        let Some(manager) = self.manager() else {
            return;
        };

        let failed_monitors: Vec<String> = manager
            .monitors()
            .iter()
            .filter(|m| m.status() == MonitorStatus::Error)
            .map(|m| m.name().to_string())
            .collect();
        let monitors_health = if failed_monitors.is_empty() {
            ComponentHealth::healthy()
        } else {
            ComponentHealth::unhealthy(format!("in error: {}", failed_monitors.join(", ")))
        };
        registry.update(components::MONITORS, monitors_health).await;

        let collector = manager.collector().statistics();
        let collector_health = if collector.consecutive_failures >= DEGRADED_COLLECTION_FAILURES {
            ComponentHealth::degraded(format!(
                "{} consecutive collection failures",
                collector.consecutive_failures
            ))
        } else {
            ComponentHealth::healthy()
        };
        registry.update(components::COLLECTOR, collector_health).await;

        let failed_optimizers: Vec<String> = manager
            .optimizers()
            .iter()
            .filter(|o| o.status() == OptimizerStatus::Failed)
            .map(|o| o.name().to_string())
            .collect();
        let optimizers_health = if failed_optimizers.is_empty() {
            ComponentHealth::healthy()
        } else {
            ComponentHealth::degraded(format!("failed: {}", failed_optimizers.join(", ")))
        };
        registry.update(components::OPTIMIZERS, optimizers_health).await;
    }

    /// Health snapshot on a fresh registry
    pub async fn health(&self) -> crate::health::HealthResponse {
        let registry = HealthRegistry::new();
        self.update_health(&registry).await;
        registry.health().await
    }
}

fn collector_config(config: &PerformanceConfig) -> CollectorConfig {
    CollectorConfig {
        collection_interval: config.monitoring_interval(),
        retention: config.retention(),
        storage_strategy: config.storage.strategy,
        storage_path: config.storage.path.clone(),
        max_storage_bytes: config.max_storage_bytes(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::models::ResourceType;
    use crate::probe::MockProbe;
    use tempfile::tempdir;

    fn offline_config() -> PerformanceConfig {
        let mut config = PerformanceConfig::default();
        config.monitoring.monitors = Vec::new();
        config.optimization.optimizers =
            vec!["render".to_string(), "startup".to_string(), "bogus".to_string()];
        config
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let module = PerformanceModule::new(offline_config(), events);
        assert_eq!(module.status(), ModuleStatus::NotInitialized);
        assert_eq!(module.version(), "1.0.0");
        assert!(!module.start());

        assert!(module.initialize().await);
        assert_eq!(module.status(), ModuleStatus::Ready);
        let manager = module.manager().unwrap();
        assert_eq!(manager.optimizer_names(), vec!["render", "startup"]);
        assert!(module.render_optimizer().is_some());
        assert!(module.memory_optimizer().is_none());

        assert!(!module.resume());
        assert!(module.start());
        assert_eq!(module.status(), ModuleStatus::Running);
        assert!(module.start());

        assert!(module.pause());
        assert_eq!(module.status(), ModuleStatus::Paused);
        assert!(manager.is_paused());
        assert!(!module.start());
        assert!(module.resume());
        assert_eq!(module.status(), ModuleStatus::Running);

        assert!(module.stop());
        assert_eq!(module.status(), ModuleStatus::Ready);
        assert!(!manager.is_running());

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PerformanceEvent::ModuleStatusChanged { status } = event {
                seen.push(status);
            }
        }
        assert_eq!(
            seen,
            vec![
                ModuleStatus::Initializing,
                ModuleStatus::Ready,
                ModuleStatus::Running,
                ModuleStatus::Paused,
                ModuleStatus::Running,
                ModuleStatus::Ready,
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_config_enters_error_until_reset() {
        let mut config = offline_config();
        config.monitoring.interval_ms = 10;
        let module = PerformanceModule::new(config, EventBus::new());

        assert!(!module.initialize().await);
        assert_eq!(module.status(), ModuleStatus::Error);
        assert_eq!(module.errors().len(), 1);
        assert!(!module.initialize().await);

        assert!(module.reset().await);
        assert_eq!(module.status(), ModuleStatus::NotInitialized);
        assert!(module.errors().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_saves_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("perf.json");
        let module =
            PerformanceModule::new(offline_config(), EventBus::new()).with_config_path(&path);
        assert!(module.initialize().await);
        assert!(module.start());
        module
            .manager()
            .unwrap()
            .set_optimization_strategy(crate::models::OptimizationStrategy::Aggressive);

        assert!(module.shutdown());
        assert_eq!(module.status(), ModuleStatus::Shutdown);
        assert!(!module.start());

        let saved = PerformanceConfig::load(&path).unwrap();
        assert_eq!(
            saved.optimization.strategy,
            crate::models::OptimizationStrategy::Aggressive
        );

        assert!(module.reset().await);
        assert_eq!(module.status(), ModuleStatus::NotInitialized);
        assert!(module.manager().is_none());
        assert!(module.initialize().await);
    }

    #[tokio::test]
    async fn test_recorded_frame_rate_reaches_the_score() {
        let module = PerformanceModule::new(offline_config(), EventBus::new());
        assert!(module.initialize().await);
        let manager = module.manager().unwrap();
        let render = module.render_optimizer().unwrap();

        render.sample_frame_rate();
        for _ in 0..100 {
            render.record_frame();
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        render.sample_frame_rate();
        let smooth = manager.collect_current_metrics().await.unwrap();
        assert!(smooth.video.frame_rate > 30.0);
        assert_eq!(manager.performance_score(), 100);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        render.record_frame();
        render.record_frame();
        render.sample_frame_rate();
        let choppy = manager.collect_current_metrics().await.unwrap();
        assert!(choppy.video.frame_rate > 0.0 && choppy.video.frame_rate < 15.0);
        assert_eq!(manager.performance_score(), 70);
    }

    #[tokio::test]
    async fn test_statistics_and_health() {
        let module = PerformanceModule::new(offline_config(), EventBus::new());
        let health = module.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(module.statistics().system.is_none());

        assert!(module.initialize().await);
        let manager = module.manager().unwrap();
        let probe = Arc::new(
            MockProbe::new("gpu", &[ResourceType::Cpu]).failing_initialize("no driver"),
        );
        let broken = Arc::new(Monitor::new("gpu", probe, module.events().clone()));
        assert!(broken.initialize().await.is_err());
        manager.add_monitor(broken).unwrap();

        let registry = HealthRegistry::new();
        module.update_health(&registry).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(
            health.components[components::MONITORS].message.as_deref(),
            Some("in error: gpu")
        );
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("module is ready"));

        let stats = module.statistics();
        assert_eq!(stats.status, ModuleStatus::Ready);
        assert_eq!(stats.system.unwrap().monitor_count, 1);
        assert_eq!(stats.collector.unwrap().registered_monitors, 1);
    }
}
