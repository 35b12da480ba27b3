//! Perf Agent - performance monitoring and optimization host
//!
//! Runs the performance engine in-process, logs its event stream and
//! serves the HTTP API until interrupted.

use anyhow::{bail, Result};
use perf_agent::{api, config};
use perf_lib::{
    health::HealthRegistry, observability::StructuredLogger, EventBus, PerformanceModule, VERSION,
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting perf-agent");

    let config = config::AgentConfig::load()?;
    let engine_config = config.engine_config()?;
    info!(host = %config.host_name, port = config.api_port, "Agent configured");

    let events = EventBus::new();
    let logger = StructuredLogger::new(&config.host_name);
    let event_log = spawn_event_logger(&events, logger.clone());

    let mut module = PerformanceModule::new(engine_config, events.clone());
    if let Some(path) = &config.config_path {
        module = module.with_config_path(path);
    }
    let module = Arc::new(module);

    if !module.initialize().await {
        bail!("Engine failed to initialize: {}", module.errors().join("; "));
    }
    if !module.start() {
        bail!("Engine failed to start: {}", module.errors().join("; "));
    }
    if let Some(manager) = module.manager() {
        logger.log_startup(
            VERSION,
            manager.monitor_names().len(),
            manager.optimizer_names().len(),
        );
    }

    let health_registry = HealthRegistry::new();
    module.update_health(&health_registry).await;
    let app_state = Arc::new(api::AppState::new(module.clone(), health_registry.clone()));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let health_task = {
        let module = module.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(config.health_interval());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => module.update_health(&health_registry).await,
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    };

    let api_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(api::serve(config.api_port, app_state, async move {
            let _ = shutdown_rx.recv().await;
        }))
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    module.shutdown();

    if let Ok(Err(e)) = api_handle.await {
        warn!(error = %e, "API server exited with error");
    }
    let _ = health_task.await;
    event_log.abort();

    Ok(())
}

/// Log every engine event through the structured logger
fn spawn_event_logger(events: &EventBus, logger: StructuredLogger) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => logger.log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
