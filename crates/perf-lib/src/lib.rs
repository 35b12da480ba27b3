//! Performance monitoring and adaptive optimization engine
//!
//! This crate provides the core functionality for:
//! - Resource probes and sampling monitors (CPU, memory, network)
//! - Metrics collection, retention, aggregation and export
//! - Optimizers for memory, rendering and startup
//! - Scoring, threshold checks and auto-optimization
//! - Health checks and observability

pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod manager;
pub mod models;
pub mod module;
pub mod monitor;
pub mod observability;
pub mod optimizer;
pub mod probe;

pub use collector::{CollectorConfig, MetricsCollector};
pub use config::PerformanceConfig;
pub use error::{PerfError, Result};
pub use events::{EventBus, PerformanceEvent};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use manager::{PerformanceManager, PerformanceReport, SystemInfo, VERSION};
pub use models::*;
pub use module::{ModuleStatistics, ModuleStatus, PerformanceModule};
pub use monitor::{Monitor, MonitorStatus};
pub use observability::{EngineMetrics, StructuredLogger};
pub use optimizer::{OptimizationResult, Optimizer, OptimizerStatus};
