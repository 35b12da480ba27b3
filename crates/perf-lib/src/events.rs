//! Engine notifications
//!
//! Every component publishes onto a shared [`EventBus`]. Consumers (UI,
//! logging, the agent API) subscribe and receive a copy of each event.
//! Publishing with no subscribers attached is not an error.

use crate::models::{OptimizationStrategy, PerformanceLevel, PerformanceMetrics, ResourceType};
use crate::module::ModuleStatus;
use crate::monitor::MonitorStatus;
use crate::optimizer::{OptimizationResult, OptimizerStatus};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default channel capacity; slow subscribers lag rather than block publishers
const DEFAULT_CAPACITY: usize = 1024;

/// Notification catalogue
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PerformanceEvent {
    /// A collection tick produced a new snapshot
    MetricsUpdated { metrics: Box<PerformanceMetrics> },
    /// Only published on an actual level transition
    PerformanceLevelChanged {
        old: PerformanceLevel,
        new: PerformanceLevel,
        score: u32,
    },
    ThresholdExceeded {
        source: String,
        resource: Option<ResourceType>,
        metric: String,
        value: f64,
        threshold: f64,
    },
    OptimizationStarted {
        optimizer: String,
        strategy: OptimizationStrategy,
    },
    OptimizationProgress {
        optimizer: String,
        percent: u8,
        description: String,
    },
    OptimizationCompleted {
        optimizer: String,
        result: Box<OptimizationResult>,
    },
    OptimizationCancelled { optimizer: String },
    MonitorStatusChanged { monitor: String, status: MonitorStatus },
    OptimizerStatusChanged {
        optimizer: String,
        status: OptimizerStatus,
    },
    ModuleStatusChanged { status: ModuleStatus },
    DataCleanupCompleted { source: String, removed: usize },
    StorageFailed { message: String },
    StorageSpaceLow { used_bytes: u64, limit_bytes: u64 },
    ErrorOccurred { component: String, message: String },
}

/// Cloneable publisher handle over a broadcast channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PerformanceEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: PerformanceEvent) {
        // Err only means nobody is listening right now
        let _ = self.tx.send(event);
    }

    /// Shorthand for [`PerformanceEvent::ErrorOccurred`]
    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.publish(PerformanceEvent::ErrorOccurred {
            component: component.to_string(),
            message: message.into(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PerformanceEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.error("monitor", "nobody listening");
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(PerformanceEvent::DataCleanupCompleted {
            source: "cpu".to_string(),
            removed: 3,
        });

        match rx.recv().await.unwrap() {
            PerformanceEvent::DataCleanupCompleted { source, removed } => {
                assert_eq!(source, "cpu");
                assert_eq!(removed, 3);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = PerformanceEvent::ErrorOccurred {
            component: "collector".to_string(),
            message: "disk full".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error_occurred");
        assert_eq!(json["component"], "collector");
    }
}
