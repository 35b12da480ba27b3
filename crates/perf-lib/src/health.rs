//! Health and readiness reporting
//!
//! The module refreshes a [`HealthRegistry`] from component state; the agent
//! serves it on `/healthz` and `/readyz`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working, but with recent failures
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    fn with(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::with(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst component status wins; no components is healthy
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        let mut degraded = false;
        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => degraded = true,
                ComponentStatus::Healthy => {}
            }
        }
        if degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names used in health responses
pub mod components {
    pub const MODULE: &str = "module";
    pub const MONITORS: &str = "monitors";
    pub const COLLECTOR: &str = "collector";
    pub const OPTIMIZERS: &str = "optimizers";
}

#[derive(Debug, Default)]
struct Readiness {
    ready: bool,
    reason: Option<String>,
}

/// Shared, cloneable health state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    readiness: Arc<RwLock<Readiness>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Mark ready, or not ready with the reason reported by `/readyz`
    pub async fn set_ready(&self, ready: bool, reason: Option<String>) {
        let mut readiness = self.readiness.write().await;
        readiness.ready = ready;
        readiness.reason = if ready { None } else { reason };
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready when marked ready and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let (ready, reason) = {
            let readiness = self.readiness.read().await;
            (readiness.ready, readiness.reason.clone())
        };
        if !ready {
            return ReadinessResponse {
                ready: false,
                reason: Some(reason.unwrap_or_else(|| "engine not initialized".to_string())),
            };
        }

        let health = self.health().await;
        if let Some((name, _)) = health
            .components
            .iter()
            .find(|(_, h)| h.status == ComponentStatus::Unhealthy)
        {
            return ReadinessResponse {
                ready: false,
                reason: Some(format!("{} unhealthy", name)),
            };
        }

        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy_but_not_ready() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("engine not initialized"));
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let registry = HealthRegistry::new();
        registry.set_healthy(components::MONITORS).await;
        registry.set_degraded(components::COLLECTOR, "3 failed ticks").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.set_unhealthy(components::MONITORS, "cpu in error").await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert!(!health.status.is_operational());
        assert_eq!(
            health.components[components::MONITORS].message.as_deref(),
            Some("cpu in error")
        );
    }

    #[tokio::test]
    async fn test_readiness_follows_components() {
        let registry = HealthRegistry::new();
        registry.set_ready(false, Some("module is paused".to_string())).await;
        assert_eq!(
            registry.readiness().await.reason.as_deref(),
            Some("module is paused")
        );

        registry.set_ready(true, None).await;
        registry.set_healthy(components::MODULE).await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::MODULE, "error").await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("module unhealthy"));
    }
}
