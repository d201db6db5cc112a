//! Component health for the forecasting runtime
//!
//! Each background loop reports its own status; the HTTP layer turns the
//! aggregate into liveness and readiness answers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, with reduced quality
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        !matches!(self, ComponentStatus::Unhealthy)
    }

    fn severity(&self) -> u8 {
        match self {
            ComponentStatus::Healthy => 0,
            ComponentStatus::Degraded => 1,
            ComponentStatus::Unhealthy => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .max_by_key(|s| s.severity())
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names used by the runtime
pub mod components {
    pub const INGESTION: &str = "ingestion";
    pub const PREDICTOR: &str = "predictor";
    pub const TRAINER: &str = "trainer";
    pub const TRACKER: &str = "tracker";
    pub const STORE: &str = "store";

    pub const ALL: [&str; 5] = [INGESTION, PREDICTOR, TRAINER, TRACKER, STORE];
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Registry with every runtime component registered as healthy
    pub async fn with_runtime_components() -> Self {
        let registry = Self::new();
        for name in components::ALL {
            registry.register(name).await;
        }
        registry
    }

    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
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

    /// Map a consecutive-failure count onto a status.
    ///
    /// Zero failures is healthy, anything below `threshold` is degraded.
    pub async fn report_failures(&self, name: &str, consecutive: u32, threshold: u32, last_error: &str) {
        let health = if consecutive == 0 {
            ComponentHealth::healthy()
        } else if consecutive < threshold {
            ComponentHealth::degraded(format!("{} consecutive failures: {}", consecutive, last_error))
        } else {
            ComponentHealth::unhealthy(format!("{} consecutive failures: {}", consecutive, last_error))
        };
        self.update(name, health).await;
    }

    pub async fn status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().await.get(name).map(|h| h.status)
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        if !ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("forecast runtime not started".to_string()),
            };
        }

        let health = self.health().await;
        let unhealthy: Vec<&str> = health
            .components
            .iter()
            .filter(|(_, h)| !h.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();

        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("unhealthy components: {}", unhealthy.join(", "))),
            }
        }
    }
}
