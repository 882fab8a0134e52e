//! Subsystem health tracking
//!
//! Backs the daemon's liveness and readiness endpoints. Liveness reports the
//! worst status across subsystems; readiness additionally requires startup
//! to have finished and no subsystem to be down.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Condition of one subsystem. Variant order is severity order, so the
/// aggregate across subsystems is simply the maximum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SubsystemStatus {
    /// Working normally
    Up,
    /// Impaired but still doing its job
    Degraded,
    /// Not functioning
    Down,
}

/// Status of a subsystem plus when it entered that status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemHealth {
    pub status: SubsystemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Unix timestamp of the last status transition
    pub since: i64,
}

impl SubsystemHealth {
    fn new(status: SubsystemStatus, detail: Option<String>) -> Self {
        Self {
            status,
            detail,
            since: chrono::Utc::now().timestamp(),
        }
    }
}

/// Liveness report: aggregate status plus the per-subsystem breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: SubsystemStatus,
    pub subsystems: BTreeMap<String, SubsystemHealth>,
}

/// Readiness report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Subsystem names for health tracking
pub mod subsystems {
    pub const RECONCILER: &str = "reconciler";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const METRICS_REGISTRY: &str = "metrics_registry";
    pub const UNIT_MANAGER: &str = "unit_manager";
}

#[derive(Debug, Default)]
struct RegistryState {
    subsystems: BTreeMap<String, SubsystemHealth>,
    startup_complete: bool,
}

/// Registry the subsystems report their condition into
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a subsystem; it begins up
    pub async fn register(&self, name: &str) {
        self.report(name, SubsystemStatus::Up, None).await;
    }

    pub async fn report_up(&self, name: &str) {
        self.report(name, SubsystemStatus::Up, None).await;
    }

    pub async fn report_degraded(&self, name: &str, detail: impl Into<String>) {
        self.report(name, SubsystemStatus::Degraded, Some(detail.into()))
            .await;
    }

    pub async fn report_down(&self, name: &str, detail: impl Into<String>) {
        self.report(name, SubsystemStatus::Down, Some(detail.into()))
            .await;
    }

    /// Flip the readiness gate once boot wiring is done
    pub async fn mark_startup_complete(&self) {
        self.state.write().await.startup_complete = true;
    }

    async fn report(&self, name: &str, status: SubsystemStatus, detail: Option<String>) {
        let mut state = self.state.write().await;
        match state.subsystems.get_mut(name) {
            // same status: refresh the detail, keep the transition time
            Some(existing) if existing.status == status => existing.detail = detail,
            _ => {
                state
                    .subsystems
                    .insert(name.to_string(), SubsystemHealth::new(status, detail));
            }
        }
    }

    pub async fn liveness(&self) -> HealthReport {
        let state = self.state.read().await;
        let status = state
            .subsystems
            .values()
            .map(|subsystem| subsystem.status)
            .max()
            .unwrap_or(SubsystemStatus::Up);
        HealthReport {
            status,
            subsystems: state.subsystems.clone(),
        }
    }

    /// Ready only when startup finished and every subsystem is at worst
    /// degraded; a down subsystem takes the agent out of rotation.
    pub async fn readiness(&self) -> ReadinessReport {
        let state = self.state.read().await;
        if !state.startup_complete {
            return ReadinessReport {
                ready: false,
                reason: Some("agent is still initializing".to_string()),
            };
        }
        if let Some((name, _)) = state
            .subsystems
            .iter()
            .find(|(_, subsystem)| subsystem.status == SubsystemStatus::Down)
        {
            return ReadinessReport {
                ready: false,
                reason: Some(format!("subsystem '{name}' is down")),
            };
        }
        ReadinessReport {
            ready: true,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness_reports_worst_status() {
        let registry = HealthRegistry::new();
        registry.register(subsystems::RECONCILER).await;
        registry.register(subsystems::HEARTBEAT).await;
        assert_eq!(registry.liveness().await.status, SubsystemStatus::Up);

        registry
            .report_degraded(subsystems::HEARTBEAT, "transport flapping")
            .await;
        assert_eq!(registry.liveness().await.status, SubsystemStatus::Degraded);

        registry
            .report_down(subsystems::RECONCILER, "runtime gone")
            .await;
        let report = registry.liveness().await;
        assert_eq!(report.status, SubsystemStatus::Down);
        assert_eq!(
            report.subsystems[subsystems::HEARTBEAT].status,
            SubsystemStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_liveness_with_no_subsystems_is_up() {
        let registry = HealthRegistry::new();
        assert_eq!(registry.liveness().await.status, SubsystemStatus::Up);
    }

    #[tokio::test]
    async fn test_readiness_requires_startup_and_no_down_subsystem() {
        let registry = HealthRegistry::new();
        registry.register(subsystems::RECONCILER).await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("agent is still initializing"));

        registry.mark_startup_complete().await;
        assert!(registry.readiness().await.ready);

        registry
            .report_down(subsystems::RECONCILER, "runtime gone")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("subsystem 'reconciler' is down")
        );

        // a degraded subsystem keeps serving
        registry
            .report_degraded(subsystems::RECONCILER, "slow runtime")
            .await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_repeated_report_keeps_transition_time() {
        let registry = HealthRegistry::new();
        registry
            .report_degraded(subsystems::HEARTBEAT, "first")
            .await;
        let since = registry.liveness().await.subsystems[subsystems::HEARTBEAT].since;

        registry
            .report_degraded(subsystems::HEARTBEAT, "second")
            .await;
        let health = registry.liveness().await;
        assert_eq!(health.subsystems[subsystems::HEARTBEAT].since, since);
        assert_eq!(
            health.subsystems[subsystems::HEARTBEAT].detail.as_deref(),
            Some("second")
        );
    }
}
