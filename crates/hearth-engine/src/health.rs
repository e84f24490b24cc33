use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentHealth {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub health: ComponentHealth,
    pub detail: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Aggregated liveness of the named infrastructure collaborators.
///
/// One unhealthy component gates the whole command path (fail-stop): the
/// reconciler skips its cycle, the command listener refuses to emit, and the
/// inbound edges reject with a retryable error, until the component reports
/// healthy again.
#[derive(Clone)]
pub struct HealthGate {
    inner: Arc<RwLock<HashMap<&'static str, ComponentStatus>>>,
}

impl HealthGate {
    /// All listed components start healthy.
    pub fn new(components: &[&'static str]) -> Self {
        let now = Utc::now();
        let map = components
            .iter()
            .map(|name| {
                (*name, ComponentStatus {
                    health: ComponentHealth::Healthy,
                    detail: None,
                    changed_at: now,
                })
            })
            .collect();
        HealthGate { inner: Arc::new(RwLock::new(map)) }
    }

    pub fn report_healthy(&self, component: &'static str) {
        let mut guard = self.inner.write().expect("health gate lock poisoned");
        let status = guard.entry(component).or_insert_with(|| ComponentStatus {
            health: ComponentHealth::Unhealthy,
            detail: None,
            changed_at: Utc::now(),
        });
        if status.health != ComponentHealth::Healthy {
            info!(component, "component recovered");
            *status = ComponentStatus {
                health: ComponentHealth::Healthy,
                detail: None,
                changed_at: Utc::now(),
            };
        }
    }

    pub fn report_unhealthy(&self, component: &'static str, detail: impl Into<String>) {
        let detail = detail.into();
        let mut guard = self.inner.write().expect("health gate lock poisoned");
        let status = guard.entry(component).or_insert_with(|| ComponentStatus {
            health: ComponentHealth::Healthy,
            detail: None,
            changed_at: Utc::now(),
        });
        if status.health != ComponentHealth::Unhealthy {
            warn!(component, detail = %detail, "component unhealthy");
        }
        *status = ComponentStatus {
            health: ComponentHealth::Unhealthy,
            detail: Some(detail),
            changed_at: Utc::now(),
        };
    }

    /// True only when every tracked component is healthy.
    pub fn healthy(&self) -> bool {
        let guard = self.inner.read().expect("health gate lock poisoned");
        guard.values().all(|s| s.health == ComponentHealth::Healthy)
    }

    pub fn statuses(&self) -> HashMap<String, ComponentStatus> {
        let guard = self.inner.read().expect("health gate lock poisoned");
        guard.iter().map(|(name, status)| (name.to_string(), status.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_unhealthy_component_gates_everything() {
        let gate = HealthGate::new(&["twin-store", "document-store", "messaging"]);
        assert!(gate.healthy());

        gate.report_unhealthy("messaging", "broker unreachable");
        assert!(!gate.healthy());
        assert_eq!(
            gate.statuses().get("messaging").unwrap().health,
            ComponentHealth::Unhealthy
        );

        gate.report_healthy("messaging");
        assert!(gate.healthy());
    }

    #[test]
    fn unknown_component_can_join_late() {
        let gate = HealthGate::new(&[]);
        gate.report_unhealthy("cache", "cold");
        assert!(!gate.healthy());
        gate.report_healthy("cache");
        assert!(gate.healthy());
    }
}
