use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use hearth_domain::{
    AuditEntry, CorrelationId, DecisionType, DesiredDeviceState, DeviceId, DeviceTwinSnapshot,
    DeviceValue, FunctionalSystem,
};
use hearth_store::{AuditStore, SystemRegistry, TwinStore};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::calculator::{CalculationResult, StateCalculator};
use crate::error::EngineError;
use crate::events::Event;
use crate::sensors::SensorReadings;

/// Outcome of one coordinator run for a device.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationResult {
    /// A new desired state was written and announced.
    Updated { desired: DesiredDeviceState },
    /// Safety refused; the previous desired state stands.
    Refused { rule_id: String, reason: String },
    /// Nothing to do (no inputs).
    NoChange { reason: String },
    DeviceNotFound,
}

/// Drives one device's twin through calculate → persist → announce.
///
/// Runs per-device under a lock: concurrent requests for the same device
/// execute in arrival order, different devices proceed independently.
pub struct ReconciliationCoordinator {
    twins: Arc<dyn TwinStore>,
    registry: Arc<dyn SystemRegistry>,
    calculator: Arc<StateCalculator>,
    bus: EventBus,
    audit: Arc<dyn AuditStore>,
    sensors: SensorReadings,
    locks: Mutex<HashMap<DeviceId, Arc<Mutex<()>>>>,
}

impl ReconciliationCoordinator {
    pub fn new(
        twins: Arc<dyn TwinStore>,
        registry: Arc<dyn SystemRegistry>,
        calculator: Arc<StateCalculator>,
        bus: EventBus,
        audit: Arc<dyn AuditStore>,
        sensors: SensorReadings,
    ) -> Self {
        ReconciliationCoordinator {
            twins,
            registry,
            calculator,
            bus,
            audit,
            sensors,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn device_lock(&self, id: &DeviceId) -> Arc<Mutex<()>> {
        let mut guard = self.locks.lock().await;
        guard.entry(id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Gather twin snapshots of the other members of the device's system.
    async fn related_snapshots(
        &self,
        id: &DeviceId,
        system: Option<&FunctionalSystem>,
    ) -> Result<HashMap<DeviceId, DeviceTwinSnapshot>, EngineError> {
        let mut related = HashMap::new();
        if let Some(sys) = system {
            for member in &sys.device_ids {
                if member == id {
                    continue;
                }
                if let Some(snap) = self.twins.find_snapshot(member).await? {
                    related.insert(member.clone(), snap);
                }
            }
        }
        Ok(related)
    }

    pub async fn reconcile(
        &self,
        id: &DeviceId,
        correlation: CorrelationId,
    ) -> Result<ReconciliationResult, EngineError> {
        let lock = self.device_lock(id).await;
        let _serialized = lock.lock().await;

        let Some(snapshot) = self.twins.find_snapshot(id).await? else {
            debug!(device = %id, "no twin record");
            return Ok(ReconciliationResult::DeviceNotFound);
        };
        let system = self.registry.find_by_device(id).await?;
        let related = self.related_snapshots(id, system.as_ref()).await?;
        let metadata = self.sensors.snapshot();

        let result = self
            .calculator
            .calculate(&snapshot, system.as_ref(), related, metadata, Utc::now())
            .await?;
        let previous = snapshot.desired.as_ref().map(|d| d.value);
        let system_id = system.as_ref().map(|s| s.id);

        match result {
            CalculationResult::FromIntent { desired } => {
                self.commit(desired, previous, "user intent", correlation).await
            }
            CalculationResult::FromOverride { desired, category, reason } => {
                let reason = format!("{category} override: {reason}");
                self.commit(desired, previous, &reason, correlation).await
            }
            CalculationResult::SafetyModified {
                desired,
                original,
                reason,
                modified_by,
                from_override,
            } => {
                let decision = if from_override {
                    DecisionType::SafetyRuleActivated
                } else {
                    DecisionType::IntentModified
                };
                let entry = AuditEntry::new(correlation, decision, "safety-engine", Utc::now())
                    .for_device(id.clone())
                    .with_values(Some(original), Some(desired.value))
                    .with_reason(reason.clone())
                    .with_context(serde_json::json!({ "modifiedBy": modified_by }));
                let entry = match system_id {
                    Some(sys) => entry.for_system(sys),
                    None => entry,
                };
                self.audit.append(&entry).await?;
                self.commit(desired, previous, &reason, correlation).await
            }
            CalculationResult::SafetyRefused { rule_id, reason, proposed } => {
                warn!(device = %id, rule_id = %rule_id, reason = %reason, "proposal refused");
                let entry = AuditEntry::new(
                    correlation,
                    DecisionType::IntentRejected,
                    "safety-engine",
                    Utc::now(),
                )
                .for_device(id.clone())
                .with_values(previous, None)
                .with_reason(reason.clone())
                .with_context(serde_json::json!({
                    "ruleId": rule_id,
                    "proposed": proposed,
                }));
                let entry = match system_id {
                    Some(sys) => entry.for_system(sys),
                    None => entry,
                };
                self.audit.append(&entry).await?;
                Ok(ReconciliationResult::Refused { rule_id, reason })
            }
            CalculationResult::NoValue { reason } => {
                Ok(ReconciliationResult::NoChange { reason })
            }
        }
    }

    async fn commit(
        &self,
        desired: DesiredDeviceState,
        previous: Option<DeviceValue>,
        reason: &str,
        correlation: CorrelationId,
    ) -> Result<ReconciliationResult, EngineError> {
        self.twins.save_desired(&desired).await?;
        self.bus
            .publish(Event::DesiredStateCalculated {
                desired: desired.clone(),
                previous,
                reason: reason.to_string(),
                correlation,
            })
            .await?;
        Ok(ReconciliationResult::Updated { desired })
    }

    /// Drive every mapped device of a system to its fail-safe default.
    pub async fn apply_fail_safe(
        &self,
        system_id: Uuid,
        correlation: CorrelationId,
    ) -> Result<Vec<DesiredDeviceState>, EngineError> {
        let system = self
            .registry
            .find_by_id(system_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("system {system_id}")))?;

        let mut applied = Vec::new();
        for (device, value) in &system.fail_safe_defaults {
            let lock = self.device_lock(device).await;
            let _serialized = lock.lock().await;

            let previous = self
                .twins
                .find_snapshot(device)
                .await?
                .and_then(|snap| snap.desired.map(|d| d.value));
            let desired =
                DesiredDeviceState::new(device.clone(), value.device_type(), *value)?;
            self.twins.save_desired(&desired).await?;

            self.audit
                .append(
                    &AuditEntry::new(
                        correlation,
                        DecisionType::FailSafeApplied,
                        "fail-safe",
                        Utc::now(),
                    )
                    .for_device(device.clone())
                    .for_system(system_id)
                    .with_values(previous, Some(*value))
                    .with_reason("system ordered into fail-safe"),
                )
                .await?;
            self.bus
                .publish(Event::DesiredStateCalculated {
                    desired: desired.clone(),
                    previous,
                    reason: "fail-safe default".to_string(),
                    correlation,
                })
                .await?;
            applied.push(desired);
        }
        Ok(applied)
    }
}
