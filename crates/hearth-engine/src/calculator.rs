use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hearth_domain::{
    DesiredDeviceState, DeviceId, DeviceTwinSnapshot, DeviceValue, FunctionalSystem, Override,
    OverrideCategory, OverrideTarget, SafetyContext,
};
use hearth_rules::{SafetyEvaluationResult, SafetyRuleEngine};
use hearth_store::OverrideStore;

use crate::error::EngineError;

/// The override that currently wins for a device, with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveOverride {
    pub ovr: Override,
    /// True when the winner is the system-scoped override.
    pub is_from_system: bool,
}

/// Outcome of one desired-state calculation.
#[derive(Debug, Clone, PartialEq)]
pub enum CalculationResult {
    /// User intent passed safety untouched.
    FromIntent { desired: DesiredDeviceState },
    /// An active override shadowed intent and passed safety untouched.
    FromOverride {
        desired: DesiredDeviceState,
        category: OverrideCategory,
        reason: String,
    },
    /// Safety rewrote the proposed value.
    SafetyModified {
        desired: DesiredDeviceState,
        original: DeviceValue,
        reason: String,
        modified_by: Vec<String>,
        /// True when the rewritten proposal came from an override rather than
        /// user intent.
        from_override: bool,
    },
    /// Safety refused the proposed value; nothing may be written.
    SafetyRefused {
        rule_id: String,
        reason: String,
        proposed: DeviceValue,
    },
    /// No override and no intent: there is nothing to drive toward.
    NoValue { reason: String },
}

/// Derives a device's desired state from the precedence chain
/// override > intent, then passes the winner through the safety engine.
///
/// Pure with respect to the twin: it reads the override store and evaluates
/// rules but never persists anything and never publishes events.
pub struct StateCalculator {
    overrides: Arc<dyn OverrideStore>,
    engine: Arc<SafetyRuleEngine>,
}

impl StateCalculator {
    pub fn new(overrides: Arc<dyn OverrideStore>, engine: Arc<SafetyRuleEngine>) -> Self {
        StateCalculator { overrides, engine }
    }

    /// Resolve the winning override for a device, considering both the
    /// device-scoped and (when the device belongs to one) the system-scoped
    /// stacks. Highest category wins; on a category tie the device-scoped
    /// override beats the system-scoped one.
    pub async fn resolve_effective_for_device(
        &self,
        device: &DeviceId,
        system: Option<&FunctionalSystem>,
        now: DateTime<Utc>,
    ) -> Result<Option<EffectiveOverride>, EngineError> {
        let device_head = self
            .overrides
            .find_effective_by_target(&OverrideTarget::Device(device.clone()), now)
            .await?;
        let system_head = match system {
            Some(sys) => {
                self.overrides
                    .find_effective_by_target(&OverrideTarget::System(sys.id), now)
                    .await?
            }
            None => None,
        };

        Ok(match (device_head, system_head) {
            (Some(dev), Some(sys)) => {
                if sys.category > dev.category {
                    Some(EffectiveOverride { ovr: sys, is_from_system: true })
                } else {
                    Some(EffectiveOverride { ovr: dev, is_from_system: false })
                }
            }
            (Some(dev), None) => Some(EffectiveOverride { ovr: dev, is_from_system: false }),
            (None, Some(sys)) => Some(EffectiveOverride { ovr: sys, is_from_system: true }),
            (None, None) => None,
        })
    }

    /// Calculate the desired state for the snapshot.
    ///
    /// `related` holds the twin snapshots of the other devices in the same
    /// system; `metadata` is the ambient context (sensor readings etc.)
    /// exposed to expression rules.
    pub async fn calculate(
        &self,
        snapshot: &DeviceTwinSnapshot,
        system: Option<&FunctionalSystem>,
        related: HashMap<DeviceId, DeviceTwinSnapshot>,
        metadata: HashMap<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<CalculationResult, EngineError> {
        let effective =
            self.resolve_effective_for_device(&snapshot.id, system, now).await?;

        let (proposed, override_source) = match (&effective, &snapshot.intent) {
            (Some(eff), _) => (eff.ovr.value, Some(eff.ovr.clone())),
            (None, Some(intent)) => (intent.value, None),
            (None, None) => {
                return Ok(CalculationResult::NoValue {
                    reason: "no override or user intent".into(),
                })
            }
        };

        let mut ctx = SafetyContext::new(snapshot.id.clone(), snapshot.device_type, proposed)
            .with_snapshot(snapshot.clone())
            .with_related(related)
            .with_metadata(metadata);
        if let Some(sys) = system {
            ctx = ctx.with_system(sys.clone());
        }

        let evaluation = self.engine.evaluate(&ctx);
        let result = match evaluation.result {
            SafetyEvaluationResult::Accepted => {
                let desired =
                    DesiredDeviceState::new(snapshot.id.clone(), snapshot.device_type, proposed)?;
                match override_source {
                    Some(ovr) => CalculationResult::FromOverride {
                        desired,
                        category: ovr.category,
                        reason: ovr.reason,
                    },
                    None => CalculationResult::FromIntent { desired },
                }
            }
            SafetyEvaluationResult::Modified { original, value, modified_by, reason } => {
                let desired =
                    DesiredDeviceState::new(snapshot.id.clone(), snapshot.device_type, value)?;
                CalculationResult::SafetyModified {
                    desired,
                    original,
                    reason,
                    modified_by,
                    from_override: override_source.is_some(),
                }
            }
            SafetyEvaluationResult::Refused { rule_id, reason, .. } => {
                CalculationResult::SafetyRefused { rule_id, reason, proposed }
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_domain::{DeviceType, UserIntent};
    use hearth_rules::{EngineSettings, MaxFanSpeed, PumpFireInterlock};
    use hearth_store::{InMemoryOverrideStore, OverrideStore as _};

    fn id(controller: &str, component: &str) -> DeviceId {
        DeviceId::new(controller, component).unwrap()
    }

    fn calculator_with(
        overrides: Arc<InMemoryOverrideStore>,
        engine: SafetyRuleEngine,
    ) -> StateCalculator {
        StateCalculator::new(overrides, Arc::new(engine))
    }

    fn snapshot_with_intent(device: &DeviceId, value: DeviceValue) -> DeviceTwinSnapshot {
        let device_type = value.device_type();
        let mut snap = DeviceTwinSnapshot::empty(device.clone(), device_type);
        snap.intent =
            Some(UserIntent::new(device.clone(), device_type, value, Utc::now()).unwrap());
        snap
    }

    #[tokio::test]
    async fn no_inputs_yields_no_value() {
        let calc = calculator_with(
            Arc::new(InMemoryOverrideStore::new()),
            SafetyRuleEngine::new(EngineSettings::default()),
        );
        let snap = DeviceTwinSnapshot::empty(id("ctl", "light"), DeviceType::Relay);
        let result = calc
            .calculate(&snap, None, HashMap::new(), HashMap::new(), Utc::now())
            .await
            .unwrap();
        assert!(matches!(result, CalculationResult::NoValue { .. }));
    }

    #[tokio::test]
    async fn intent_passes_through_when_no_override() {
        let calc = calculator_with(
            Arc::new(InMemoryOverrideStore::new()),
            SafetyRuleEngine::new(EngineSettings::default()),
        );
        let device = id("ctl", "light");
        let snap = snapshot_with_intent(&device, DeviceValue::relay(true));
        let result = calc
            .calculate(&snap, None, HashMap::new(), HashMap::new(), Utc::now())
            .await
            .unwrap();
        match result {
            CalculationResult::FromIntent { desired } => {
                assert_eq!(desired.value, DeviceValue::relay(true));
            }
            other => panic!("expected intent passthrough, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn override_shadows_intent() {
        let overrides = Arc::new(InMemoryOverrideStore::new());
        let device = id("ctl", "light");
        let now = Utc::now();
        overrides
            .save(&Override::new(
                OverrideTarget::Device(device.clone()),
                OverrideCategory::Maintenance,
                DeviceValue::relay(false),
                "filter swap",
                "op",
                now,
            ))
            .await
            .unwrap();

        let calc =
            calculator_with(overrides, SafetyRuleEngine::new(EngineSettings::default()));
        let snap = snapshot_with_intent(&device, DeviceValue::relay(true));
        let result =
            calc.calculate(&snap, None, HashMap::new(), HashMap::new(), now).await.unwrap();
        match result {
            CalculationResult::FromOverride { desired, category, .. } => {
                assert_eq!(desired.value, DeviceValue::relay(false));
                assert_eq!(category, OverrideCategory::Maintenance);
            }
            other => panic!("expected override, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn system_emergency_beats_device_manual() {
        // Scenario S4: MANUAL on the device, EMERGENCY on the system.
        let overrides = Arc::new(InMemoryOverrideStore::new());
        let device = id("esp", "pump");
        let now = Utc::now();
        let system = FunctionalSystem::new(hearth_domain::SystemType::Fireplace, "camino", now);

        overrides
            .save(&Override::new(
                OverrideTarget::Device(device.clone()),
                OverrideCategory::Manual,
                DeviceValue::relay(false),
                "operator off",
                "op",
                now,
            ))
            .await
            .unwrap();
        overrides
            .save(&Override::new(
                OverrideTarget::System(system.id),
                OverrideCategory::Emergency,
                DeviceValue::relay(true),
                "emergency run",
                "safety",
                now,
            ))
            .await
            .unwrap();

        let calc =
            calculator_with(overrides, SafetyRuleEngine::new(EngineSettings::default()));
        let effective = calc
            .resolve_effective_for_device(&device, Some(&system), now)
            .await
            .unwrap()
            .unwrap();
        assert!(effective.is_from_system);
        assert_eq!(effective.ovr.category, OverrideCategory::Emergency);
        assert_eq!(effective.ovr.value, DeviceValue::relay(true));
    }

    #[tokio::test]
    async fn category_tie_prefers_device_scope() {
        let overrides = Arc::new(InMemoryOverrideStore::new());
        let device = id("esp", "pump");
        let now = Utc::now();
        let system = FunctionalSystem::new(hearth_domain::SystemType::Fireplace, "camino", now);

        overrides
            .save(&Override::new(
                OverrideTarget::Device(device.clone()),
                OverrideCategory::Emergency,
                DeviceValue::relay(false),
                "device stop",
                "op",
                now,
            ))
            .await
            .unwrap();
        overrides
            .save(&Override::new(
                OverrideTarget::System(system.id),
                OverrideCategory::Emergency,
                DeviceValue::relay(true),
                "system run",
                "safety",
                now,
            ))
            .await
            .unwrap();

        let calc =
            calculator_with(overrides, SafetyRuleEngine::new(EngineSettings::default()));
        let effective = calc
            .resolve_effective_for_device(&device, Some(&system), now)
            .await
            .unwrap()
            .unwrap();
        assert!(!effective.is_from_system);
        assert_eq!(effective.ovr.value, DeviceValue::relay(false));
    }

    #[tokio::test]
    async fn safety_clamps_fan_intent() {
        // Scenario S2 core: intent Fan(4) with maxAllowed 3.
        let mut engine = SafetyRuleEngine::new(EngineSettings::default());
        engine.register(Arc::new(MaxFanSpeed::new(3)));
        let calc = calculator_with(Arc::new(InMemoryOverrideStore::new()), engine);

        let device = id("esp", "fan");
        let snap = snapshot_with_intent(&device, DeviceValue::fan(4).unwrap());
        let result = calc
            .calculate(&snap, None, HashMap::new(), HashMap::new(), Utc::now())
            .await
            .unwrap();
        match result {
            CalculationResult::SafetyModified { desired, original, modified_by, .. } => {
                assert_eq!(desired.value, DeviceValue::fan(3).unwrap());
                assert_eq!(original, DeviceValue::fan(4).unwrap());
                assert_eq!(modified_by, vec![MaxFanSpeed::ID]);
            }
            other => panic!("expected clamp, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn interlock_refuses_with_related_snapshots() {
        // Scenario S3 core: fire off refused while pump desired on.
        let mut engine = SafetyRuleEngine::new(EngineSettings::default());
        engine.register(Arc::new(PumpFireInterlock::new()));
        let calc = calculator_with(Arc::new(InMemoryOverrideStore::new()), engine);

        let fire = id("esp", "fire");
        let pump = id("esp", "pump");
        let snap = snapshot_with_intent(&fire, DeviceValue::relay(false));

        let mut pump_snap = DeviceTwinSnapshot::empty(pump.clone(), DeviceType::Relay);
        pump_snap.desired = Some(
            DesiredDeviceState::new(pump.clone(), DeviceType::Relay, DeviceValue::relay(true))
                .unwrap(),
        );
        let related = HashMap::from([(pump, pump_snap)]);

        let result = calc
            .calculate(&snap, None, related, HashMap::new(), Utc::now())
            .await
            .unwrap();
        match result {
            CalculationResult::SafetyRefused { rule_id, .. } => {
                assert_eq!(rule_id, PumpFireInterlock::ID);
            }
            other => panic!("expected refusal, got {other:?}"),
        }
    }
}
