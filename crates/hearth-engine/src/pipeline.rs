use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use hearth_domain::{
    AuditEntry, CorrelationId, DecisionType, DeviceId, DeviceTwinSnapshot, DeviceValue,
    FunctionalSystem, Override, OverrideCategory, OverrideTarget, SafetyContext,
};
use hearth_rules::{SafetyEvaluationResult, SafetyRuleEngine};
use hearth_store::{AuditStore, OverrideStore, SystemRegistry, TwinStore};
use tracing::debug;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::calculator::{EffectiveOverride, StateCalculator};
use crate::error::EngineError;
use crate::events::Event;
use crate::sensors::SensorReadings;

/// An override as requested over the API, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideRequest {
    pub target: OverrideTarget,
    pub category: OverrideCategory,
    pub value: DeviceValue,
    pub reason: String,
    pub ttl_seconds: Option<u64>,
    pub created_by: String,
}

/// Outcome of validating (and possibly applying) an override request.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValidationResult {
    Applied {
        applied: Override,
        warnings: Vec<String>,
    },
    Blocked {
        reason: String,
        blocking_rules: Vec<String>,
    },
    Modified {
        applied: Override,
        original: DeviceValue,
        modified: DeviceValue,
        modifying_rules: Vec<String>,
    },
}

/// What the safety pass decided before persistence.
enum Verdict {
    Pass {
        value: DeviceValue,
        modifying_rules: Vec<String>,
        warnings: Vec<String>,
    },
    Block {
        reason: String,
        blocking_rules: Vec<String>,
    },
}

/// Validates override requests through the safety engine and persists the
/// survivors.
///
/// System-scoped requests are validated against every member device: one
/// refusal blocks the whole request; a modification downgrades the stored
/// value (first modified value wins, all modifying rules reported).
pub struct OverrideValidationPipeline {
    twins: Arc<dyn TwinStore>,
    registry: Arc<dyn SystemRegistry>,
    overrides: Arc<dyn OverrideStore>,
    engine: Arc<SafetyRuleEngine>,
    calculator: Arc<StateCalculator>,
    bus: EventBus,
    audit: Arc<dyn AuditStore>,
    sensors: SensorReadings,
}

impl OverrideValidationPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        twins: Arc<dyn TwinStore>,
        registry: Arc<dyn SystemRegistry>,
        overrides: Arc<dyn OverrideStore>,
        engine: Arc<SafetyRuleEngine>,
        calculator: Arc<StateCalculator>,
        bus: EventBus,
        audit: Arc<dyn AuditStore>,
        sensors: SensorReadings,
    ) -> Self {
        OverrideValidationPipeline {
            twins,
            registry,
            overrides,
            engine,
            calculator,
            bus,
            audit,
            sensors,
        }
    }

    async fn context_for_device(
        &self,
        device: &DeviceId,
        proposed: DeviceValue,
        system: Option<&FunctionalSystem>,
    ) -> Result<SafetyContext, EngineError> {
        let snapshot = self.twins.find_snapshot(device).await?;
        let device_type = snapshot
            .as_ref()
            .map(|s| s.device_type)
            .unwrap_or_else(|| proposed.device_type());

        let mut related: HashMap<DeviceId, DeviceTwinSnapshot> = HashMap::new();
        if let Some(sys) = system {
            for member in &sys.device_ids {
                if member == device {
                    continue;
                }
                if let Some(snap) = self.twins.find_snapshot(member).await? {
                    related.insert(member.clone(), snap);
                }
            }
        }

        let mut ctx = SafetyContext::new(device.clone(), device_type, proposed)
            .with_related(related)
            .with_metadata(self.sensors.snapshot());
        if let Some(snap) = snapshot {
            ctx = ctx.with_snapshot(snap);
        }
        if let Some(sys) = system {
            ctx = ctx.with_system(sys.clone());
        }
        Ok(ctx)
    }

    async fn judge(&self, req: &OverrideRequest) -> Result<Verdict, EngineError> {
        match &req.target {
            OverrideTarget::Device(device) => {
                let snapshot = self.twins.find_snapshot(device).await?;
                if let Some(snap) = &snapshot {
                    if !req.value.matches(snap.device_type) {
                        return Err(EngineError::Validation(format!(
                            "value {} is not valid for {} device {}",
                            req.value, snap.device_type, device
                        )));
                    }
                }
                let system = self.registry.find_by_device(device).await?;
                let ctx =
                    self.context_for_device(device, req.value, system.as_ref()).await?;
                let evaluation = self.engine.evaluate(&ctx);
                Ok(match evaluation.result {
                    SafetyEvaluationResult::Accepted => Verdict::Pass {
                        value: req.value,
                        modifying_rules: Vec::new(),
                        warnings: Vec::new(),
                    },
                    SafetyEvaluationResult::Modified { value, modified_by, .. } => {
                        Verdict::Pass {
                            value,
                            modifying_rules: modified_by,
                            warnings: Vec::new(),
                        }
                    }
                    SafetyEvaluationResult::Refused { rule_id, reason, .. } => {
                        Verdict::Block { reason, blocking_rules: vec![rule_id] }
                    }
                })
            }
            OverrideTarget::System(system_id) => {
                let Some(system) = self.registry.find_by_id(*system_id).await? else {
                    return Ok(Verdict::Block {
                        reason: "system not found".into(),
                        blocking_rules: Vec::new(),
                    });
                };

                let mut members: Vec<&DeviceId> = system.device_ids.iter().collect();
                members.sort();

                let mut final_value = req.value;
                let mut modifying_rules: Vec<String> = Vec::new();
                let mut warnings: Vec<String> = Vec::new();
                let mut first_modification = true;

                for member in members {
                    let snapshot = self.twins.find_snapshot(member).await?;
                    if let Some(snap) = &snapshot {
                        if !req.value.matches(snap.device_type) {
                            warnings.push(format!(
                                "member {member} is a {} device; skipped",
                                snap.device_type
                            ));
                            continue;
                        }
                    }
                    let ctx =
                        self.context_for_device(member, req.value, Some(&system)).await?;
                    let evaluation = self.engine.evaluate(&ctx);
                    match evaluation.result {
                        SafetyEvaluationResult::Accepted => {}
                        SafetyEvaluationResult::Modified { value, mut modified_by, .. } => {
                            if first_modification {
                                final_value = value;
                                first_modification = false;
                            }
                            modifying_rules.append(&mut modified_by);
                        }
                        SafetyEvaluationResult::Refused { rule_id, reason, .. } => {
                            return Ok(Verdict::Block {
                                reason: format!("member {member}: {reason}"),
                                blocking_rules: vec![rule_id],
                            });
                        }
                    }
                }

                modifying_rules.dedup();
                Ok(Verdict::Pass { value: final_value, modifying_rules, warnings })
            }
        }
    }

    fn build_override(&self, req: &OverrideRequest, value: DeviceValue) -> Override {
        let now = Utc::now();
        let ovr = Override::new(
            req.target.clone(),
            req.category,
            value,
            req.reason.clone(),
            req.created_by.clone(),
            now,
        );
        match req.ttl_seconds {
            Some(ttl) => ovr.with_expiry(now + ChronoDuration::seconds(ttl as i64)),
            None => ovr,
        }
    }

    /// Validate and, when accepted, persist and announce the override.
    pub async fn apply(
        &self,
        req: OverrideRequest,
        correlation: CorrelationId,
    ) -> Result<OverrideValidationResult, EngineError> {
        let verdict = self.judge(&req).await?;
        match verdict {
            Verdict::Block { reason, blocking_rules } => {
                self.audit_decision(
                    &req,
                    DecisionType::OverrideBlocked,
                    None,
                    &reason,
                    serde_json::json!({ "blockingRules": blocking_rules }),
                    correlation,
                )
                .await?;
                Ok(OverrideValidationResult::Blocked { reason, blocking_rules })
            }
            Verdict::Pass { value, modifying_rules, warnings } => {
                let stored = self.overrides.save(&self.build_override(&req, value)).await?;
                self.audit_decision(
                    &req,
                    DecisionType::OverrideApplied,
                    Some(value),
                    &req.reason,
                    serde_json::json!({
                        "category": req.category,
                        "modifyingRules": modifying_rules,
                        "warnings": warnings,
                    }),
                    correlation,
                )
                .await?;
                self.bus
                    .publish(Event::OverrideApplied { applied: stored.clone(), correlation })
                    .await?;

                if modifying_rules.is_empty() {
                    Ok(OverrideValidationResult::Applied { applied: stored, warnings })
                } else {
                    Ok(OverrideValidationResult::Modified {
                        applied: stored,
                        original: req.value,
                        modified: value,
                        modifying_rules,
                    })
                }
            }
        }
    }

    /// Validation without persistence or events.
    pub async fn validate_only(
        &self,
        req: OverrideRequest,
    ) -> Result<OverrideValidationResult, EngineError> {
        let verdict = self.judge(&req).await?;
        Ok(match verdict {
            Verdict::Block { reason, blocking_rules } => {
                OverrideValidationResult::Blocked { reason, blocking_rules }
            }
            Verdict::Pass { value, modifying_rules, warnings } => {
                let candidate = self.build_override(&req, value);
                if modifying_rules.is_empty() {
                    OverrideValidationResult::Applied { applied: candidate, warnings }
                } else {
                    OverrideValidationResult::Modified {
                        applied: candidate,
                        original: req.value,
                        modified: value,
                        modifying_rules,
                    }
                }
            }
        })
    }

    /// Remove an override. Returns true when one existed.
    pub async fn cancel(
        &self,
        target: OverrideTarget,
        category: OverrideCategory,
        correlation: CorrelationId,
    ) -> Result<bool, EngineError> {
        let deleted =
            self.overrides.delete_by_target_and_category(&target, category).await?;
        if deleted {
            debug!(target = %target, category = %category, "override cancelled");
            self.bus
                .publish(Event::OverrideCancelled { target, category, correlation })
                .await?;
        }
        Ok(deleted)
    }

    pub async fn resolve_effective(
        &self,
        target: &OverrideTarget,
    ) -> Result<Option<Override>, EngineError> {
        Ok(self.overrides.find_effective_by_target(target, Utc::now()).await?)
    }

    /// The override that currently wins for a device, considering its system
    /// stack when a system id is given (or discoverable).
    pub async fn resolve_effective_for_device(
        &self,
        device: &DeviceId,
        system_id: Option<Uuid>,
    ) -> Result<Option<EffectiveOverride>, EngineError> {
        let system = match system_id {
            Some(id) => self.registry.find_by_id(id).await?,
            None => self.registry.find_by_device(device).await?,
        };
        self.calculator
            .resolve_effective_for_device(device, system.as_ref(), Utc::now())
            .await
    }

    pub async fn list_active(
        &self,
        target: &OverrideTarget,
    ) -> Result<Vec<Override>, EngineError> {
        Ok(self.overrides.find_active_by_target(target, Utc::now()).await?)
    }

    async fn audit_decision(
        &self,
        req: &OverrideRequest,
        decision: DecisionType,
        new_value: Option<DeviceValue>,
        reason: &str,
        context: serde_json::Value,
        correlation: CorrelationId,
    ) -> Result<(), EngineError> {
        let mut entry = AuditEntry::new(correlation, decision, &req.created_by, Utc::now())
            .with_values(None, new_value)
            .with_reason(reason)
            .with_context(context);
        match &req.target {
            OverrideTarget::Device(device) => entry = entry.for_device(device.clone()),
            OverrideTarget::System(system) => entry = entry.for_system(*system),
        }
        self.audit.append(&entry).await?;
        Ok(())
    }
}
