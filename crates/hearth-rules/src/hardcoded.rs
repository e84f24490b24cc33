//! Hardcoded safety rules. These ship compiled in, always run, and sit in the
//! highest category so nothing can shadow them.

use hearth_domain::{DeviceType, DeviceValue, RuleCategory, SafetyContext};

use crate::error::RuleError;
use crate::rule::{RuleOutcome, SafetyRule};

/// A fire must not lose its pump: while the related pump's desired state is
/// on, turning the fire-matching relay off is refused outright.
#[derive(Debug, Clone)]
pub struct PumpFireInterlock {
    fire_pattern: String,
    pump_pattern: String,
}

impl PumpFireInterlock {
    pub const ID: &'static str = "PUMP_FIRE_INTERLOCK";

    pub fn new() -> Self {
        Self::with_patterns("fire", "pump")
    }

    pub fn with_patterns(fire: impl Into<String>, pump: impl Into<String>) -> Self {
        PumpFireInterlock { fire_pattern: fire.into(), pump_pattern: pump.into() }
    }
}

impl Default for PumpFireInterlock {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyRule for PumpFireInterlock {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "pump/fire interlock (fire side)"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::HardcodedSafety
    }

    fn priority(&self) -> i32 {
        10
    }

    fn applies_to(&self, ctx: &SafetyContext) -> bool {
        ctx.device_id.component().contains(&self.fire_pattern)
            && ctx.device_type == DeviceType::Relay
    }

    fn evaluate(&self, ctx: &SafetyContext) -> Result<RuleOutcome, RuleError> {
        let pump_desired_on = ctx
            .related_with_component(&self.pump_pattern)
            .and_then(|snap| snap.desired.as_ref())
            .map_or(false, |d| d.value == DeviceValue::relay(true));

        if ctx.proposed == DeviceValue::relay(false) && pump_desired_on {
            return Ok(RuleOutcome::Refused {
                reason: "fire cannot be switched off while the pump is commanded on".into(),
                detail: Some(format!(
                    "related '{}' device has desired Relay(true)",
                    self.pump_pattern
                )),
            });
        }
        Ok(RuleOutcome::Accepted)
    }
}

/// The inverse interlock on the pump side: instead of refusing, keep the pump
/// running by rewriting the proposed off to on while the fire is commanded on.
#[derive(Debug, Clone)]
pub struct FirePumpInterlock {
    fire_pattern: String,
    pump_pattern: String,
}

impl FirePumpInterlock {
    pub const ID: &'static str = "FIRE_PUMP_INTERLOCK";

    pub fn new() -> Self {
        Self::with_patterns("fire", "pump")
    }

    pub fn with_patterns(fire: impl Into<String>, pump: impl Into<String>) -> Self {
        FirePumpInterlock { fire_pattern: fire.into(), pump_pattern: pump.into() }
    }
}

impl Default for FirePumpInterlock {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyRule for FirePumpInterlock {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "pump/fire interlock (pump side)"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::HardcodedSafety
    }

    fn priority(&self) -> i32 {
        20
    }

    fn applies_to(&self, ctx: &SafetyContext) -> bool {
        ctx.device_id.component().contains(&self.pump_pattern)
            && ctx.device_type == DeviceType::Relay
    }

    fn evaluate(&self, ctx: &SafetyContext) -> Result<RuleOutcome, RuleError> {
        let fire_desired_on = ctx
            .related_with_component(&self.fire_pattern)
            .and_then(|snap| snap.desired.as_ref())
            .map_or(false, |d| d.value == DeviceValue::relay(true));

        if ctx.proposed == DeviceValue::relay(false) && fire_desired_on {
            return Ok(RuleOutcome::Modified {
                value: DeviceValue::relay(true),
                reason: "pump kept running while the fire is commanded on".into(),
            });
        }
        Ok(RuleOutcome::Accepted)
    }

    fn suggest_correction(&self, _ctx: &SafetyContext) -> Option<DeviceValue> {
        Some(DeviceValue::relay(true))
    }
}

/// Clamp fan speeds to a configured ceiling.
#[derive(Debug, Clone)]
pub struct MaxFanSpeed {
    max_allowed: u8,
}

impl MaxFanSpeed {
    pub const ID: &'static str = "MAX_FAN_SPEED";

    pub fn new(max_allowed: u8) -> Self {
        MaxFanSpeed { max_allowed }
    }
}

impl Default for MaxFanSpeed {
    fn default() -> Self {
        Self::new(4)
    }
}

impl SafetyRule for MaxFanSpeed {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "maximum fan speed"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::HardcodedSafety
    }

    fn priority(&self) -> i32 {
        30
    }

    fn applies_to(&self, ctx: &SafetyContext) -> bool {
        ctx.device_type == DeviceType::Fan
    }

    fn evaluate(&self, ctx: &SafetyContext) -> Result<RuleOutcome, RuleError> {
        let DeviceValue::Fan(speed) = ctx.proposed else {
            return Ok(RuleOutcome::Accepted);
        };
        if speed.get() > self.max_allowed {
            let clamped = DeviceValue::fan(speed.get().min(self.max_allowed)).map_err(|_| {
                RuleError::InvalidValue {
                    device_type: ctx.device_type.to_string(),
                    value: self.max_allowed.to_string(),
                }
            })?;
            return Ok(RuleOutcome::Modified {
                value: clamped,
                reason: format!("fan speed clamped to {}", self.max_allowed),
            });
        }
        Ok(RuleOutcome::Accepted)
    }

    fn suggest_correction(&self, ctx: &SafetyContext) -> Option<DeviceValue> {
        match ctx.proposed {
            DeviceValue::Fan(speed) if speed.get() > self.max_allowed => {
                DeviceValue::fan(self.max_allowed).ok()
            }
            _ => None,
        }
    }
}
