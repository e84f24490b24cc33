use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceId, DeviceTwinSnapshot, DeviceType, DeviceValue};
use crate::overrides::OverrideCategory;
use crate::system::FunctionalSystem;

// ── Rule categories ───────────────────────────────────────────────────────────

/// Precedence tags over every input to a decision, ascending priority in
/// declaration order. Only `SystemSafety` and `HardcodedSafety` carry rules in
/// the engine; the lower tags exist so override categories report under the
/// same total order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleCategory {
    UserIntent,
    Manual,
    Scheduled,
    Maintenance,
    Emergency,
    SystemSafety,
    HardcodedSafety,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::UserIntent => "USER_INTENT",
            RuleCategory::Manual => "MANUAL",
            RuleCategory::Scheduled => "SCHEDULED",
            RuleCategory::Maintenance => "MAINTENANCE",
            RuleCategory::Emergency => "EMERGENCY",
            RuleCategory::SystemSafety => "SYSTEM_SAFETY",
            RuleCategory::HardcodedSafety => "HARDCODED_SAFETY",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<OverrideCategory> for RuleCategory {
    fn from(c: OverrideCategory) -> Self {
        match c {
            OverrideCategory::Manual => RuleCategory::Manual,
            OverrideCategory::Scheduled => RuleCategory::Scheduled,
            OverrideCategory::Maintenance => RuleCategory::Maintenance,
            OverrideCategory::Emergency => RuleCategory::Emergency,
        }
    }
}

// ── Safety context ────────────────────────────────────────────────────────────

/// Everything a safety rule may look at when judging a proposed value.
/// Immutable; the engine derives per-rule contexts via [`SafetyContext::
/// with_proposed`] as modifications chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyContext {
    pub device_id: DeviceId,
    pub device_type: DeviceType,
    pub current: Option<DeviceTwinSnapshot>,
    pub proposed: DeviceValue,
    pub system: Option<FunctionalSystem>,
    /// Twin snapshots of the other devices in the same functional system.
    pub related: HashMap<DeviceId, DeviceTwinSnapshot>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SafetyContext {
    pub fn new(device_id: DeviceId, device_type: DeviceType, proposed: DeviceValue) -> Self {
        SafetyContext {
            device_id,
            device_type,
            current: None,
            proposed,
            system: None,
            related: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_snapshot(mut self, snapshot: DeviceTwinSnapshot) -> Self {
        self.current = Some(snapshot);
        self
    }

    pub fn with_system(mut self, system: FunctionalSystem) -> Self {
        self.system = Some(system);
        self
    }

    pub fn with_related(mut self, related: HashMap<DeviceId, DeviceTwinSnapshot>) -> Self {
        self.related = related;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// The same context with a different proposed value. Used by the engine to
    /// thread the current value through a rule chain.
    pub fn with_proposed(&self, proposed: DeviceValue) -> Self {
        let mut ctx = self.clone();
        ctx.proposed = proposed;
        ctx
    }

    /// First related device whose component name contains `needle`.
    /// Interlock rules use this to find their counterpart device.
    pub fn related_with_component(&self, needle: &str) -> Option<&DeviceTwinSnapshot> {
        self.related
            .iter()
            .find(|(id, _)| id.component().contains(needle))
            .map(|(_, snap)| snap)
    }

    /// Reported value of the device under evaluation, if it has reported.
    pub fn reported_value(&self) -> Option<&DeviceValue> {
        self.current
            .as_ref()
            .and_then(|snap| snap.reported.as_ref())
            .filter(|r| r.known)
            .and_then(|r| r.value.as_ref())
    }

    /// Current desired value of the device under evaluation.
    pub fn current_desired(&self) -> Option<&DeviceValue> {
        self.current
            .as_ref()
            .and_then(|snap| snap.desired.as_ref())
            .map(|d| &d.value)
    }
}
