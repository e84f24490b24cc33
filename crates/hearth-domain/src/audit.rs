use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::{DeviceId, DeviceValue};

// ── Correlation ───────────────────────────────────────────────────────────────

/// Identifier propagated from the inbound edge through every decision an
/// input causes, and persisted in every audit entry it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        CorrelationId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CorrelationId(Uuid::parse_str(s)?))
    }
}

// ── Decision types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    IntentReceived,
    IntentRejected,
    IntentModified,
    DesiredCalculated,
    OverrideApplied,
    OverrideBlocked,
    OverrideExpired,
    SafetyRuleActivated,
    DeviceConverged,
    DeviceDiverged,
    FallbackActivated,
    FailSafeApplied,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::IntentReceived => "INTENT_RECEIVED",
            DecisionType::IntentRejected => "INTENT_REJECTED",
            DecisionType::IntentModified => "INTENT_MODIFIED",
            DecisionType::DesiredCalculated => "DESIRED_CALCULATED",
            DecisionType::OverrideApplied => "OVERRIDE_APPLIED",
            DecisionType::OverrideBlocked => "OVERRIDE_BLOCKED",
            DecisionType::OverrideExpired => "OVERRIDE_EXPIRED",
            DecisionType::SafetyRuleActivated => "SAFETY_RULE_ACTIVATED",
            DecisionType::DeviceConverged => "DEVICE_CONVERGED",
            DecisionType::DeviceDiverged => "DEVICE_DIVERGED",
            DecisionType::FallbackActivated => "FALLBACK_ACTIVATED",
            DecisionType::FailSafeApplied => "FAIL_SAFE_APPLIED",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Audit entry ───────────────────────────────────────────────────────────────

/// One appended record per decision the control plane takes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
    pub device_id: Option<DeviceId>,
    pub system_id: Option<Uuid>,
    pub decision: DecisionType,
    pub actor: String,
    pub previous_value: Option<DeviceValue>,
    pub new_value: Option<DeviceValue>,
    pub reason: String,
    pub context: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        correlation_id: CorrelationId,
        decision: DecisionType,
        actor: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        AuditEntry {
            id: Uuid::new_v4(),
            correlation_id,
            timestamp: now,
            device_id: None,
            system_id: None,
            decision,
            actor: actor.into(),
            previous_value: None,
            new_value: None,
            reason: String::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn for_device(mut self, id: DeviceId) -> Self {
        self.device_id = Some(id);
        self
    }

    pub fn for_system(mut self, id: Uuid) -> Self {
        self.system_id = Some(id);
        self
    }

    pub fn with_values(
        mut self,
        previous: Option<DeviceValue>,
        new: Option<DeviceValue>,
    ) -> Self {
        self.previous_value = previous;
        self.new_value = new;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}
