use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::{DeviceId, DeviceValue};
use crate::error::DomainError;

// ── Categories ────────────────────────────────────────────────────────────────

/// Override precedence tags, ascending priority in declaration order so the
/// derived `Ord` is the precedence order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideCategory {
    Manual,
    Scheduled,
    Maintenance,
    Emergency,
}

impl OverrideCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideCategory::Manual => "MANUAL",
            OverrideCategory::Scheduled => "SCHEDULED",
            OverrideCategory::Maintenance => "MAINTENANCE",
            OverrideCategory::Emergency => "EMERGENCY",
        }
    }

    pub fn parse_str(s: &str) -> Result<Self, DomainError> {
        match s {
            "MANUAL" => Ok(OverrideCategory::Manual),
            "SCHEDULED" => Ok(OverrideCategory::Scheduled),
            "MAINTENANCE" => Ok(OverrideCategory::Maintenance),
            "EMERGENCY" => Ok(OverrideCategory::Emergency),
            other => Err(DomainError::UnknownOverrideCategory(other.to_string())),
        }
    }

    pub const ALL: [OverrideCategory; 4] = [
        OverrideCategory::Manual,
        OverrideCategory::Scheduled,
        OverrideCategory::Maintenance,
        OverrideCategory::Emergency,
    ];
}

impl fmt::Display for OverrideCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideScope {
    Device,
    System,
}

// ── Target ────────────────────────────────────────────────────────────────────

/// What an override applies to: one device, or every device of a system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideTarget {
    Device(DeviceId),
    System(Uuid),
}

impl OverrideTarget {
    pub fn scope(&self) -> OverrideScope {
        match self {
            OverrideTarget::Device(_) => OverrideScope::Device,
            OverrideTarget::System(_) => OverrideScope::System,
        }
    }

    pub fn as_device(&self) -> Option<&DeviceId> {
        match self {
            OverrideTarget::Device(id) => Some(id),
            OverrideTarget::System(_) => None,
        }
    }

    pub fn as_system(&self) -> Option<Uuid> {
        match self {
            OverrideTarget::System(id) => Some(*id),
            OverrideTarget::Device(_) => None,
        }
    }
}

impl fmt::Display for OverrideTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideTarget::Device(id) => write!(f, "{id}"),
            OverrideTarget::System(id) => write!(f, "{id}"),
        }
    }
}

// ── Override ──────────────────────────────────────────────────────────────────

/// An (optionally expiring) assertion of a desired value at a precedence
/// category. Shadows user intent for as long as it is active.
///
/// At most one override is active per `(target, category)`; a new write for
/// the same pair replaces the previous one. `expires_at = None` is permanent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Override {
    /// Storage primary key: `<targetId>:<category>`.
    pub id: String,
    pub target: OverrideTarget,
    pub category: OverrideCategory,
    pub value: DeviceValue,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub version: u64,
}

impl Override {
    pub fn new(
        target: OverrideTarget,
        category: OverrideCategory,
        value: DeviceValue,
        reason: impl Into<String>,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Override {
            id: Override::storage_id(&target, category),
            target,
            category,
            value,
            reason: reason.into(),
            expires_at: None,
            created_at: now,
            created_by: created_by.into(),
            version: 0,
        }
    }

    pub fn storage_id(target: &OverrideTarget, category: OverrideCategory) -> String {
        format!("{target}:{category}")
    }

    pub fn scope(&self) -> OverrideScope {
        self.target.scope()
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}
