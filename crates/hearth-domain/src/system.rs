use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::{DeviceId, DeviceValue};

// ── System type ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemType {
    Fireplace,
    Hvac,
    Irrigation,
    Generic,
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemType::Fireplace => "FIREPLACE",
            SystemType::Hvac => "HVAC",
            SystemType::Irrigation => "IRRIGATION",
            SystemType::Generic => "GENERIC",
        };
        write!(f, "{s}")
    }
}

// ── Functional system ─────────────────────────────────────────────────────────

/// A logical installation grouping several devices: a fireplace with its pump,
/// fire relay and fan, an HVAC zone, an irrigation line.
///
/// Membership is exclusive: a device belongs to at most one system. The
/// registry enforces this on save. `version` increments on every mutation and
/// backs optimistic concurrency in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalSystem {
    pub id: Uuid,
    pub system_type: SystemType,
    pub name: String,
    pub configuration: HashMap<String, serde_json::Value>,
    pub device_ids: HashSet<DeviceId>,
    /// Per-device value to drive when the system is ordered into fail-safe.
    pub fail_safe_defaults: HashMap<DeviceId, DeviceValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl FunctionalSystem {
    pub fn new(system_type: SystemType, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        FunctionalSystem {
            id: Uuid::new_v4(),
            system_type,
            name: name.into(),
            configuration: HashMap::new(),
            device_ids: HashSet::new(),
            fail_safe_defaults: HashMap::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn contains_device(&self, id: &DeviceId) -> bool {
        self.device_ids.contains(id)
    }

    /// Record a mutation: bump the version and stamp `updated_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }

    pub fn add_device(&mut self, id: DeviceId, now: DateTime<Utc>) -> bool {
        let added = self.device_ids.insert(id);
        if added {
            self.touch(now);
        }
        added
    }

    pub fn remove_device(&mut self, id: &DeviceId, now: DateTime<Utc>) -> bool {
        let removed = self.device_ids.remove(id);
        if removed {
            self.fail_safe_defaults.remove(id);
            self.touch(now);
        }
        removed
    }
}
