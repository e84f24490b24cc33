use async_trait::async_trait;
use hearth_domain::{
    DesiredDeviceState, DeviceId, DeviceTwinSnapshot, DeviceType, ReportedDeviceState, UserIntent,
};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Storage key for a twin record: `device:<controllerId>:<componentId>`.
pub fn twin_key(id: &DeviceId) -> String {
    format!("device:{id}")
}

/// The persisted hash-like record holding the three twin fields for one
/// device. Fields are independent: writing one never clobbers the others.
/// `version` increments on every write and backs the optimistic check in
/// stores where concurrent writers exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwinRecord {
    pub intent: Option<UserIntent>,
    pub reported: Option<ReportedDeviceState>,
    pub desired: Option<DesiredDeviceState>,
    pub version: u64,
}

impl TwinRecord {
    pub fn is_empty(&self) -> bool {
        self.intent.is_none() && self.reported.is_none() && self.desired.is_none()
    }

    /// The record's device type, taken from the first present field.
    pub fn device_type(&self) -> Option<DeviceType> {
        self.desired
            .as_ref()
            .map(|d| d.device_type)
            .or_else(|| self.intent.as_ref().map(|i| i.device_type))
            .or_else(|| self.reported.as_ref().map(|r| r.device_type))
    }

    /// Assemble the snapshot, verifying type consistency across fields.
    pub fn snapshot(&self, id: &DeviceId) -> Result<Option<DeviceTwinSnapshot>, StoreError> {
        let Some(device_type) = self.device_type() else {
            return Ok(None);
        };
        let snapshot = DeviceTwinSnapshot {
            id: id.clone(),
            device_type,
            intent: self.intent.clone(),
            reported: self.reported.clone(),
            desired: self.desired.clone(),
        };
        if !snapshot.is_consistent() {
            return Err(StoreError::InvariantViolation(format!(
                "twin record {} carries fields of differing device types",
                twin_key(id)
            )));
        }
        Ok(Some(snapshot))
    }
}

/// Source of truth for the three per-device twin states.
///
/// Implementations must keep an index of devices that currently have a
/// desired state, maintained on every desired write: that index feeds the
/// reconciler loop via [`TwinStore::active_output_devices`].
#[async_trait]
pub trait TwinStore: Send + Sync + 'static {
    async fn save_intent(&self, intent: &UserIntent) -> Result<(), StoreError>;
    async fn save_reported(&self, reported: &ReportedDeviceState) -> Result<(), StoreError>;

    /// Idempotent with respect to the active-output index.
    async fn save_desired(&self, desired: &DesiredDeviceState) -> Result<(), StoreError>;

    /// Remove the desired field and the device's index entry.
    async fn clear_desired(&self, id: &DeviceId) -> Result<(), StoreError>;

    async fn find_intent(&self, id: &DeviceId) -> Result<Option<UserIntent>, StoreError>;
    async fn find_reported(&self, id: &DeviceId)
        -> Result<Option<ReportedDeviceState>, StoreError>;
    async fn find_desired(&self, id: &DeviceId) -> Result<Option<DesiredDeviceState>, StoreError>;

    /// Atomic multi-field read of the whole record.
    async fn find_snapshot(&self, id: &DeviceId)
        -> Result<Option<DeviceTwinSnapshot>, StoreError>;

    /// Every output device that currently has a desired state set.
    async fn active_output_devices(&self) -> Result<Vec<DesiredDeviceState>, StoreError>;
}
