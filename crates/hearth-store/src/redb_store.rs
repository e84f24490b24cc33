use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_domain::{
    DesiredDeviceState, DeviceId, DeviceTwinSnapshot, ReportedDeviceState, UserIntent,
};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::twin::{twin_key, TwinRecord, TwinStore};

const TWINS: TableDefinition<&str, &[u8]> = TableDefinition::new("twins");
const ACTIVE_OUTPUTS: TableDefinition<&str, ()> = TableDefinition::new("index:active:outputs");

/// Bounded retry budget for the optimistic per-record version check.
const VERSION_RETRIES: usize = 3;

/// Persistent twin store backed by a redb database file.
///
/// One record per device under `device:<controllerId>:<componentId>`, holding
/// the three twin fields plus a version counter. The active-output index is a
/// separate key set updated in the same write transaction as the desired
/// field, so the two can never drift.
#[derive(Clone)]
pub struct RedbTwinStore {
    db: Arc<Database>,
}

impl RedbTwinStore {
    /// Open (or create) a redb database at `path`.
    ///
    /// Parent directories are created automatically.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        let db = Database::create(path).map_err(|e| StoreError::Internal(e.to_string()))?;

        // Ensure tables exist
        {
            let wtxn = db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
            wtxn.open_table(TWINS).map_err(|e| StoreError::Internal(e.to_string()))?;
            wtxn.open_table(ACTIVE_OUTPUTS).map_err(|e| StoreError::Internal(e.to_string()))?;
            wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
        }

        Ok(Self { db: Arc::new(db) })
    }

    fn read_record(&self, key: &str) -> Result<Option<TwinRecord>, StoreError> {
        let rtxn = self.db.begin_read().map_err(|e| StoreError::Internal(e.to_string()))?;
        let table = rtxn.open_table(TWINS).map_err(|e| StoreError::Internal(e.to_string()))?;
        match table.get(key).map_err(|e| StoreError::Internal(e.to_string()))? {
            Some(guard) => {
                let record: TwinRecord = serde_json::from_slice(guard.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Optimistic read-modify-write of one record. `mutate` receives the
    /// current record (default for a fresh device) and returns whether the
    /// device should be present in the active-output index afterwards.
    ///
    /// The version observed at read time is re-checked inside the write
    /// transaction; a mismatch means another writer got in between, and the
    /// update is retried against the fresh record up to [`VERSION_RETRIES`]
    /// times before surfacing a conflict.
    fn update_record<F>(&self, id: &DeviceId, mutate: F) -> Result<(), StoreError>
    where
        F: Fn(&mut TwinRecord) -> Option<bool>,
    {
        let key = twin_key(id);
        for _ in 0..VERSION_RETRIES {
            let (mut record, observed_version) = match self.read_record(&key)? {
                Some(r) => {
                    let version = r.version;
                    (r, Some(version))
                }
                None => (TwinRecord::default(), None),
            };
            let index_membership = mutate(&mut record);
            record.version += 1;
            let bytes = serde_json::to_vec(&record)?;

            let wtxn =
                self.db.begin_write().map_err(|e| StoreError::Internal(e.to_string()))?;
            {
                let mut table =
                    wtxn.open_table(TWINS).map_err(|e| StoreError::Internal(e.to_string()))?;
                let current_version = table
                    .get(key.as_str())
                    .map_err(|e| StoreError::Internal(e.to_string()))?
                    .map(|guard| serde_json::from_slice::<TwinRecord>(guard.value()))
                    .transpose()?
                    .map(|r| r.version);
                if current_version != observed_version {
                    drop(table);
                    wtxn.abort().map_err(|e| StoreError::Internal(e.to_string()))?;
                    continue; // lost the race, retry against the fresh record
                }
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| StoreError::Internal(e.to_string()))?;

                let mut index = wtxn
                    .open_table(ACTIVE_OUTPUTS)
                    .map_err(|e| StoreError::Internal(e.to_string()))?;
                match index_membership {
                    Some(true) => {
                        index
                            .insert(key.as_str(), ())
                            .map_err(|e| StoreError::Internal(e.to_string()))?;
                    }
                    Some(false) => {
                        index
                            .remove(key.as_str())
                            .map_err(|e| StoreError::Internal(e.to_string()))?;
                    }
                    None => {}
                }
            }
            wtxn.commit().map_err(|e| StoreError::Internal(e.to_string()))?;
            return Ok(());
        }
        Err(StoreError::Conflict { key })
    }
}

#[async_trait]
impl TwinStore for RedbTwinStore {
    async fn save_intent(&self, intent: &UserIntent) -> Result<(), StoreError> {
        self.update_record(&intent.id, |record| {
            record.intent = Some(intent.clone());
            None
        })
    }

    async fn save_reported(&self, reported: &ReportedDeviceState) -> Result<(), StoreError> {
        self.update_record(&reported.id, |record| {
            record.reported = Some(reported.clone());
            None
        })
    }

    async fn save_desired(&self, desired: &DesiredDeviceState) -> Result<(), StoreError> {
        self.update_record(&desired.id, |record| {
            record.desired = Some(desired.clone());
            Some(desired.device_type.is_output())
        })
    }

    async fn clear_desired(&self, id: &DeviceId) -> Result<(), StoreError> {
        self.update_record(id, |record| {
            record.desired = None;
            Some(false)
        })
    }

    async fn find_intent(&self, id: &DeviceId) -> Result<Option<UserIntent>, StoreError> {
        Ok(self.read_record(&twin_key(id))?.and_then(|r| r.intent))
    }

    async fn find_reported(
        &self,
        id: &DeviceId,
    ) -> Result<Option<ReportedDeviceState>, StoreError> {
        Ok(self.read_record(&twin_key(id))?.and_then(|r| r.reported))
    }

    async fn find_desired(
        &self,
        id: &DeviceId,
    ) -> Result<Option<DesiredDeviceState>, StoreError> {
        Ok(self.read_record(&twin_key(id))?.and_then(|r| r.desired))
    }

    async fn find_snapshot(
        &self,
        id: &DeviceId,
    ) -> Result<Option<DeviceTwinSnapshot>, StoreError> {
        match self.read_record(&twin_key(id))? {
            Some(record) => record.snapshot(id),
            None => Ok(None),
        }
    }

    async fn active_output_devices(&self) -> Result<Vec<DesiredDeviceState>, StoreError> {
        let rtxn = self.db.begin_read().map_err(|e| StoreError::Internal(e.to_string()))?;
        let index =
            rtxn.open_table(ACTIVE_OUTPUTS).map_err(|e| StoreError::Internal(e.to_string()))?;
        let twins = rtxn.open_table(TWINS).map_err(|e| StoreError::Internal(e.to_string()))?;

        let mut out = Vec::new();
        for entry in index.iter().map_err(|e| StoreError::Internal(e.to_string()))? {
            let (key, _) = entry.map_err(|e| StoreError::Internal(e.to_string()))?;
            let Some(guard) =
                twins.get(key.value()).map_err(|e| StoreError::Internal(e.to_string()))?
            else {
                return Err(StoreError::InvariantViolation(format!(
                    "indexed key {} has no twin record",
                    key.value()
                )));
            };
            let record: TwinRecord = serde_json::from_slice(guard.value())?;
            let Some(desired) = record.desired else {
                return Err(StoreError::InvariantViolation(format!(
                    "indexed key {} has no desired state",
                    key.value()
                )));
            };
            out.push(desired);
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hearth_domain::{DeviceType, DeviceValue};

    fn open_store() -> (tempfile::TempDir, RedbTwinStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbTwinStore::open(&dir.path().join("twins.redb")).unwrap();
        (dir, store)
    }

    fn id(controller: &str, component: &str) -> DeviceId {
        DeviceId::new(controller, component).unwrap()
    }

    #[tokio::test]
    async fn round_trips_all_three_fields() {
        let (_dir, store) = open_store();
        let device = id("esp", "fan");
        let now = Utc::now();

        let intent =
            UserIntent::new(device.clone(), DeviceType::Fan, DeviceValue::fan(3).unwrap(), now)
                .unwrap();
        let reported = ReportedDeviceState::known(
            device.clone(),
            DeviceType::Fan,
            DeviceValue::fan(2).unwrap(),
            now,
        )
        .unwrap();
        let desired =
            DesiredDeviceState::new(device.clone(), DeviceType::Fan, DeviceValue::fan(3).unwrap())
                .unwrap();

        store.save_intent(&intent).await.unwrap();
        store.save_reported(&reported).await.unwrap();
        store.save_desired(&desired).await.unwrap();

        let snap = store.find_snapshot(&device).await.unwrap().unwrap();
        assert_eq!(snap.intent, Some(intent));
        assert_eq!(snap.reported, Some(reported));
        assert_eq!(snap.desired, Some(desired));
        assert!(!snap.is_converged());
    }

    #[tokio::test]
    async fn index_tracks_desired_lifecycle() {
        let (_dir, store) = open_store();
        let device = id("esp", "light");
        let desired =
            DesiredDeviceState::new(device.clone(), DeviceType::Relay, DeviceValue::relay(true))
                .unwrap();

        store.save_desired(&desired).await.unwrap();
        store.save_desired(&desired).await.unwrap();
        let active = store.active_output_devices().await.unwrap();
        assert_eq!(active.len(), 1);

        store.clear_desired(&device).await.unwrap();
        assert!(store.active_output_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twins.redb");
        let device = id("esp", "light");
        let desired =
            DesiredDeviceState::new(device.clone(), DeviceType::Relay, DeviceValue::relay(true))
                .unwrap();

        {
            let store = RedbTwinStore::open(&path).unwrap();
            store.save_desired(&desired).await.unwrap();
        }

        let store = RedbTwinStore::open(&path).unwrap();
        assert_eq!(store.find_desired(&device).await.unwrap(), Some(desired));
        assert_eq!(store.active_output_devices().await.unwrap().len(), 1);
    }
}
