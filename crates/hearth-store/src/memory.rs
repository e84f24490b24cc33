use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_domain::{
    AuditEntry, CorrelationId, DecisionType, DesiredDeviceState, DeviceId, DeviceTwinSnapshot,
    FunctionalSystem, Override, OverrideCategory, OverrideTarget, ReportedDeviceState, UserIntent,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::{AuditStore, TimeRange};
use crate::error::StoreError;
use crate::marker::MarkerStore;
use crate::overrides::{sort_by_precedence, OverrideStore};
use crate::systems::{check_version_step, SystemRegistry};
use crate::twin::{twin_key, TwinRecord, TwinStore};

// ── Twin store ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TwinInner {
    records: HashMap<DeviceId, TwinRecord>,
    /// Devices that currently have a desired state: `index:active:outputs`.
    active_outputs: HashSet<DeviceId>,
}

/// In-memory implementation of [`TwinStore`].
///
/// All data is lost on process exit. Suitable for tests and local mode.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTwinStore {
    inner: Arc<RwLock<TwinInner>>,
}

impl InMemoryTwinStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TwinStore for InMemoryTwinStore {
    async fn save_intent(&self, intent: &UserIntent) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let record = guard.records.entry(intent.id.clone()).or_default();
        record.intent = Some(intent.clone());
        record.version += 1;
        Ok(())
    }

    async fn save_reported(&self, reported: &ReportedDeviceState) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let record = guard.records.entry(reported.id.clone()).or_default();
        record.reported = Some(reported.clone());
        record.version += 1;
        Ok(())
    }

    async fn save_desired(&self, desired: &DesiredDeviceState) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let record = guard.records.entry(desired.id.clone()).or_default();
        record.desired = Some(desired.clone());
        record.version += 1;
        if desired.device_type.is_output() {
            guard.active_outputs.insert(desired.id.clone());
        }
        Ok(())
    }

    async fn clear_desired(&self, id: &DeviceId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(record) = guard.records.get_mut(id) {
            record.desired = None;
            record.version += 1;
        }
        guard.active_outputs.remove(id);
        Ok(())
    }

    async fn find_intent(&self, id: &DeviceId) -> Result<Option<UserIntent>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.records.get(id).and_then(|r| r.intent.clone()))
    }

    async fn find_reported(
        &self,
        id: &DeviceId,
    ) -> Result<Option<ReportedDeviceState>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.records.get(id).and_then(|r| r.reported.clone()))
    }

    async fn find_desired(
        &self,
        id: &DeviceId,
    ) -> Result<Option<DesiredDeviceState>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.records.get(id).and_then(|r| r.desired.clone()))
    }

    async fn find_snapshot(
        &self,
        id: &DeviceId,
    ) -> Result<Option<DeviceTwinSnapshot>, StoreError> {
        let guard = self.inner.read().await;
        match guard.records.get(id) {
            Some(record) => record.snapshot(id),
            None => Ok(None),
        }
    }

    async fn active_output_devices(&self) -> Result<Vec<DesiredDeviceState>, StoreError> {
        let guard = self.inner.read().await;
        let mut out = Vec::with_capacity(guard.active_outputs.len());
        for id in &guard.active_outputs {
            let Some(desired) = guard.records.get(id).and_then(|r| r.desired.clone()) else {
                return Err(StoreError::InvariantViolation(format!(
                    "indexed device {} has no desired state",
                    twin_key(id)
                )));
            };
            out.push(desired);
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

// ── Override store ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct OverrideInner {
    by_id: HashMap<String, Override>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryOverrideStore {
    inner: Arc<RwLock<OverrideInner>>,
}

impl InMemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OverrideStore for InMemoryOverrideStore {
    async fn save(&self, ovr: &Override) -> Result<Override, StoreError> {
        let mut guard = self.inner.write().await;
        let mut stored = ovr.clone();
        if let Some(existing) = guard.by_id.get(&stored.id) {
            stored.version = existing.version + 1;
        }
        guard.by_id.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_by_target_and_category(
        &self,
        target: &OverrideTarget,
        category: OverrideCategory,
    ) -> Result<Option<Override>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.by_id.get(&Override::storage_id(target, category)).cloned())
    }

    async fn find_active_by_target(
        &self,
        target: &OverrideTarget,
        now: DateTime<Utc>,
    ) -> Result<Vec<Override>, StoreError> {
        let guard = self.inner.read().await;
        let mut active: Vec<Override> = guard
            .by_id
            .values()
            .filter(|o| &o.target == target && !o.is_expired(now))
            .cloned()
            .collect();
        sort_by_precedence(&mut active);
        Ok(active)
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Override>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.by_id.values().filter(|o| o.is_expired(now)).cloned().collect())
    }

    async fn delete_by_target_and_category(
        &self,
        target: &OverrideTarget,
        category: OverrideCategory,
    ) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        Ok(guard.by_id.remove(&Override::storage_id(target, category)).is_some())
    }

    async fn delete_all_by_target(&self, target: &OverrideTarget) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        let before = guard.by_id.len();
        guard.by_id.retain(|_, o| &o.target != target);
        Ok((before - guard.by_id.len()) as u64)
    }
}

// ── System registry ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RegistryInner {
    systems: HashMap<Uuid, FunctionalSystem>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySystemRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl InMemorySystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SystemRegistry for InMemorySystemRegistry {
    async fn save(&self, system: &FunctionalSystem) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;

        // Exclusive membership across all other systems.
        for other in guard.systems.values() {
            if other.id == system.id {
                continue;
            }
            if let Some(device) = system.device_ids.iter().find(|d| other.contains_device(d)) {
                return Err(StoreError::DeviceAlreadyAssigned {
                    device: device.clone(),
                    system: other.id,
                });
            }
        }

        if let Some(stored) = guard.systems.get(&system.id) {
            check_version_step(stored, system)?;
        }
        guard.systems.insert(system.id, system.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<FunctionalSystem>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.systems.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<FunctionalSystem>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<FunctionalSystem> = guard.systems.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        Ok(all)
    }

    async fn find_by_device(
        &self,
        id: &DeviceId,
    ) -> Result<Option<FunctionalSystem>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.systems.values().find(|s| s.contains_device(id)).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        Ok(guard.systems.remove(&id).is_some())
    }
}

// ── Audit store ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct AuditInner {
    entries: VecDeque<AuditEntry>,
}

/// In-memory audit log with a bounded retention window (oldest evicted).
#[derive(Debug, Clone)]
pub struct InMemoryAuditStore {
    inner: Arc<RwLock<AuditInner>>,
    max_entries: usize,
}

impl InMemoryAuditStore {
    pub fn new(max_entries: usize) -> Self {
        InMemoryAuditStore { inner: Arc::new(RwLock::new(AuditInner::default())), max_entries }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl InMemoryAuditStore {
    async fn filtered<F>(&self, pred: F) -> Vec<AuditEntry>
    where
        F: Fn(&AuditEntry) -> bool,
    {
        let guard = self.inner.read().await;
        let mut out: Vec<AuditEntry> = guard.entries.iter().filter(|e| pred(e)).cloned().collect();
        out.sort_by_key(|e| e.timestamp);
        out
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.entries.push_back(entry.clone());
        while guard.entries.len() > self.max_entries {
            guard.entries.pop_front();
        }
        Ok(())
    }

    async fn find_by_correlation(
        &self,
        correlation: &CorrelationId,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self.filtered(|e| e.correlation_id == *correlation).await)
    }

    async fn find_by_device(
        &self,
        id: &DeviceId,
        range: TimeRange,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .filtered(|e| e.device_id.as_ref() == Some(id) && range.contains(e.timestamp))
            .await)
    }

    async fn find_by_system(
        &self,
        id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .filtered(|e| e.system_id == Some(id) && range.contains(e.timestamp))
            .await)
    }

    async fn find_by_decision(
        &self,
        decision: DecisionType,
        range: TimeRange,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .filtered(|e| e.decision == decision && range.contains(e.timestamp))
            .await)
    }
}

// ── Marker store ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MarkerInner {
    markers: HashMap<String, Instant>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryMarkerStore {
    inner: Arc<RwLock<MarkerInner>>,
}

impl InMemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarkerStore for InMemoryMarkerStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut guard = self.inner.write().await;
        guard.markers.retain(|_, expires| *expires > now);
        if guard.markers.contains_key(key) {
            return Ok(false);
        }
        guard.markers.insert(key.to_string(), now + ttl);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_domain::{DeviceType, DeviceValue, SystemType};

    fn id(controller: &str, component: &str) -> DeviceId {
        DeviceId::new(controller, component).unwrap()
    }

    fn desired(device: &DeviceId, value: DeviceValue) -> DesiredDeviceState {
        DesiredDeviceState::new(device.clone(), DeviceType::Relay, value).unwrap()
    }

    #[tokio::test]
    async fn twin_fields_are_independent() {
        let store = InMemoryTwinStore::new();
        let device = id("ctl", "light");
        let now = Utc::now();

        store
            .save_intent(
                &UserIntent::new(device.clone(), DeviceType::Relay, DeviceValue::relay(true), now)
                    .unwrap(),
            )
            .await
            .unwrap();
        store.save_desired(&desired(&device, DeviceValue::relay(true))).await.unwrap();

        // Writing reported must not clobber intent or desired.
        store
            .save_reported(
                &ReportedDeviceState::known(
                    device.clone(),
                    DeviceType::Relay,
                    DeviceValue::relay(false),
                    now,
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let snap = store.find_snapshot(&device).await.unwrap().unwrap();
        assert!(snap.intent.is_some());
        assert!(snap.reported.is_some());
        assert!(snap.desired.is_some());
        assert!(!snap.is_converged());
    }

    #[tokio::test]
    async fn desired_write_maintains_active_index() {
        let store = InMemoryTwinStore::new();
        let device = id("ctl", "light");

        store.save_desired(&desired(&device, DeviceValue::relay(true))).await.unwrap();
        // Idempotent with respect to the index.
        store.save_desired(&desired(&device, DeviceValue::relay(true))).await.unwrap();

        let active = store.active_output_devices().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, device);

        store.clear_desired(&device).await.unwrap();
        assert!(store.active_output_devices().await.unwrap().is_empty());
        assert!(store.find_desired(&device).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_with_mismatched_types_is_an_invariant_violation() {
        let store = InMemoryTwinStore::new();
        let device = id("ctl", "thing");
        let now = Utc::now();

        store
            .save_intent(
                &UserIntent::new(device.clone(), DeviceType::Relay, DeviceValue::relay(true), now)
                    .unwrap(),
            )
            .await
            .unwrap();
        store
            .save_reported(
                &ReportedDeviceState::known(
                    device.clone(),
                    DeviceType::Fan,
                    DeviceValue::fan(2).unwrap(),
                    now,
                )
                .unwrap(),
            )
            .await
            .unwrap();

        assert!(matches!(
            store.find_snapshot(&device).await,
            Err(StoreError::InvariantViolation(_))
        ));
    }

    #[tokio::test]
    async fn override_save_replaces_same_pair_and_bumps_version() {
        let store = InMemoryOverrideStore::new();
        let target = OverrideTarget::Device(id("esp", "pump"));
        let now = Utc::now();

        let first = Override::new(
            target.clone(),
            OverrideCategory::Manual,
            DeviceValue::relay(false),
            "first",
            "op",
            now,
        );
        let stored = store.save(&first).await.unwrap();
        assert_eq!(stored.version, 0);

        let second = Override::new(
            target.clone(),
            OverrideCategory::Manual,
            DeviceValue::relay(true),
            "second",
            "op",
            now,
        );
        let stored = store.save(&second).await.unwrap();
        assert_eq!(stored.version, 1);

        let active = store.find_active_by_target(&target, now).await.unwrap();
        assert_eq!(active.len(), 1, "same (target, category) replaces");
        assert_eq!(active[0].value, DeviceValue::relay(true));
    }

    #[tokio::test]
    async fn active_overrides_filter_expired_and_order_by_category() {
        let store = InMemoryOverrideStore::new();
        let target = OverrideTarget::Device(id("esp", "pump"));
        let now = Utc::now();

        let manual = Override::new(
            target.clone(),
            OverrideCategory::Manual,
            DeviceValue::relay(false),
            "manual",
            "op",
            now,
        );
        let emergency = Override::new(
            target.clone(),
            OverrideCategory::Emergency,
            DeviceValue::relay(true),
            "emergency stop",
            "op",
            now,
        );
        let expired = Override::new(
            target.clone(),
            OverrideCategory::Scheduled,
            DeviceValue::relay(true),
            "stale schedule",
            "scheduler",
            now,
        )
        .with_expiry(now - chrono::Duration::minutes(1));

        store.save(&manual).await.unwrap();
        store.save(&emergency).await.unwrap();
        store.save(&expired).await.unwrap();

        let active = store.find_active_by_target(&target, now).await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].category, OverrideCategory::Emergency);
        assert_eq!(active[1].category, OverrideCategory::Manual);

        let effective = store.find_effective_by_target(&target, now).await.unwrap().unwrap();
        assert_eq!(effective.category, OverrideCategory::Emergency);

        let expired_list = store.find_expired(now).await.unwrap();
        assert_eq!(expired_list.len(), 1);
        assert_eq!(expired_list[0].category, OverrideCategory::Scheduled);
    }

    #[tokio::test]
    async fn registry_rejects_device_in_two_systems() {
        let registry = InMemorySystemRegistry::new();
        let now = Utc::now();
        let shared = id("esp", "pump");

        let mut first = FunctionalSystem::new(SystemType::Fireplace, "fireplace", now);
        first.add_device(shared.clone(), now);
        registry.save(&first).await.unwrap();

        let mut second = FunctionalSystem::new(SystemType::Generic, "other", now);
        second.add_device(shared.clone(), now);
        let err = registry.save(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::DeviceAlreadyAssigned { .. }));

        let found = registry.find_by_device(&shared).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn registry_enforces_optimistic_version() {
        let registry = InMemorySystemRegistry::new();
        let now = Utc::now();

        let mut sys = FunctionalSystem::new(SystemType::Hvac, "attic", now);
        registry.save(&sys).await.unwrap();

        // Update derived from the stored copy succeeds.
        sys.add_device(id("esp", "fan"), now);
        registry.save(&sys).await.unwrap();

        // A second writer holding the stale copy conflicts.
        let mut stale = registry.find_by_id(sys.id).await.unwrap().unwrap();
        stale.version = 0;
        stale.touch(now);
        assert!(matches!(
            registry.save(&stale).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn audit_queries_filter_and_order() {
        let store = InMemoryAuditStore::new(100);
        let correlation = CorrelationId::new();
        let device = id("ctl", "light");
        let t0 = Utc::now();

        for (offset, decision) in [
            (0, DecisionType::IntentReceived),
            (1, DecisionType::DesiredCalculated),
            (2, DecisionType::DeviceConverged),
        ] {
            let entry = AuditEntry::new(
                correlation,
                decision,
                "test",
                t0 + chrono::Duration::seconds(offset),
            )
            .for_device(device.clone());
            store.append(&entry).await.unwrap();
        }

        let by_corr = store.find_by_correlation(&correlation).await.unwrap();
        assert_eq!(by_corr.len(), 3);
        assert!(by_corr.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let ranged = store
            .find_by_device(
                &device,
                TimeRange::between(t0 + chrono::Duration::seconds(1), t0 + chrono::Duration::seconds(2)),
            )
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);

        let calc = store
            .find_by_decision(DecisionType::DesiredCalculated, TimeRange::all())
            .await
            .unwrap();
        assert_eq!(calc.len(), 1);
    }

    #[tokio::test]
    async fn audit_retention_evicts_oldest() {
        let store = InMemoryAuditStore::new(2);
        let correlation = CorrelationId::new();
        for i in 0..3 {
            let entry = AuditEntry::new(
                correlation,
                DecisionType::IntentReceived,
                "test",
                Utc::now() + chrono::Duration::seconds(i),
            );
            store.append(&entry).await.unwrap();
        }
        let all = store.find_by_correlation(&correlation).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn marker_set_if_absent_is_at_most_once() {
        let store = InMemoryMarkerStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.set_if_absent("msg-1", ttl).await.unwrap());
        assert!(!store.set_if_absent("msg-1", ttl).await.unwrap());
        assert!(store.set_if_absent("msg-2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn marker_expires_after_ttl() {
        let store = InMemoryMarkerStore::new();
        assert!(store.set_if_absent("short", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.set_if_absent("short", Duration::from_secs(60)).await.unwrap());
    }
}
