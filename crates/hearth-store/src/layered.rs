use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_domain::{Override, OverrideCategory, OverrideTarget};
use tracing::warn;

use crate::error::StoreError;
use crate::overrides::OverrideStore;

/// Write-through pairing of a durable override store with a fast cache.
///
/// The durable store is the source of truth: every write lands there first
/// and a cache failure never fails the operation. Point reads try the cache
/// and fall back to the durable store on miss or error; enumeration reads
/// (`find_active_by_target`, `find_expired`) always go durable, since a cache
/// cannot prove absence.
pub struct WriteThroughOverrideStore {
    durable: Arc<dyn OverrideStore>,
    cache: Arc<dyn OverrideStore>,
}

impl WriteThroughOverrideStore {
    pub fn new(durable: Arc<dyn OverrideStore>, cache: Arc<dyn OverrideStore>) -> Self {
        WriteThroughOverrideStore { durable, cache }
    }
}

#[async_trait]
impl OverrideStore for WriteThroughOverrideStore {
    async fn save(&self, ovr: &Override) -> Result<Override, StoreError> {
        let stored = self.durable.save(ovr).await?;
        if let Err(e) = self.cache.save(&stored).await {
            warn!(override_id = %stored.id, error = %e, "override cache write failed");
        }
        Ok(stored)
    }

    async fn find_by_target_and_category(
        &self,
        target: &OverrideTarget,
        category: OverrideCategory,
    ) -> Result<Option<Override>, StoreError> {
        match self.cache.find_by_target_and_category(target, category).await {
            Ok(Some(hit)) => return Ok(Some(hit)),
            Ok(None) => {}
            Err(e) => warn!(target = %target, error = %e, "override cache read failed"),
        }
        let fetched = self.durable.find_by_target_and_category(target, category).await?;
        if let Some(ovr) = &fetched {
            if let Err(e) = self.cache.save(ovr).await {
                warn!(override_id = %ovr.id, error = %e, "override cache backfill failed");
            }
        }
        Ok(fetched)
    }

    async fn find_active_by_target(
        &self,
        target: &OverrideTarget,
        now: DateTime<Utc>,
    ) -> Result<Vec<Override>, StoreError> {
        self.durable.find_active_by_target(target, now).await
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Override>, StoreError> {
        self.durable.find_expired(now).await
    }

    async fn delete_by_target_and_category(
        &self,
        target: &OverrideTarget,
        category: OverrideCategory,
    ) -> Result<bool, StoreError> {
        let deleted = self.durable.delete_by_target_and_category(target, category).await?;
        if let Err(e) = self.cache.delete_by_target_and_category(target, category).await {
            warn!(target = %target, error = %e, "override cache delete failed");
        }
        Ok(deleted)
    }

    async fn delete_all_by_target(&self, target: &OverrideTarget) -> Result<u64, StoreError> {
        let deleted = self.durable.delete_all_by_target(target).await?;
        if let Err(e) = self.cache.delete_all_by_target(target).await {
            warn!(target = %target, error = %e, "override cache delete failed");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryOverrideStore;
    use hearth_domain::{DeviceId, DeviceValue};

    struct FailingStore;

    #[async_trait]
    impl OverrideStore for FailingStore {
        async fn save(&self, _: &Override) -> Result<Override, StoreError> {
            Err(StoreError::Internal("cache down".into()))
        }
        async fn find_by_target_and_category(
            &self,
            _: &OverrideTarget,
            _: OverrideCategory,
        ) -> Result<Option<Override>, StoreError> {
            Err(StoreError::Internal("cache down".into()))
        }
        async fn find_active_by_target(
            &self,
            _: &OverrideTarget,
            _: DateTime<Utc>,
        ) -> Result<Vec<Override>, StoreError> {
            Err(StoreError::Internal("cache down".into()))
        }
        async fn find_expired(&self, _: DateTime<Utc>) -> Result<Vec<Override>, StoreError> {
            Err(StoreError::Internal("cache down".into()))
        }
        async fn delete_by_target_and_category(
            &self,
            _: &OverrideTarget,
            _: OverrideCategory,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Internal("cache down".into()))
        }
        async fn delete_all_by_target(&self, _: &OverrideTarget) -> Result<u64, StoreError> {
            Err(StoreError::Internal("cache down".into()))
        }
    }

    fn sample_override() -> Override {
        Override::new(
            OverrideTarget::Device(DeviceId::new("esp", "pump").unwrap()),
            OverrideCategory::Manual,
            DeviceValue::relay(false),
            "test",
            "op",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn cache_failure_does_not_fail_writes_or_reads() {
        let durable = Arc::new(InMemoryOverrideStore::new());
        let store =
            WriteThroughOverrideStore::new(durable.clone(), Arc::new(FailingStore));

        let ovr = sample_override();
        store.save(&ovr).await.unwrap();

        let found = store
            .find_by_target_and_category(&ovr.target, ovr.category)
            .await
            .unwrap();
        assert_eq!(found.map(|o| o.id), Some(ovr.id.clone()));

        assert!(store
            .delete_by_target_and_category(&ovr.target, ovr.category)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn point_read_hits_cache_first() {
        let durable = Arc::new(InMemoryOverrideStore::new());
        let cache = Arc::new(InMemoryOverrideStore::new());
        let store = WriteThroughOverrideStore::new(durable.clone(), cache.clone());

        let ovr = sample_override();
        store.save(&ovr).await.unwrap();

        // Both sides saw the write.
        assert!(cache
            .find_by_target_and_category(&ovr.target, ovr.category)
            .await
            .unwrap()
            .is_some());
        assert!(durable
            .find_by_target_and_category(&ovr.target, ovr.category)
            .await
            .unwrap()
            .is_some());
    }
}
