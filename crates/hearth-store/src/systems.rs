use async_trait::async_trait;
use hearth_domain::{DeviceId, FunctionalSystem};
use uuid::Uuid;

use crate::error::StoreError;

/// Registry of functional-system aggregates.
///
/// Guards two invariants on `save`:
/// - exclusive membership: no device may appear in two systems;
/// - optimistic versioning: updating an existing system requires the caller's
///   copy to descend from the stored one (domain mutators bump `version`, so
///   an update must arrive with `stored.version + 1`).
#[async_trait]
pub trait SystemRegistry: Send + Sync + 'static {
    async fn save(&self, system: &FunctionalSystem) -> Result<(), StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<FunctionalSystem>, StoreError>;
    async fn list(&self) -> Result<Vec<FunctionalSystem>, StoreError>;

    /// The system a device belongs to, if any. Devices never point at their
    /// system; this query is the only way back.
    async fn find_by_device(&self, id: &DeviceId)
        -> Result<Option<FunctionalSystem>, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Shared version-step check used by registry implementations.
pub(crate) fn check_version_step(
    stored: &FunctionalSystem,
    incoming: &FunctionalSystem,
) -> Result<(), StoreError> {
    if incoming.version != stored.version + 1 {
        return Err(StoreError::Conflict { key: incoming.id.to_string() });
    }
    Ok(())
}
