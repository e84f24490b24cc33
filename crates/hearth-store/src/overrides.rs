use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_domain::{Override, OverrideCategory, OverrideTarget};

use crate::error::StoreError;

/// Persistence for overrides, keyed by `(target, category)`.
///
/// Expiration is logical at this layer: `find_active_by_target` and
/// `find_effective_by_target` filter out entries whose `expires_at` has
/// passed. Physical deletion is the sweeper's job, via `find_expired` +
/// `delete_by_target_and_category`.
#[async_trait]
pub trait OverrideStore: Send + Sync + 'static {
    /// Insert or replace the override for its `(target, category)` pair.
    /// Replacement bumps the stored version. Returns the stored override.
    async fn save(&self, ovr: &Override) -> Result<Override, StoreError>;

    async fn find_by_target_and_category(
        &self,
        target: &OverrideTarget,
        category: OverrideCategory,
    ) -> Result<Option<Override>, StoreError>;

    /// Unexpired overrides for the target, ordered by category descending
    /// (highest precedence first).
    async fn find_active_by_target(
        &self,
        target: &OverrideTarget,
        now: DateTime<Utc>,
    ) -> Result<Vec<Override>, StoreError>;

    /// Head of the active sequence: the override that currently wins.
    async fn find_effective_by_target(
        &self,
        target: &OverrideTarget,
        now: DateTime<Utc>,
    ) -> Result<Option<Override>, StoreError> {
        Ok(self.find_active_by_target(target, now).await?.into_iter().next())
    }

    /// Overrides whose `expires_at` has passed. Sweeper input.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Override>, StoreError>;

    /// Returns true when an override existed and was deleted.
    async fn delete_by_target_and_category(
        &self,
        target: &OverrideTarget,
        category: OverrideCategory,
    ) -> Result<bool, StoreError>;

    /// Returns the number of overrides deleted.
    async fn delete_all_by_target(&self, target: &OverrideTarget) -> Result<u64, StoreError>;
}

/// Order a slice of overrides by category descending (highest first).
/// Stable, so equal categories keep their incoming order.
pub(crate) fn sort_by_precedence(overrides: &mut [Override]) {
    overrides.sort_by(|a, b| b.category.cmp(&a.category));
}
