use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Short-TTL marker store backing the at-most-once inbound filter.
#[async_trait]
pub trait MarkerStore: Send + Sync + 'static {
    /// Conditionally set the marker. Returns `true` when the key was absent
    /// (the caller holds the marker and should process the message), `false`
    /// when it was already set.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}
