use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hearth_domain::{AuditEntry, CorrelationId, DecisionType, DeviceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Half-open time filter for audit queries. `None` bounds are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        TimeRange::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        TimeRange { from: Some(from), to: Some(to) }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

/// Append-only record of every decision, with the query indexes of the
/// dashboard and trace tooling. Results are ordered by timestamp ascending.
#[async_trait]
pub trait AuditStore: Send + Sync + 'static {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    async fn find_by_correlation(
        &self,
        correlation: &CorrelationId,
    ) -> Result<Vec<AuditEntry>, StoreError>;

    async fn find_by_device(
        &self,
        id: &DeviceId,
        range: TimeRange,
    ) -> Result<Vec<AuditEntry>, StoreError>;

    async fn find_by_system(
        &self,
        id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<AuditEntry>, StoreError>;

    async fn find_by_decision(
        &self,
        decision: DecisionType,
        range: TimeRange,
    ) -> Result<Vec<AuditEntry>, StoreError>;
}
