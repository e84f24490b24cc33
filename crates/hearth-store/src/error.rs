use hearth_domain::DeviceId;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Optimistic version check failed after the bounded retry budget.
    #[error("version conflict on {key}")]
    Conflict { key: String },

    /// Exclusive-membership invariant: the device already belongs to another system.
    #[error("device {device} already belongs to system {system}")]
    DeviceAlreadyAssigned { device: DeviceId, system: Uuid },

    /// Persisted record breaks a data-model invariant (e.g. twin field types disagree).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("internal store error: {0}")]
    Internal(String),
}
