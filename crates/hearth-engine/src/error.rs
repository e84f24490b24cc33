use hearth_domain::DomainError;
use hearth_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("blocked by safety rule {rule_id}: {reason}")]
    SafetyBlock { rule_id: String, reason: String },

    #[error("infrastructure unavailable: {0}")]
    InfrastructureDown(String),

    #[error("unrecognized topic: {0}")]
    Topic(String),

    #[error("event bus closed")]
    BusClosed,

    #[error("command dispatch failed: {0}")]
    Dispatch(String),
}
