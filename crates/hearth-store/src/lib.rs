pub mod audit;
pub mod error;
pub mod layered;
pub mod marker;
pub mod memory;
pub mod overrides;
pub mod postgres_store;
pub mod redb_store;
pub mod systems;
pub mod twin;

pub use audit::{AuditStore, TimeRange};
pub use error::StoreError;
pub use layered::WriteThroughOverrideStore;
pub use marker::MarkerStore;
pub use memory::{
    InMemoryAuditStore, InMemoryMarkerStore, InMemoryOverrideStore, InMemorySystemRegistry,
    InMemoryTwinStore,
};
pub use overrides::OverrideStore;
pub use postgres_store::PostgresDocumentStore;
pub use redb_store::RedbTwinStore;
pub use systems::SystemRegistry;
pub use twin::{twin_key, TwinRecord, TwinStore};
