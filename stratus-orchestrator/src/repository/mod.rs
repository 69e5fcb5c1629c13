//! Repository Module
//!
//! Persistence of saga instance snapshots. The runtime writes a snapshot on
//! every status or lifecycle change; the API reads them back for instances
//! that are no longer live in this process.

pub mod memory;
pub mod postgres;

pub use memory::InMemorySnapshotStore;
pub use postgres::PgSnapshotStore;

use async_trait::async_trait;
use stratus_core::domain::saga::SagaInstance;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored instance '{id}' is unreadable: {message}")]
    Corrupt { id: String, message: String },
}

/// Storage for the latest snapshot of every saga instance
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Inserts or replaces the snapshot of `instance.id`
    async fn save(&self, instance: &SagaInstance) -> Result<(), StoreError>;

    async fn find(&self, id: &str) -> Result<Option<SagaInstance>, StoreError>;

    /// All instances, most recently started first
    async fn list(&self) -> Result<Vec<SagaInstance>, StoreError>;
}
