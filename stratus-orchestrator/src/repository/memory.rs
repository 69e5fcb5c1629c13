//! In-memory snapshot store, used when no database is configured

use std::collections::HashMap;

use async_trait::async_trait;
use stratus_core::domain::saga::SagaInstance;
use tokio::sync::RwLock;

use super::{SnapshotStore, StoreError};

#[derive(Default)]
pub struct InMemorySnapshotStore {
    instances: RwLock<HashMap<String, SagaInstance>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, instance: &SagaInstance) -> Result<(), StoreError> {
        self.instances
            .write()
            .await
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<SagaInstance>, StoreError> {
        Ok(self.instances.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<SagaInstance>, StoreError> {
        let mut instances: Vec<SagaInstance> =
            self.instances.read().await.values().cloned().collect();
        instances.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(instances)
    }
}
