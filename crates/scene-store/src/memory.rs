use crate::StoreBackend;
use scene_error::Result;
use scene_protocol::SceneRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory `StoreBackend`. Not durable; intended for tests and the
/// `STORE_BACKEND=memory` dev mode.
#[derive(Default, Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<Uuid, SceneRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StoreBackend for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<SceneRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn put(&self, record: SceneRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.entry(record.scene_id).or_insert(record);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.records.write().await.remove(&id);
        Ok(())
    }

    async fn has(&self, id: Uuid) -> Result<bool> {
        Ok(self.records.read().await.contains_key(&id))
    }

    async fn all(&self) -> Result<Vec<SceneRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
