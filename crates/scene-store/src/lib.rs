//! Pluggable scene persistence (spec's C2): get/put/delete/has/all of
//! `SceneRecord`s keyed by `sceneID`, with an in-memory backend for tests
//! and a relational backend for production.

mod memory;
mod retry;
mod sql;

pub use memory::MemoryStore;
pub use retry::with_retry;
pub use sql::SqlStore;

use scene_error::Result;
use scene_protocol::SceneRecord;
use uuid::Uuid;

/// Persistence capability the rest of the pipeline depends on. Chosen at
/// wire-up by the Supervisor based on `STORE_BACKEND`.
#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// `None` on miss -- a miss is not an error.
    async fn get(&self, id: Uuid) -> Result<Option<SceneRecord>>;
    /// Idempotent on `sceneID`: a second `put` with the same id is a no-op.
    async fn put(&self, record: SceneRecord) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    /// `false` on miss -- a miss is not an error.
    async fn has(&self, id: Uuid) -> Result<bool>;
    /// Stable but unspecified order.
    async fn all(&self) -> Result<Vec<SceneRecord>>;
}
