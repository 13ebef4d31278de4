use crate::StoreBackend;
use scene_error::{ErrorKind, Result, ScenePipelineError};
use scene_protocol::SceneRecord;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

/// Relational `StoreBackend` over a single `scene_kv` table (spec.md §4.2).
/// `put` is an `INSERT ... ON CONFLICT (id) DO NOTHING` -- a scene record is
/// immutable once written, so there is nothing to update on conflict, unlike
/// the teacher's `upsert_stream` which does overwrite on conflict.
pub struct SqlStore {
    pool: PgPool,
}

impl SqlStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| ScenePipelineError::transient(format!("failed to connect to store: {e}")))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ScenePipelineError::fatal(format!("migration failed: {e}")))
    }
}

fn transient(e: sqlx::Error) -> ScenePipelineError {
    ScenePipelineError::with_source(ErrorKind::Transient, "store connectivity error", e)
}

#[async_trait::async_trait]
impl StoreBackend for SqlStore {
    async fn get(&self, id: Uuid) -> Result<Option<SceneRecord>> {
        let row = sqlx::query!(
            r#"SELECT id, value, tenant_id, created_at, produced_by
               FROM scene_kv WHERE id = $1"#,
            id.to_string()
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(transient)?;

        Ok(row.map(|r| SceneRecord {
            scene_id: r.id.parse().unwrap_or(id),
            tenant_id: r.tenant_id,
            scene: r.value,
            created_at: r.created_at,
            produced_by: r.produced_by,
        }))
    }

    async fn put(&self, record: SceneRecord) -> Result<()> {
        sqlx::query!(
            r#"INSERT INTO scene_kv (id, value, tenant_id, created_at, produced_by)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (id) DO NOTHING"#,
            record.scene_id.to_string(),
            record.scene,
            record.tenant_id,
            record.created_at,
            record.produced_by,
        )
        .execute(&self.pool)
        .await
        .map_err(transient)?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query!("DELETE FROM scene_kv WHERE id = $1", id.to_string())
            .execute(&self.pool)
            .await
            .map_err(transient)?;
        Ok(())
    }

    async fn has(&self, id: Uuid) -> Result<bool> {
        let row = sqlx::query!(
            "SELECT EXISTS(SELECT 1 FROM scene_kv WHERE id = $1) AS \"exists!\"",
            id.to_string()
        )
        .fetch_one(&self.pool)
        .await
        .map_err(transient)?;
        Ok(row.exists)
    }

    async fn all(&self) -> Result<Vec<SceneRecord>> {
        let rows = sqlx::query!(
            r#"SELECT id, value, tenant_id, created_at, produced_by FROM scene_kv"#
        )
        .fetch_all(&self.pool)
        .await
        .map_err(transient)?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let scene_id = r.id.parse().ok()?;
                Some(SceneRecord {
                    scene_id,
                    tenant_id: r.tenant_id,
                    scene: r.value,
                    created_at: r.created_at,
                    produced_by: r.produced_by,
                })
            })
            .collect())
    }
}
