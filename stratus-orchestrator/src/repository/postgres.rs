//! Postgres snapshot store
//!
//! One row per instance in `saga_instances`, replaced on every save.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use stratus_core::domain::saga::SagaInstance;

use super::{SnapshotStore, StoreError};

pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn save(&self, instance: &SagaInstance) -> Result<(), StoreError> {
        let failure = instance
            .failure
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Corrupt {
                id: instance.id.clone(),
                message: e.to_string(),
            })?;

        sqlx::query(
            r#"
            INSERT INTO saga_instances
                (id, kind, lifecycle, status, input, output, failure, cycle, started_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                kind = EXCLUDED.kind,
                lifecycle = EXCLUDED.lifecycle,
                status = EXCLUDED.status,
                input = EXCLUDED.input,
                output = EXCLUDED.output,
                failure = EXCLUDED.failure,
                cycle = EXCLUDED.cycle,
                started_at = EXCLUDED.started_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&instance.id)
        .bind(instance.kind.as_str())
        .bind(instance.lifecycle.as_str())
        .bind(&instance.status)
        .bind(&instance.input)
        .bind(&instance.output)
        .bind(failure)
        .bind(instance.cycle as i32)
        .bind(instance.started_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<SagaInstance>, StoreError> {
        let row = sqlx::query_as::<_, SagaInstanceRow>(
            r#"
            SELECT id, kind, lifecycle, status, input, output, failure, cycle,
                   started_at, updated_at
            FROM saga_instances
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SagaInstance::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<SagaInstance>, StoreError> {
        let rows = sqlx::query_as::<_, SagaInstanceRow>(
            r#"
            SELECT id, kind, lifecycle, status, input, output, failure, cycle,
                   started_at, updated_at
            FROM saga_instances
            ORDER BY started_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SagaInstance::try_from).collect()
    }
}

// Internal row type for database queries
#[derive(sqlx::FromRow)]
struct SagaInstanceRow {
    id: String,
    kind: String,
    lifecycle: String,
    status: String,
    input: serde_json::Value,
    output: Option<serde_json::Value>,
    failure: Option<serde_json::Value>,
    cycle: i32,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SagaInstanceRow> for SagaInstance {
    type Error = StoreError;

    fn try_from(row: SagaInstanceRow) -> Result<Self, Self::Error> {
        let corrupt = |message: String| StoreError::Corrupt {
            id: row.id.clone(),
            message,
        };

        let kind = row.kind.parse().map_err(corrupt)?;
        let lifecycle = row.lifecycle.parse().map_err(corrupt)?;
        let failure = row
            .failure
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(SagaInstance {
            id: row.id,
            kind,
            lifecycle,
            status: row.status,
            input: row.input,
            output: row.output,
            failure,
            cycle: row.cycle.max(0) as u32,
            started_at: row.started_at,
            updated_at: row.updated_at,
        })
    }
}
