use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Latest snapshot of every saga instance
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS saga_instances (
            id VARCHAR(255) PRIMARY KEY,
            kind VARCHAR(20) NOT NULL,
            lifecycle VARCHAR(30) NOT NULL,
            status VARCHAR(50) NOT NULL,
            input JSONB NOT NULL,
            output JSONB,
            failure JSONB,
            cycle INTEGER NOT NULL DEFAULT 0,
            started_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_saga_instances_lifecycle ON saga_instances(lifecycle)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_saga_instances_started_at ON saga_instances(started_at DESC)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
