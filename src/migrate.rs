use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// `kbsync init`: create the fingerprint schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    if config.state.backend != "sqlite" {
        println!(
            "State backend '{}' needs no schema; {} is created on first save.",
            config.state.backend,
            config.state.path.display()
        );
        return Ok(());
    }

    let pool = db::connect(&config.state.path).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fingerprints (
            id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            remote_handle TEXT NOT NULL,
            vector_store_id TEXT NOT NULL,
            title TEXT,
            synced_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fingerprints_remote_handle ON fingerprints(remote_handle)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
