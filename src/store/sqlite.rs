//! SQLite-backed [`FingerprintStore`].
//!
//! One row per document identifier in the `fingerprints` table. `save`
//! deletes and re-inserts every row inside a single transaction, so readers
//! see either the old snapshot or the new one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

use crate::db;
use crate::migrate;
use crate::models::{FingerprintRecord, RemoteHandle, Snapshot};

use super::FingerprintStore;

pub struct SqliteFingerprintStore {
    path: PathBuf,
    pool: SqlitePool,
}

impl SqliteFingerprintStore {
    /// Connect and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open state database: {}", path.display()))?;
        migrate::ensure_schema(&pool).await?;
        Ok(Self {
            path: path.to_path_buf(),
            pool,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

type FingerprintRow = (String, String, String, String, Option<String>, i64);

#[async_trait]
impl FingerprintStore for SqliteFingerprintStore {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    async fn load(&self) -> Result<Snapshot> {
        let rows: Vec<FingerprintRow> = sqlx::query_as(
            "SELECT id, content_hash, remote_handle, vector_store_id, title, synced_at FROM fingerprints ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = Snapshot::new();
        for (id, content_hash, remote_handle, vector_store_id, title, synced_at) in rows {
            let synced_at = DateTime::from_timestamp(synced_at, 0)
                .with_context(|| format!("invalid synced_at for '{}'", id))?;
            snapshot.insert(
                id,
                FingerprintRecord {
                    content_hash,
                    remote_handle: RemoteHandle::new(remote_handle),
                    vector_store_id,
                    title,
                    synced_at,
                },
            );
        }
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM fingerprints")
            .execute(&mut *tx)
            .await?;

        for (id, record) in snapshot {
            sqlx::query(
                "INSERT INTO fingerprints (id, content_hash, remote_handle, vector_store_id, title, synced_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&record.content_hash)
            .bind(record.remote_handle.as_str())
            .bind(&record.vector_store_id)
            .bind(&record.title)
            .bind(record.synced_at.timestamp())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        // Fold the WAL into the main file so the database can be copied
        // (state mirroring) as a single file.
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
