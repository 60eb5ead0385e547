//! Fingerprint store abstraction.
//!
//! The [`FingerprintStore`] trait is the only persistence the sync engine
//! needs: load the whole [`Snapshot`] once at the start of a run and replace
//! it atomically once at the end. Either the new mapping is saved in full or
//! the previous one stays intact.
//!
//! Backends:
//!
//! | Backend | Type | Atomicity |
//! |---------|------|-----------|
//! | `sqlite` | [`SqliteFingerprintStore`] | single transaction |
//! | `json` | [`JsonFingerprintStore`] | temp file + rename |
//! | in-memory | [`MemoryFingerprintStore`] | mutex swap (tests, dry runs) |
//!
//! There is no internal locking across processes; callers must not run two
//! syncs against the same store concurrently.

pub mod json;
pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::StateConfig;
use crate::models::Snapshot;

pub use json::JsonFingerprintStore;
pub use memory::MemoryFingerprintStore;
pub use sqlite::SqliteFingerprintStore;

#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Load the full snapshot. A store that was never saved is empty.
    async fn load(&self) -> Result<Snapshot>;

    /// Replace the stored snapshot with `snapshot`, atomically.
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Open the backend selected by `[state]`.
pub async fn open(config: &StateConfig) -> Result<Box<dyn FingerprintStore>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Box::new(SqliteFingerprintStore::open(&config.path).await?)),
        "json" => Ok(Box::new(JsonFingerprintStore::new(&config.path))),
        other => bail!("Unknown state backend: '{}'", other),
    }
}
