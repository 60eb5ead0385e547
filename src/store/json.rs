//! JSON-file [`FingerprintStore`].
//!
//! Writes the snapshot to a temporary file in the target directory and
//! renames it over the old file, so a crash mid-write leaves the previous
//! snapshot untouched.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::models::Snapshot;

use super::FingerprintStore;

const STATE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    records: Snapshot,
}

pub struct JsonFingerprintStore {
    path: PathBuf,
}

impl JsonFingerprintStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait]
impl FingerprintStore for JsonFingerprintStore {
    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }

    async fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            return Ok(Snapshot::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let state: StateFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;
        if state.version != STATE_VERSION {
            bail!(
                "Unsupported state file version {} in {} (expected {})",
                state.version,
                self.path.display(),
                STATE_VERSION
            );
        }
        Ok(state.records)
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let state = StateFile {
            version: STATE_VERSION,
            records: snapshot.clone(),
        };

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, &state)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FingerprintRecord, RemoteHandle};
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFingerprintStore::new(&tmp.path().join("state.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/state.json");
        let store = JsonFingerprintStore::new(&path);

        let mut snapshot = Snapshot::new();
        snapshot.insert(
            "pairing".to_string(),
            FingerprintRecord {
                content_hash: "abc".to_string(),
                remote_handle: RemoteHandle::new("file-1"),
                vector_store_id: "vs_1".to_string(),
                title: None,
                synced_at: Utc::now(),
            },
        );
        store.save(&snapshot).await.unwrap();

        let loaded = JsonFingerprintStore::new(&path).load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["pairing"].remote_handle.as_str(), "file-1");

        // No temp files left behind next to the state file.
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_not_an_empty_store() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(JsonFingerprintStore::new(&path).load().await.is_err());
    }
}
