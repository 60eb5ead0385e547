//! A local directory standing in for a remote vector store.
//!
//! Each upload is written as `<handle>__<filename>`. Useful for offline
//! runs, staging environments, and end-to-end tests of the CLI.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::RemoteError;
use crate::models::{RemoteFile, RemoteHandle};

use super::VectorStore;

const SEPARATOR: &str = "__";

pub struct DirectoryVectorStore {
    root: PathBuf,
    store_id: String,
}

impl DirectoryVectorStore {
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create vector store dir: {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            store_id: format!("dir:{}", root.display()),
        })
    }

    fn find(&self, handle: &RemoteHandle) -> Result<Option<PathBuf>, RemoteError> {
        let prefix = format!("{}{}", handle.as_str(), SEPARATOR);
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl VectorStore for DirectoryVectorStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    async fn upload(&self, filename: &str, content: &str) -> Result<RemoteHandle, RemoteError> {
        if filename.contains('/') || filename.contains('\\') {
            return Err(RemoteError::Protocol(format!(
                "file name must not contain path separators: {}",
                filename
            )));
        }
        let handle = RemoteHandle::new(format!("file-{}", Uuid::new_v4().simple()));
        let path = self
            .root
            .join(format!("{}{}{}", handle.as_str(), SEPARATOR, filename));
        std::fs::write(&path, content)?;
        Ok(handle)
    }

    async fn delete(&self, handle: &RemoteHandle) -> Result<(), RemoteError> {
        match self.find(handle)? {
            Some(path) => {
                std::fs::remove_file(path)?;
                Ok(())
            }
            None => Err(RemoteError::NotFound(handle.to_string())),
        }
    }

    async fn list(&self) -> Result<Option<Vec<RemoteFile>>, RemoteError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some((handle, filename)) = name.split_once(SEPARATOR) {
                files.push(RemoteFile {
                    handle: RemoteHandle::new(handle),
                    filename: Some(filename.to_string()),
                });
            }
        }
        files.sort_by(|a, b| a.handle.cmp(&b.handle));
        Ok(Some(files))
    }
}
