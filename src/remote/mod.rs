//! Remote vector-store adapters.
//!
//! The sync engine only ever uploads a file, deletes a file by handle, and
//! (optionally) lists what is there. Chunking, embedding, and retrieval
//! happen inside the service and are never observed.
//!
//! | Provider | Type | Handle |
//! |----------|------|--------|
//! | `openai` | [`OpenAiVectorStore`] | OpenAI file id (`file-...`) |
//! | `directory` | [`DirectoryVectorStore`] | `file-<uuid>` |

pub mod directory;
pub mod openai;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::VectorStoreConfig;
use crate::error::RemoteError;
use crate::models::{RemoteFile, RemoteHandle};

pub use directory::DirectoryVectorStore;
pub use openai::OpenAiVectorStore;

/// A managed vector store that documents are uploaded into.
///
/// Every call either completes or fails as a whole; timeouts surface as an
/// ordinary [`RemoteError`].
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Identifier of the resolved store (recorded in fingerprint records).
    fn store_id(&self) -> &str;

    /// Upload one document and wait until the service accepted it.
    async fn upload(&self, filename: &str, content: &str) -> Result<RemoteHandle, RemoteError>;

    /// Delete the file behind `handle`. Returns [`RemoteError::NotFound`] if
    /// it is already gone.
    async fn delete(&self, handle: &RemoteHandle) -> Result<(), RemoteError>;

    /// Current contents of the store, or `None` if the backend cannot list.
    async fn list(&self) -> Result<Option<Vec<RemoteFile>>, RemoteError> {
        Ok(None)
    }
}

/// Build the adapter selected by `[vector_store].provider`.
pub async fn connect(config: &VectorStoreConfig) -> Result<Box<dyn VectorStore>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiVectorStore::connect(config).await?)),
        "directory" => {
            let root = config
                .root
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("vector_store.root is required for 'directory'"))?;
            Ok(Box::new(DirectoryVectorStore::open(root)?))
        }
        other => bail!(
            "Unknown vector store provider: '{}'. Available: openai, directory",
            other
        ),
    }
}
