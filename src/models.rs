//! Core data models used throughout kb-sync.
//!
//! These types represent the articles, documents, and fingerprint records
//! that flow through the fetch → normalize → sync pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw article as returned by the help-center API, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArticle {
    /// Upstream article id (stringified; Zendesk uses integers).
    pub id: String,
    pub title: String,
    /// HTML body. Empty when the API returned `null`.
    pub body_html: String,
    pub html_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Normalized document ready for upload.
///
/// Built fresh every run by [`crate::normalize::normalize`]; never persisted
/// itself. Only `content_hash` and the remote handle survive between runs,
/// via [`FingerprintRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Stable identifier (title slug, or `article-<id>`).
    pub id: String,
    pub article_id: String,
    pub title: String,
    pub source_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Normalized Markdown: `# <title>` heading followed by the body.
    pub body: String,
    /// Hex SHA-256 of `body`.
    pub content_hash: String,
}

impl Document {
    /// File name used both in the staging directory and for the upload.
    pub fn filename(&self) -> String {
        format!("{}.md", self.id)
    }
}

/// Opaque reference to one uploaded file in the remote vector store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteHandle(String);

impl RemoteHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file currently present in the remote vector store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub handle: RemoteHandle,
    /// Not every backend reports file names in its listing.
    pub filename: Option<String>,
}

/// What the last successful sync uploaded for one document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub content_hash: String,
    pub remote_handle: RemoteHandle,
    /// Vector store the handle lives in.
    pub vector_store_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub synced_at: DateTime<Utc>,
}

impl FingerprintRecord {
    pub fn for_upload(doc: &Document, handle: RemoteHandle, vector_store_id: &str) -> Self {
        Self {
            content_hash: doc.content_hash.clone(),
            remote_handle: handle,
            vector_store_id: vector_store_id.to_string(),
            title: Some(doc.title.clone()),
            synced_at: Utc::now(),
        }
    }
}

/// Full fingerprint store contents, keyed by document identifier.
///
/// A `BTreeMap` keeps iteration (and therefore mutation order and reports)
/// deterministic.
pub type Snapshot = BTreeMap<String, FingerprintRecord>;
