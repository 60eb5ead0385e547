//! Error taxonomy for a sync run.
//!
//! Fatal errors ([`SyncError`]) stop the run before the fingerprint store is
//! written. Per-document failures are not errors at this level: they are
//! collected as [`MutationError`](crate::report::MutationError) values in the
//! run report.

use thiserror::Error;

use crate::report::RunReport;

/// Failure while paging through the help-center API.
///
/// Any page failure fails the whole fetch; no partial article list is
/// handed downstream.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for page {page} failed: {source}")]
    Transport {
        page: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("page {page} returned HTTP {status}: {body}")]
    Status { page: u32, status: u16, body: String },

    #[error("page {page} is malformed: {reason}")]
    Malformed { page: u32, reason: String },
}

/// Failure reported by a vector-store backend.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The referenced file or store does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    /// Rate limits, server errors, and network failures.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Http { status, .. } => *status == 429 || *status >= 500,
            RemoteError::Transport(_) => true,
            _ => false,
        }
    }
}

/// Fatal outcome of a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Two source articles normalized to the same identifier.
    #[error("duplicate document identifier '{id}' (articles {first} and {second})")]
    DuplicateDocument {
        id: String,
        first: String,
        second: String,
    },

    /// The current document set is empty; treated as a suspected upstream
    /// failure rather than a mass deletion.
    #[error("current document set is empty; refusing to treat {known} known document(s) as removed")]
    EmptySourceSet { known: usize },

    #[error("failed to load fingerprint store: {0:#}")]
    Load(anyhow::Error),

    /// Remote mutations happened but local bookkeeping was not saved. The
    /// next run re-uploads what this run already did.
    #[error("failed to persist fingerprint store after remote changes: {error:#}")]
    Persistence {
        error: anyhow::Error,
        report: Box<RunReport>,
    },

    #[error("remote store unavailable: {0}")]
    Remote(#[from] RemoteError),
}
