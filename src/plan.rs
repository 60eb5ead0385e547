//! Sync planning: partition the current document set against the
//! fingerprint snapshot.
//!
//! Planning is pure. It never calls the remote store or the fingerprint
//! store; [`crate::sync::SyncEngine`] gathers the inputs and executes the
//! result.
//!
//! # Partition
//!
//! | Category | Current document | Prior record | Condition |
//! |----------|------------------|--------------|-----------|
//! | added | yes | no | |
//! | updated | yes | yes | hash differs, or remote copy missing |
//! | unchanged | yes | yes | hash matches and remote copy present |
//! | removed | no | yes | |
//!
//! Every current identifier lands in exactly one of added/updated/unchanged
//! and every prior identifier in exactly one of updated/unchanged/removed.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::SyncError;
use crate::models::{Document, RemoteFile, RemoteHandle, Snapshot};

/// Index documents by identifier, rejecting duplicates.
pub fn index_documents(documents: Vec<Document>) -> Result<BTreeMap<String, Document>, SyncError> {
    let mut indexed: BTreeMap<String, Document> = BTreeMap::new();
    for doc in documents {
        if let Some(existing) = indexed.get(&doc.id) {
            return Err(SyncError::DuplicateDocument {
                id: doc.id.clone(),
                first: existing.article_id.clone(),
                second: doc.article_id.clone(),
            });
        }
        indexed.insert(doc.id.clone(), doc);
    }
    Ok(indexed)
}

/// Why a document with a prior record is re-uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    /// Normalized body hashes differently from the record.
    ContentChanged,
    /// Hash matches but the remote listing no longer has the recorded handle.
    RemoteMissing,
    /// Hash matches but the record points into a different vector store.
    StoreChanged,
}

impl UpdateReason {
    pub fn describe(self) -> &'static str {
        match self {
            UpdateReason::ContentChanged => "content changed",
            UpdateReason::RemoteMissing => "remote copy missing",
            UpdateReason::StoreChanged => "vector store changed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Added,
    Updated,
    Unchanged,
    Removed,
}

/// The added/updated/unchanged/removed partition for one run.
///
/// Identifier lists are sorted, which fixes the mutation order within each
/// category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    pub update_reasons: BTreeMap<String, UpdateReason>,
}

impl SyncPlan {
    /// Category of `id`, if it is a current document or a prior record.
    pub fn category_of(&self, id: &str) -> Option<Category> {
        let contains = |list: &[String]| list.iter().any(|x| x == id);
        if contains(&self.added) {
            Some(Category::Added)
        } else if contains(&self.updated) {
            Some(Category::Updated)
        } else if contains(&self.unchanged) {
            Some(Category::Unchanged)
        } else if contains(&self.removed) {
            Some(Category::Removed)
        } else {
            None
        }
    }

    /// True when the plan requires no remote mutation.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Partition `current` against `snapshot`.
///
/// `remote_handles` is the remote listing, when one was taken. Without it a
/// matching hash is trusted as-is.
pub fn build_plan(
    current: &BTreeMap<String, Document>,
    snapshot: &Snapshot,
    vector_store_id: &str,
    remote_handles: Option<&BTreeSet<RemoteHandle>>,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for (id, doc) in current {
        let Some(record) = snapshot.get(id) else {
            plan.added.push(id.clone());
            continue;
        };

        let reason = if record.content_hash != doc.content_hash {
            Some(UpdateReason::ContentChanged)
        } else if record.vector_store_id != vector_store_id {
            Some(UpdateReason::StoreChanged)
        } else if remote_handles.is_some_and(|handles| !handles.contains(&record.remote_handle)) {
            Some(UpdateReason::RemoteMissing)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                plan.updated.push(id.clone());
                plan.update_reasons.insert(id.clone(), reason);
            }
            None => plan.unchanged.push(id.clone()),
        }
    }

    plan.removed = snapshot
        .keys()
        .filter(|id| !current.contains_key(*id))
        .cloned()
        .collect();

    plan
}

/// Remote files that no record in `snapshot` references.
pub fn find_orphans(snapshot: &Snapshot, remote_files: &[RemoteFile]) -> Vec<RemoteHandle> {
    let referenced: BTreeSet<&RemoteHandle> =
        snapshot.values().map(|r| &r.remote_handle).collect();
    let mut orphans: Vec<RemoteHandle> = remote_files
        .iter()
        .filter(|f| !referenced.contains(&f.handle))
        .map(|f| f.handle.clone())
        .collect();
    orphans.sort();
    orphans.dedup();
    orphans
}

/// Unreferenced remote files that carry the file name of a document about
/// to be uploaded (added or updated), keyed by document identifier.
///
/// They are left behind when a run uploads but fails to save its records.
/// Deleting them before the upload keeps a single live copy per identifier.
pub fn find_stale_copies(
    plan: &SyncPlan,
    current: &BTreeMap<String, Document>,
    snapshot: &Snapshot,
    remote_files: &[RemoteFile],
) -> BTreeMap<String, Vec<RemoteHandle>> {
    let referenced: BTreeSet<&RemoteHandle> =
        snapshot.values().map(|r| &r.remote_handle).collect();
    let mut by_name: BTreeMap<&str, Vec<RemoteHandle>> = BTreeMap::new();
    for file in remote_files {
        if referenced.contains(&file.handle) {
            continue;
        }
        if let Some(name) = file.filename.as_deref() {
            by_name.entry(name).or_default().push(file.handle.clone());
        }
    }

    let mut stale = BTreeMap::new();
    for id in plan.added.iter().chain(&plan.updated) {
        let Some(doc) = current.get(id) else {
            continue;
        };
        if let Some(handles) = by_name.get(doc.filename().as_str()) {
            let mut handles = handles.clone();
            handles.sort();
            handles.dedup();
            stale.insert(id.clone(), handles);
        }
    }
    stale
}
