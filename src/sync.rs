//! The sync engine: converge the vector store to the current document set.
//!
//! One run is effectively a single transaction against the fingerprint
//! store:
//!
//! 1. Index documents by identifier (duplicates are fatal).
//! 2. Load the fingerprint snapshot once.
//! 3. Refuse an empty document set before anything is deleted.
//! 4. List the remote store (when verifying or pruning).
//! 5. Partition into added / updated / unchanged / removed.
//! 6. Mutate in order: added, updated, removed, then orphans. Each
//!    document is isolated; a failed mutation leaves no record pointing at
//!    a copy that is gone, so the next run retries it.
//! 7. Save the full snapshot once.
//!
//! Updates are delete-then-upload so two live copies of one identifier
//! never coexist. Unreferenced remote files carrying a document's file name
//! (left by a run whose save failed) are deleted before that document is
//! uploaded. Deleting a handle the store no longer has counts as success.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError};
use crate::models::{Document, FingerprintRecord, RemoteFile, RemoteHandle, Snapshot};
use crate::normalize::render_document;
use crate::plan::{
    build_plan, find_orphans, find_stale_copies, index_documents, SyncPlan, UpdateReason,
};
use crate::remote::VectorStore;
use crate::report::{MutationError, Operation, Outcome, ReportSink, RunReport, SyncEvent};
use crate::store::FingerprintStore;

/// Behavior switches for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Delete remote copies of documents that disappeared upstream.
    pub delete_removed: bool,
    /// Consult the remote listing to catch copies deleted out-of-band.
    pub verify_remote: bool,
    /// Delete remote files that no record references.
    pub prune_orphans: bool,
    /// Compute and report the plan without mutating or saving.
    pub dry_run: bool,
    /// The document set may be missing articles that still exist upstream
    /// (the fetch stopped at `max_articles`). Removals are kept.
    pub partial_source: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            delete_removed: true,
            verify_remote: true,
            prune_orphans: false,
            dry_run: false,
            partial_source: false,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            delete_removed: config.delete_removed,
            verify_remote: config.verify_remote,
            prune_orphans: config.prune_orphans,
            ..Self::default()
        }
    }
}

impl SyncOptions {
    /// Why removed documents are kept this run, if they are.
    pub fn keep_reason(&self) -> Option<&'static str> {
        if self.partial_source {
            Some("article set truncated")
        } else if !self.delete_removed {
            Some("deletion disabled")
        } else {
            None
        }
    }
}

/// Everything gathered before the first mutation.
pub struct PreparedSync {
    pub documents: BTreeMap<String, Document>,
    pub snapshot: Snapshot,
    pub plan: SyncPlan,
    /// Remote files no record references and no upload replaces. Empty
    /// when no listing was taken.
    pub orphans: Vec<RemoteHandle>,
    /// Whether the remote listing looked trustworthy enough to prune from.
    pub orphans_prunable: bool,
    /// Unreferenced copies to delete before each document's upload.
    pub stale_copies: BTreeMap<String, Vec<RemoteHandle>>,
}

pub struct SyncEngine<'a> {
    remote: &'a dyn VectorStore,
    store: &'a dyn FingerprintStore,
    sink: &'a dyn ReportSink,
    options: SyncOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        remote: &'a dyn VectorStore,
        store: &'a dyn FingerprintStore,
        sink: &'a dyn ReportSink,
    ) -> Self {
        Self {
            remote,
            store,
            sink,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Steps 1 to 5: validate inputs, load state, and compute the plan.
    ///
    /// Makes no remote mutation and never writes the fingerprint store.
    pub async fn prepare(&self, documents: Vec<Document>) -> Result<PreparedSync, SyncError> {
        let documents = index_documents(documents)?;
        let snapshot = self.store.load().await.map_err(SyncError::Load)?;

        if documents.is_empty() {
            return Err(SyncError::EmptySourceSet {
                known: snapshot.len(),
            });
        }

        let listing = if self.options.verify_remote || self.options.prune_orphans {
            self.remote.list().await?
        } else {
            None
        };

        let handles: Option<BTreeSet<RemoteHandle>> = if self.options.verify_remote {
            listing
                .as_ref()
                .map(|files| files.iter().map(|f| f.handle.clone()).collect())
        } else {
            None
        };

        let plan = build_plan(
            &documents,
            &snapshot,
            self.remote.store_id(),
            handles.as_ref(),
        );

        let (orphans, orphans_prunable, stale_copies) = match listing {
            Some(files) => {
                let stale = find_stale_copies(&plan, &documents, &snapshot, &files);
                let all_orphans = find_orphans(&snapshot, &files);
                let prunable = !listing_looks_truncated(&snapshot, &files, &all_orphans);
                let replaced: BTreeSet<&RemoteHandle> = stale.values().flatten().collect();
                let orphans: Vec<RemoteHandle> = all_orphans
                    .iter()
                    .filter(|h| !replaced.contains(h))
                    .cloned()
                    .collect();
                (orphans, prunable, stale)
            }
            None => (Vec::new(), false, BTreeMap::new()),
        };

        Ok(PreparedSync {
            documents,
            snapshot,
            plan,
            orphans,
            orphans_prunable,
            stale_copies,
        })
    }

    /// Run one full sync and return its report.
    pub async fn run(&self, documents: Vec<Document>) -> Result<RunReport, SyncError> {
        let prepared = self.prepare(documents).await?;
        let PreparedSync {
            documents,
            snapshot,
            plan,
            orphans,
            orphans_prunable,
            stale_copies,
        } = prepared;

        let store_id = self.remote.store_id().to_string();
        let mut report = RunReport::new(&store_id, self.options.dry_run);
        report.orphans = orphans.iter().map(|h| h.to_string()).collect();

        if self.options.partial_source && !plan.removed.is_empty() {
            tracing::warn!(
                count = plan.removed.len(),
                "article set is truncated; keeping documents missing from it"
            );
        }

        self.sink.report(&SyncEvent::Planned {
            added: plan.added.len(),
            updated: plan.updated.len(),
            unchanged: plan.unchanged.len(),
            removed: plan.removed.len(),
            dry_run: self.options.dry_run,
        });

        for id in &plan.unchanged {
            report.skipped += 1;
            self.emit(id, Outcome::Unchanged, None);
        }

        if self.options.dry_run {
            self.report_dry_run(&plan, &orphans, &mut report);
            report.finish();
            self.sink.report(&SyncEvent::Finished {
                report: report.clone(),
            });
            return Ok(report);
        }

        let mut next = snapshot.clone();
        let no_stale: Vec<RemoteHandle> = Vec::new();

        for id in &plan.added {
            let doc = &documents[id];
            let stale = stale_copies.get(id).unwrap_or(&no_stale);
            self.upload_new(doc, stale, &mut next, &mut report).await;
        }

        for id in &plan.updated {
            let doc = &documents[id];
            let previous = &snapshot[id];
            let stale = stale_copies.get(id).unwrap_or(&no_stale);
            let reason = plan
                .update_reasons
                .get(id)
                .copied()
                .unwrap_or(UpdateReason::ContentChanged);
            self.replace(doc, previous, stale, reason, &mut next, &mut report)
                .await;
        }

        for id in &plan.removed {
            match self.options.keep_reason() {
                None => {
                    self.delete_removed(id, &snapshot[id], &mut next, &mut report)
                        .await
                }
                Some(reason) => {
                    report.kept += 1;
                    self.emit(id, Outcome::Kept, Some(reason.to_string()));
                }
            }
        }

        self.handle_orphans(&orphans, orphans_prunable, &mut report)
            .await;

        if let Err(error) = self.store.save(&next).await {
            report.finish();
            return Err(SyncError::Persistence {
                error,
                report: Box::new(report),
            });
        }

        report.finish();
        self.sink.report(&SyncEvent::Finished {
            report: report.clone(),
        });
        Ok(report)
    }

    async fn upload_new(
        &self,
        doc: &Document,
        stale: &[RemoteHandle],
        next: &mut Snapshot,
        report: &mut RunReport,
    ) {
        if let Err(e) = self.delete_stale_copies(stale, report).await {
            self.fail(report, &doc.id, Operation::Upload, &e);
            return;
        }

        match self
            .remote
            .upload(&doc.filename(), &render_document(doc))
            .await
        {
            Ok(handle) => {
                next.insert(
                    doc.id.clone(),
                    FingerprintRecord::for_upload(doc, handle, self.remote.store_id()),
                );
                report.added += 1;
                let detail = (!stale.is_empty()).then(|| "replaced stale copy".to_string());
                self.emit(&doc.id, Outcome::Added, detail);
            }
            Err(e) => self.fail(report, &doc.id, Operation::Upload, &e),
        }
    }

    /// Delete the old copy, then upload the new one.
    ///
    /// A failed delete leaves the record as it was. Once the old copy is
    /// gone, a failed upload drops the record so the next run sees the
    /// document as added, whatever its content is by then.
    async fn replace(
        &self,
        doc: &Document,
        previous: &FingerprintRecord,
        stale: &[RemoteHandle],
        reason: UpdateReason,
        next: &mut Snapshot,
        report: &mut RunReport,
    ) {
        if let Err(e) = self.delete_stale_copies(stale, report).await {
            self.fail(report, &doc.id, Operation::Replace, &e);
            return;
        }

        if reason != UpdateReason::RemoteMissing {
            if let Err(e) = self.remote.delete(&previous.remote_handle).await {
                if !e.is_not_found() {
                    self.fail(report, &doc.id, Operation::Replace, &e);
                    return;
                }
            }
        }

        match self
            .remote
            .upload(&doc.filename(), &render_document(doc))
            .await
        {
            Ok(handle) => {
                next.insert(
                    doc.id.clone(),
                    FingerprintRecord::for_upload(doc, handle, self.remote.store_id()),
                );
                report.updated += 1;
                self.emit(
                    &doc.id,
                    Outcome::Updated,
                    Some(reason.describe().to_string()),
                );
            }
            Err(e) => {
                next.remove(&doc.id);
                self.fail(report, &doc.id, Operation::Replace, &e);
            }
        }
    }

    /// Delete unreferenced copies of a document before it is uploaded.
    async fn delete_stale_copies(
        &self,
        stale: &[RemoteHandle],
        report: &mut RunReport,
    ) -> Result<(), RemoteError> {
        for handle in stale {
            match self.remote.delete(handle).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            report.stale_copies_removed += 1;
            tracing::info!(handle = %handle, "deleted stale copy");
        }
        Ok(())
    }

    async fn delete_removed(
        &self,
        id: &str,
        previous: &FingerprintRecord,
        next: &mut Snapshot,
        report: &mut RunReport,
    ) {
        match self.remote.delete(&previous.remote_handle).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                self.fail(report, id, Operation::Delete, &e);
                return;
            }
        }
        next.remove(id);
        report.removed += 1;
        self.emit(id, Outcome::Removed, None);
    }

    async fn handle_orphans(
        &self,
        orphans: &[RemoteHandle],
        prunable: bool,
        report: &mut RunReport,
    ) {
        let prune = self.options.prune_orphans && prunable;
        if self.options.prune_orphans && !prunable && !orphans.is_empty() {
            tracing::warn!(
                count = orphans.len(),
                "every remote file looks orphaned; not pruning"
            );
        }

        for handle in orphans {
            if !prune {
                self.sink.report(&SyncEvent::Orphan {
                    handle: handle.clone(),
                    pruned: false,
                });
                continue;
            }
            match self.remote.delete(handle).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    self.fail(report, handle.as_str(), Operation::PruneOrphan, &e);
                    continue;
                }
            }
            report.orphans_pruned += 1;
            self.sink.report(&SyncEvent::Orphan {
                handle: handle.clone(),
                pruned: true,
            });
        }
    }

    fn report_dry_run(&self, plan: &SyncPlan, orphans: &[RemoteHandle], report: &mut RunReport) {
        for id in &plan.added {
            report.added += 1;
            self.emit(id, Outcome::Added, Some("dry-run".to_string()));
        }
        for id in &plan.updated {
            report.updated += 1;
            let reason = plan
                .update_reasons
                .get(id)
                .map(|r| r.describe())
                .unwrap_or("content changed");
            self.emit(id, Outcome::Updated, Some(format!("dry-run, {}", reason)));
        }
        for id in &plan.removed {
            match self.options.keep_reason() {
                None => {
                    report.removed += 1;
                    self.emit(id, Outcome::Removed, Some("dry-run".to_string()));
                }
                Some(reason) => {
                    report.kept += 1;
                    self.emit(id, Outcome::Kept, Some(reason.to_string()));
                }
            }
        }
        for handle in orphans {
            self.sink.report(&SyncEvent::Orphan {
                handle: handle.clone(),
                pruned: false,
            });
        }
    }

    fn emit(&self, id: &str, outcome: Outcome, detail: Option<String>) {
        self.sink.report(&SyncEvent::Document {
            id: id.to_string(),
            outcome,
            detail,
        });
    }

    fn fail(&self, report: &mut RunReport, id: &str, operation: Operation, error: &RemoteError) {
        let reason = error.to_string();
        self.emit(id, Outcome::Failed, Some(reason.clone()));
        report.record_failure(MutationError {
            id: id.to_string(),
            operation,
            reason,
        });
    }
}

/// A listing where every file is an orphan while records exist usually
/// means the listing itself is wrong (wrong store, truncated response).
fn listing_looks_truncated(
    snapshot: &Snapshot,
    files: &[RemoteFile],
    orphans: &[RemoteHandle],
) -> bool {
    !snapshot.is_empty() && !files.is_empty() && orphans.len() == files.len()
}
