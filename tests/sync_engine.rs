//! Integration tests for the sync engine.
//!
//! The engine is driven against an in-test vector store that records every
//! call and can be told to fail specific operations, plus the in-memory
//! fingerprint store.

use async_trait::async_trait;
use kb_sync::error::{RemoteError, SyncError};
use kb_sync::models::{Document, RemoteFile, RemoteHandle};
use kb_sync::normalize::content_hash;
use kb_sync::report::{Operation, Outcome, ReportSink, RunReport, SyncEvent};
use kb_sync::store::MemoryFingerprintStore;
use kb_sync::sync::{SyncEngine, SyncOptions};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

// ─── Test Vector Store ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Upload(String),
    Delete(String),
    List,
}

#[derive(Default)]
struct FakeVectorStore {
    files: Mutex<BTreeMap<RemoteHandle, (String, String)>>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicUsize,
    fail_uploads: Mutex<BTreeSet<String>>,
    fail_deletes: Mutex<BTreeSet<RemoteHandle>>,
    fail_list: AtomicBool,
}

impl FakeVectorStore {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List))
            .collect()
    }

    fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    fn contains(&self, handle: &RemoteHandle) -> bool {
        self.files.lock().unwrap().contains_key(handle)
    }

    fn content_of(&self, handle: &RemoteHandle) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(handle)
            .map(|(_, content)| content.clone())
    }

    /// Remove a file without going through the engine.
    fn remove_out_of_band(&self, handle: &RemoteHandle) {
        self.files.lock().unwrap().remove(handle);
    }

    /// Put a file no record knows about.
    fn insert_stray(&self, handle: &str) {
        self.files.lock().unwrap().insert(
            RemoteHandle::new(handle),
            ("stray.md".to_string(), "stray".to_string()),
        );
    }

    fn fail_upload_of(&self, filename: &str) {
        self.fail_uploads.lock().unwrap().insert(filename.to_string());
    }

    fn fail_delete_of(&self, handle: &RemoteHandle) {
        self.fail_deletes.lock().unwrap().insert(handle.clone());
    }

    fn heal(&self) {
        self.fail_uploads.lock().unwrap().clear();
        self.fail_deletes.lock().unwrap().clear();
        self.fail_list.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl kb_sync::remote::VectorStore for FakeVectorStore {
    fn store_id(&self) -> &str {
        "vs_fake"
    }

    async fn upload(&self, filename: &str, content: &str) -> Result<RemoteHandle, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Upload(filename.to_string()));
        if self.fail_uploads.lock().unwrap().contains(filename) {
            return Err(RemoteError::Http {
                status: 500,
                body: "upload rejected".to_string(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = RemoteHandle::new(format!("file-{}", n));
        self.files.lock().unwrap().insert(
            handle.clone(),
            (filename.to_string(), content.to_string()),
        );
        Ok(handle)
    }

    async fn delete(&self, handle: &RemoteHandle) -> Result<(), RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Delete(handle.to_string()));
        if self.fail_deletes.lock().unwrap().contains(handle) {
            return Err(RemoteError::Transport("connection reset".to_string()));
        }
        match self.files.lock().unwrap().remove(handle) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(handle.to_string())),
        }
    }

    async fn list(&self) -> Result<Option<Vec<RemoteFile>>, RemoteError> {
        self.calls.lock().unwrap().push(Call::List);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RemoteError::Http {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(Some(
            self.files
                .lock()
                .unwrap()
                .iter()
                .map(|(handle, (filename, _))| RemoteFile {
                    handle: handle.clone(),
                    filename: Some(filename.clone()),
                })
                .collect(),
        ))
    }
}

// ─── Test Sink ──────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    fn outcomes(&self) -> Vec<(String, Outcome)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::Document { id, outcome, .. } => Some((id, outcome)),
                _ => None,
            })
            .collect()
    }
}

impl ReportSink for RecordingSink {
    fn report(&self, event: &SyncEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn doc(id: &str, body: &str) -> Document {
    let body = format!("# {}\n\n{}", id.to_uppercase(), body);
    Document {
        id: id.to_string(),
        article_id: format!("{}-article", id),
        title: id.to_uppercase(),
        source_url: Some(format!("https://help.example.com/hc/articles/{}", id)),
        created_at: None,
        updated_at: None,
        content_hash: content_hash(&body),
        body,
    }
}

struct Harness {
    remote: FakeVectorStore,
    store: MemoryFingerprintStore,
    sink: RecordingSink,
}

impl Harness {
    fn new() -> Self {
        Self {
            remote: FakeVectorStore::default(),
            store: MemoryFingerprintStore::new(),
            sink: RecordingSink::default(),
        }
    }

    async fn run(&self, docs: Vec<Document>) -> Result<RunReport, SyncError> {
        self.run_with(SyncOptions::default(), docs).await
    }

    async fn run_with(
        &self,
        options: SyncOptions,
        docs: Vec<Document>,
    ) -> Result<RunReport, SyncError> {
        SyncEngine::new(&self.remote, &self.store, &self.sink)
            .with_options(options)
            .run(docs)
            .await
    }

    fn hash_of(&self, id: &str) -> Option<String> {
        self.store.snapshot().get(id).map(|r| r.content_hash.clone())
    }

    fn handle_of(&self, id: &str) -> RemoteHandle {
        self.store.snapshot()[id].remote_handle.clone()
    }
}

// ─── Properties ─────────────────────────────────────────────────────

#[tokio::test]
async fn second_run_without_changes_is_all_unchanged() {
    let h = Harness::new();
    let docs = || vec![doc("a", "alpha"), doc("b", "beta")];

    let first = h.run(docs()).await.unwrap();
    assert_eq!(first.added, 2);

    h.remote.clear_calls();
    let second = h.run(docs()).await.unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.removed, 0);
    assert_eq!(second.skipped, 2);
    assert!(h.remote.mutations().is_empty());
    assert_eq!(h.remote.file_count(), 2);
}

#[tokio::test]
async fn changed_document_is_replaced_with_exactly_one_upload() {
    let h = Harness::new();
    h.run(vec![doc("a", "hash1"), doc("b", "hash2")])
        .await
        .unwrap();
    let old_b = h.handle_of("b");
    h.remote.clear_calls();

    let report = h
        .run(vec![doc("a", "hash1"), doc("b", "hash3"), doc("c", "hash4")])
        .await
        .unwrap();

    assert_eq!((report.added, report.updated, report.skipped), (1, 1, 1));
    assert_eq!(report.removed, 0);
    assert_eq!(
        h.remote.mutations(),
        vec![
            Call::Upload("c.md".to_string()),
            Call::Delete(old_b.to_string()),
            Call::Upload("b.md".to_string()),
        ]
    );

    // One live copy per identifier.
    assert_eq!(h.remote.file_count(), 3);
    assert!(!h.remote.contains(&old_b));

    assert_eq!(h.hash_of("a"), Some(doc("a", "hash1").content_hash));
    assert_eq!(h.hash_of("b"), Some(doc("b", "hash3").content_hash));
    assert_eq!(h.hash_of("c"), Some(doc("c", "hash4").content_hash));
    assert_ne!(h.handle_of("b"), old_b);
}

#[tokio::test]
async fn vanished_document_is_deleted() {
    let h = Harness::new();
    h.run(vec![doc("a", "hash1"), doc("b", "hash2")])
        .await
        .unwrap();
    let old_b = h.handle_of("b");
    h.remote.clear_calls();

    let report = h.run(vec![doc("a", "hash1")]).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(h.remote.mutations(), vec![Call::Delete(old_b.to_string())]);
    let snapshot = h.store.snapshot();
    assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["a"]);
}

#[tokio::test]
async fn empty_document_set_aborts_before_any_deletion() {
    let h = Harness::new();
    h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap();
    let before = h.store.snapshot();
    let saves = h.store.save_count();
    h.remote.clear_calls();

    let err = h.run(Vec::new()).await.unwrap_err();

    assert!(matches!(err, SyncError::EmptySourceSet { known: 2 }));
    assert!(h.remote.calls().is_empty());
    assert_eq!(h.store.snapshot(), before);
    assert_eq!(h.store.save_count(), saves);
}

#[tokio::test]
async fn duplicate_identifier_aborts_before_mutations() {
    let h = Harness::new();
    let mut twin = doc("faq", "second");
    twin.article_id = "42".to_string();

    let err = h.run(vec![doc("faq", "first"), twin]).await.unwrap_err();

    assert!(matches!(err, SyncError::DuplicateDocument { ref id, .. } if id == "faq"));
    assert!(h.remote.calls().is_empty());
    assert_eq!(h.store.save_count(), 0);
}

#[tokio::test]
async fn failed_upload_is_isolated_and_retried_next_run() {
    let h = Harness::new();
    h.remote.fail_upload_of("b.md");

    let report = h
        .run(vec![doc("a", "1"), doc("b", "2"), doc("c", "3")])
        .await
        .unwrap();

    assert_eq!(report.added, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].id, "b");
    assert_eq!(report.failures[0].operation, Operation::Upload);
    assert!(report.failures[0].reason.contains("500"));
    assert!(h.hash_of("a").is_some());
    assert!(h.hash_of("b").is_none());
    assert!(h.hash_of("c").is_some());
    assert_eq!(h.store.save_count(), 1);

    h.remote.heal();
    h.remote.clear_calls();
    let retry = h
        .run(vec![doc("a", "1"), doc("b", "2"), doc("c", "3")])
        .await
        .unwrap();
    assert_eq!((retry.added, retry.skipped, retry.failed), (1, 2, 0));
    assert_eq!(h.remote.mutations(), vec![Call::Upload("b.md".to_string())]);
}

#[tokio::test]
async fn failed_upload_after_replacing_drops_the_record() {
    let h = Harness::new();
    h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap();
    let old_b = h.handle_of("b");

    h.remote.fail_upload_of("b.md");
    let report = h
        .run(vec![doc("a", "1"), doc("b", "changed")])
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].operation, Operation::Replace);
    assert!(!h.remote.contains(&old_b));
    assert!(h.hash_of("b").is_none());

    h.remote.heal();
    let retry = h
        .run(vec![doc("a", "1"), doc("b", "changed")])
        .await
        .unwrap();
    assert_eq!((retry.added, retry.updated, retry.failed), (1, 0, 0));
    assert_eq!(h.hash_of("b"), Some(doc("b", "changed").content_hash));
    assert_eq!(h.remote.file_count(), 2);
}

#[tokio::test]
async fn reverted_content_is_reuploaded_after_failed_replacement_without_verification() {
    let h = Harness::new();
    let options = SyncOptions {
        verify_remote: false,
        ..SyncOptions::default()
    };
    h.run_with(options, vec![doc("a", "1"), doc("b", "2")])
        .await
        .unwrap();

    h.remote.fail_upload_of("b.md");
    let report = h
        .run_with(options, vec![doc("a", "1"), doc("b", "changed")])
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.remote.file_count(), 1);

    // Upstream goes back to the content the old record described.
    h.remote.heal();
    h.remote.clear_calls();
    let retry = h
        .run_with(options, vec![doc("a", "1"), doc("b", "2")])
        .await
        .unwrap();

    assert_eq!((retry.added, retry.skipped), (1, 1));
    assert_eq!(h.remote.mutations(), vec![Call::Upload("b.md".to_string())]);
    assert_eq!(h.remote.file_count(), 2);
    assert!(h.remote.contains(&h.handle_of("b")));
}

#[tokio::test]
async fn failed_delete_during_replacement_keeps_previous_record() {
    let h = Harness::new();
    h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap();
    let before = h.store.snapshot()["b"].clone();
    h.remote.fail_delete_of(&before.remote_handle);
    h.remote.clear_calls();

    let report = h
        .run(vec![doc("a", "1"), doc("b", "changed")])
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].operation, Operation::Replace);
    assert_eq!(h.store.snapshot()["b"], before);
    assert_eq!(
        h.remote.mutations(),
        vec![Call::Delete(before.remote_handle.to_string())]
    );

    h.remote.heal();
    let retry = h
        .run(vec![doc("a", "1"), doc("b", "changed")])
        .await
        .unwrap();
    assert_eq!((retry.updated, retry.failed), (1, 0));
    assert_eq!(h.remote.file_count(), 2);
}

#[tokio::test]
async fn failed_delete_keeps_record_for_retry() {
    let h = Harness::new();
    h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap();
    let handle_b = h.handle_of("b");
    h.remote.fail_delete_of(&handle_b);

    let report = h.run(vec![doc("a", "1")]).await.unwrap();
    assert_eq!(report.removed, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].operation, Operation::Delete);
    assert!(h.hash_of("b").is_some());

    h.remote.heal();
    let retry = h.run(vec![doc("a", "1")]).await.unwrap();
    assert_eq!(retry.removed, 1);
    assert!(h.hash_of("b").is_none());
    assert!(!h.remote.contains(&handle_b));
}

#[tokio::test]
async fn delete_of_already_missing_copy_counts_as_removed() {
    let h = Harness::new();
    h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap();
    h.remote.remove_out_of_band(&h.handle_of("b"));

    let report = h.run(vec![doc("a", "1")]).await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.failed, 0);
    assert!(h.hash_of("b").is_none());
}

#[tokio::test]
async fn removal_can_be_disabled() {
    let h = Harness::new();
    h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap();
    h.remote.clear_calls();

    let options = SyncOptions {
        delete_removed: false,
        ..SyncOptions::default()
    };
    let report = h.run_with(options, vec![doc("a", "1")]).await.unwrap();

    assert_eq!(report.removed, 0);
    assert_eq!(report.kept, 1);
    assert!(h.remote.mutations().is_empty());
    assert!(h.hash_of("b").is_some());
    assert!(h
        .sink
        .outcomes()
        .contains(&("b".to_string(), Outcome::Kept)));
}

#[tokio::test]
async fn truncated_article_set_keeps_missing_documents() {
    let h = Harness::new();
    h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap();
    h.remote.clear_calls();

    let options = SyncOptions {
        partial_source: true,
        ..SyncOptions::default()
    };
    let report = h.run_with(options, vec![doc("a", "1")]).await.unwrap();

    assert_eq!((report.removed, report.kept), (0, 1));
    assert!(h.remote.mutations().is_empty());
    assert_eq!(h.remote.file_count(), 2);
    assert!(h.hash_of("b").is_some());
    assert!(h.sink.events().iter().any(|e| matches!(
        e,
        SyncEvent::Document { id, outcome: Outcome::Kept, detail: Some(detail) }
            if id == "b" && detail == "article set truncated"
    )));
}

// ─── Remote reconciliation ─────────────────────────────────────────

#[tokio::test]
async fn copy_deleted_out_of_band_is_reuploaded() {
    let h = Harness::new();
    h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap();
    h.remote.remove_out_of_band(&h.handle_of("a"));
    h.remote.clear_calls();

    let report = h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap();

    assert_eq!((report.updated, report.skipped), (1, 1));
    assert_eq!(h.remote.mutations(), vec![Call::Upload("a.md".to_string())]);
    assert!(h.remote.contains(&h.handle_of("a")));
}

#[tokio::test]
async fn without_verification_a_missing_copy_goes_unnoticed() {
    let h = Harness::new();
    h.run(vec![doc("a", "1")]).await.unwrap();
    h.remote.remove_out_of_band(&h.handle_of("a"));
    h.remote.clear_calls();

    let options = SyncOptions {
        verify_remote: false,
        ..SyncOptions::default()
    };
    let report = h.run_with(options, vec![doc("a", "1")]).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn listing_failure_is_fatal_before_mutations() {
    let h = Harness::new();
    h.remote.fail_list.store(true, Ordering::SeqCst);

    let err = h.run(vec![doc("a", "1")]).await.unwrap_err();

    assert!(matches!(err, SyncError::Remote(_)));
    assert!(h.remote.mutations().is_empty());
    assert_eq!(h.store.save_count(), 0);
}

#[tokio::test]
async fn orphans_are_reported_but_kept_by_default() {
    let h = Harness::new();
    h.run(vec![doc("a", "1")]).await.unwrap();
    h.remote.insert_stray("file-stray");
    h.remote.clear_calls();

    let report = h.run(vec![doc("a", "1")]).await.unwrap();

    assert_eq!(report.orphans, vec!["file-stray".to_string()]);
    assert_eq!(report.orphans_pruned, 0);
    assert!(h.remote.contains(&RemoteHandle::new("file-stray")));
    assert!(h.remote.mutations().is_empty());
}

#[tokio::test]
async fn orphans_are_pruned_when_enabled() {
    let h = Harness::new();
    h.run(vec![doc("a", "1")]).await.unwrap();
    h.remote.insert_stray("file-stray");

    let options = SyncOptions {
        prune_orphans: true,
        ..SyncOptions::default()
    };
    let report = h.run_with(options, vec![doc("a", "1")]).await.unwrap();

    assert_eq!(report.orphans_pruned, 1);
    assert!(!h.remote.contains(&RemoteHandle::new("file-stray")));
    assert!(h.remote.contains(&h.handle_of("a")));
}

#[tokio::test]
async fn pruning_is_skipped_when_every_remote_file_looks_orphaned() {
    let h = Harness::new();
    h.run(vec![doc("a", "1")]).await.unwrap();
    h.remote.remove_out_of_band(&h.handle_of("a"));
    h.remote.insert_stray("file-stray");

    let options = SyncOptions {
        prune_orphans: true,
        ..SyncOptions::default()
    };
    let report = h.run_with(options, vec![doc("a", "1")]).await.unwrap();

    assert_eq!(report.orphans, vec!["file-stray".to_string()]);
    assert_eq!(report.orphans_pruned, 0);
    assert!(h.remote.contains(&RemoteHandle::new("file-stray")));
    assert_eq!(report.updated, 1);
}

// ─── Persistence, dry runs, events ─────────────────────────────────

#[tokio::test]
async fn save_failure_surfaces_report_of_applied_changes() {
    let h = Harness::new();
    h.store.fail_saves(true);

    let err = h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap_err();

    match err {
        SyncError::Persistence { report, .. } => {
            assert_eq!(report.added, 2);
            assert!(report.finished_at.is_some());
        }
        other => panic!("expected persistence error, got {}", other),
    }
    assert_eq!(h.remote.file_count(), 2);
    assert!(h.store.snapshot().is_empty());
}

#[tokio::test]
async fn rerun_after_failed_save_replaces_the_unrecorded_uploads() {
    let h = Harness::new();
    h.store.fail_saves(true);
    let docs = || vec![doc("a", "1"), doc("b", "2")];

    assert!(h.run(docs()).await.is_err());
    assert_eq!(h.remote.file_count(), 2);
    assert!(h.store.snapshot().is_empty());

    h.store.fail_saves(false);
    let report = h.run(docs()).await.unwrap();

    assert_eq!(report.added, 2);
    assert_eq!(report.stale_copies_removed, 2);
    assert!(report.orphans.is_empty());
    assert_eq!(h.remote.file_count(), 2);
    assert!(h.remote.contains(&h.handle_of("a")));
    assert!(h.remote.contains(&h.handle_of("b")));

    let third = h.run(docs()).await.unwrap();
    assert_eq!((third.added, third.skipped), (0, 2));
    assert_eq!(h.remote.file_count(), 2);
}

#[tokio::test]
async fn unrelated_stray_file_is_not_taken_for_a_stale_copy() {
    let h = Harness::new();
    h.remote.insert_stray("file-stray");

    let report = h.run(vec![doc("a", "1")]).await.unwrap();

    assert_eq!(report.stale_copies_removed, 0);
    assert_eq!(report.orphans, vec!["file-stray".to_string()]);
    assert!(h.remote.contains(&RemoteHandle::new("file-stray")));
}

#[tokio::test]
async fn dry_run_reports_plan_without_calls_or_saves() {
    let h = Harness::new();
    h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap();
    let before = h.store.snapshot();
    h.remote.clear_calls();

    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };
    let report = h
        .run_with(options, vec![doc("a", "changed"), doc("c", "3")])
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(
        (report.added, report.updated, report.removed),
        (1, 1, 1)
    );
    assert!(h.remote.mutations().is_empty());
    assert_eq!(h.store.snapshot(), before);
    assert_eq!(h.store.save_count(), 1);
}

#[tokio::test]
async fn events_bracket_the_run() {
    let h = Harness::new();
    h.run(vec![doc("a", "1"), doc("b", "2")]).await.unwrap();

    let events = h.sink.events();
    assert!(matches!(
        events.first(),
        Some(SyncEvent::Planned { added: 2, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(SyncEvent::Finished { report }) if report.added == 2
    ));
    assert_eq!(
        h.sink.outcomes(),
        vec![
            ("a".to_string(), Outcome::Added),
            ("b".to_string(), Outcome::Added),
        ]
    );
}

#[tokio::test]
async fn uploaded_content_carries_frontmatter_and_body() {
    let h = Harness::new();
    h.run(vec![doc("a", "alpha body")]).await.unwrap();

    let content = h.remote.content_of(&h.handle_of("a")).unwrap();
    assert!(content.starts_with("---\ntitle: A\n"));
    assert!(content.contains("url: https://help.example.com/hc/articles/a"));
    assert!(content.ends_with("# A\n\nalpha body"));
}
