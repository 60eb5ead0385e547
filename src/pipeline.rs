//! Job driver: the thin composition behind each CLI command.
//!
//! ```text
//! kbsync run   = restore state → fetch → stage → sync → mirror state → ship logs
//! kbsync fetch = fetch → stage
//! kbsync sync  = read staged files → sync
//! ```
//!
//! Fetching and syncing are separated by the staging directory
//! (`[sync].articles_dir`): rendered `<id>.md` files with frontmatter. A
//! staged file parses back to the same identifier and content hash it was
//! written with, so `fetch` followed by `sync` behaves like `run`. A fetch
//! cut short by `max_articles` leaves a `.truncated` marker next to the
//! files so the later sync keeps documents it cannot see.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::SyncError;
use crate::helpcenter::{ArticleSource, HelpCenterClient};
use crate::logging::{self, LogFiles};
use crate::migrate;
use crate::models::Document;
use crate::normalize::{normalize, read_document_file, render_document};
use crate::plan::{index_documents, UpdateReason};
use crate::remote;
use crate::report::{ProgressMode, RunReport};
use crate::spaces::SpacesClient;
use crate::store;
use crate::sync::{SyncEngine, SyncOptions};

/// Marker file written into the staging directory for a truncated fetch.
pub const TRUNCATED_MARKER: &str = ".truncated";

/// Normalized documents plus whether they are the complete upstream set.
#[derive(Debug, Clone, Default)]
pub struct DocumentSet {
    pub documents: Vec<Document>,
    /// Some upstream articles were not fetched; see
    /// [`FetchedArticles::truncated`](crate::helpcenter::FetchedArticles).
    pub truncated: bool,
}

/// Fetch every article from `source` and normalize it.
pub async fn fetch_documents(source: &dyn ArticleSource) -> Result<DocumentSet, SyncError> {
    let fetched = source.fetch_all().await?;
    tracing::info!(
        source = source.name(),
        count = fetched.articles.len(),
        truncated = fetched.truncated,
        "fetched articles"
    );
    Ok(DocumentSet {
        documents: fetched.articles.iter().map(normalize).collect(),
        truncated: fetched.truncated,
    })
}

/// Replace the staging directory with one rendered file per document.
///
/// Duplicate identifiers are rejected before anything is written.
pub fn stage_documents(dir: &Path, set: &DocumentSet) -> Result<usize> {
    let indexed = index_documents(set.documents.clone())?;

    if dir.exists() {
        std::fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to clean staging dir: {}", dir.display()))?;
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create staging dir: {}", dir.display()))?;

    for doc in indexed.values() {
        let path = dir.join(doc.filename());
        std::fs::write(&path, render_document(doc))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!(file = %path.display(), "staged");
    }
    if set.truncated {
        std::fs::write(dir.join(TRUNCATED_MARKER), "")
            .with_context(|| format!("Failed to mark {} as truncated", dir.display()))?;
    }
    Ok(indexed.len())
}

/// Read every `*.md` file in the staging directory. A missing directory
/// yields no documents.
pub fn load_staged_documents(dir: &Path) -> Result<DocumentSet> {
    if !dir.exists() {
        return Ok(DocumentSet::default());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read staging dir: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    let documents = paths
        .iter()
        .map(|p| read_document_file(p))
        .collect::<Result<Vec<_>>>()?;
    Ok(DocumentSet {
        documents,
        truncated: dir.join(TRUNCATED_MARKER).exists(),
    })
}

/// `kbsync init`.
pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Fingerprint store initialized: {}", config.state.path.display());
    Ok(())
}

/// `kbsync fetch`: fetch-only entry point.
pub async fn run_fetch(config: &Config) -> Result<()> {
    logging::init_file_logging(&config.logging)?;

    let client = HelpCenterClient::new(&config.helpcenter)?;
    let set = fetch_documents(&client).await?;
    let staged = stage_documents(&config.sync.articles_dir, &set)?;

    println!(
        "Fetched {} articles into {}{}",
        staged,
        config.sync.articles_dir.display(),
        if set.truncated { " (truncated at max_articles)" } else { "" }
    );
    Ok(())
}

/// `kbsync sync`: sync-only entry point over the staging directory.
pub async fn run_sync(config: &Config, dry_run: bool, progress: ProgressMode) -> Result<()> {
    logging::init_file_logging(&config.logging)?;

    let set = load_staged_documents(&config.sync.articles_dir)?;
    tracing::info!(
        count = set.documents.len(),
        truncated = set.truncated,
        dir = %config.sync.articles_dir.display(),
        "loaded staged documents"
    );

    let report = sync_documents(config, set, dry_run, progress).await?;
    report.print_summary();
    Ok(())
}

/// `kbsync run`: full pipeline.
pub async fn run_full(config: &Config, dry_run: bool, progress: ProgressMode) -> Result<()> {
    let logs = logging::init_file_logging(&config.logging)?;
    tracing::info!(dry_run, "starting full sync run");

    let spaces = match &config.spaces {
        Some(spaces_config) => match SpacesClient::from_config(spaces_config) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "object storage unavailable; logs and state stay local");
                None
            }
        },
        None => None,
    };

    let outcome = full_pipeline(config, spaces.as_ref(), dry_run, progress).await;

    match &outcome {
        Ok(report) => report.print_summary(),
        Err(e) => tracing::error!(error = %format!("{:#}", e), "run failed"),
    }

    if let Some(spaces) = &spaces {
        ship_logs(spaces, &logs).await;
    }

    outcome.map(|_| ())
}

async fn full_pipeline(
    config: &Config,
    spaces: Option<&SpacesClient>,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<RunReport> {
    let mirror = spaces.filter(|_| config.spaces.as_ref().is_some_and(|s| s.mirror_state));

    if let Some(spaces) = mirror {
        if let Err(e) = spaces.restore_state(&config.state.path).await {
            tracing::warn!(error = %format!("{:#}", e), "failed to restore state from object storage");
        }
    }

    let client = HelpCenterClient::new(&config.helpcenter)?;
    let set = fetch_documents(&client).await?;
    stage_documents(&config.sync.articles_dir, &set)?;

    let result = sync_documents(config, set, dry_run, progress).await;

    if !config.sync.keep_articles {
        if let Err(e) = std::fs::remove_dir_all(&config.sync.articles_dir) {
            tracing::warn!(error = %e, "failed to remove staging dir");
        }
    }

    let report = result?;

    if let (Some(spaces), false) = (mirror, dry_run) {
        if let Err(e) = spaces.mirror_state(&config.state.path).await {
            tracing::warn!(error = %format!("{:#}", e), "failed to mirror state to object storage");
        }
    }

    Ok(report)
}

async fn ship_logs(spaces: &SpacesClient, logs: &LogFiles) {
    match spaces.ship_logs(logs).await {
        Ok(shipped) => {
            if let Some(url) = shipped.last_run_url {
                println!("  last run log: {}", url);
            }
            if let Some(url) = shipped.daily_log_url {
                println!("  daily log: {}", url);
            }
        }
        Err(e) => tracing::warn!(error = %format!("{:#}", e), "failed to ship logs"),
    }
}

fn options_for(config: &Config, set: &DocumentSet, dry_run: bool) -> SyncOptions {
    SyncOptions {
        dry_run,
        partial_source: set.truncated,
        ..SyncOptions::from(&config.sync)
    }
}

/// Run the sync engine against the configured remote and state backends,
/// then write the JSON report.
pub async fn sync_documents(
    config: &Config,
    set: DocumentSet,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<RunReport> {
    let remote = remote::connect(&config.vector_store).await?;
    let store = store::open(&config.state).await?;
    let sink = progress.sink();
    tracing::info!(
        vector_store = remote.store_id(),
        state = %store.describe(),
        "syncing {} documents",
        set.documents.len()
    );

    let options = options_for(config, &set, dry_run);
    let engine =
        SyncEngine::new(remote.as_ref(), store.as_ref(), sink.as_ref()).with_options(options);

    match engine.run(set.documents).await {
        Ok(report) => {
            report.write_to(&config.logging.dir)?;
            Ok(report)
        }
        Err(SyncError::Persistence { error, report }) => {
            report.print_summary();
            if let Err(e) = report.write_to(&config.logging.dir) {
                tracing::warn!(error = %e, "failed to write run report");
            }
            Err(error.context(
                "remote changes were applied but the fingerprint store was not saved; \
                 the next run will redo them",
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// `kbsync plan`: show what `sync` would do, without mutating anything.
pub async fn run_plan(config: &Config) -> Result<()> {
    logging::init_console(&config.logging);

    let set = load_staged_documents(&config.sync.articles_dir)?;
    let remote = remote::connect(&config.vector_store).await?;
    let store = store::open(&config.state).await?;
    let sink = ProgressMode::Off.sink();
    let options = options_for(config, &set, true);
    let engine = SyncEngine::new(remote.as_ref(), store.as_ref(), sink.as_ref())
        .with_options(options);

    let prepared = engine.prepare(set.documents).await?;
    let plan = &prepared.plan;

    println!("plan");
    println!("  vector store: {}", remote.store_id());
    print_ids("added", &plan.added);
    println!("  updated ({}):", plan.updated.len());
    for id in &plan.updated {
        let reason = plan
            .update_reasons
            .get(id)
            .copied()
            .unwrap_or(UpdateReason::ContentChanged);
        println!("    {} ({})", id, reason.describe());
    }
    println!("  unchanged: {}", plan.unchanged.len());
    match options.keep_reason() {
        None => print_ids("removed", &plan.removed),
        Some(reason) => print_ids(&format!("removed (kept, {})", reason), &plan.removed),
    }
    if !prepared.stale_copies.is_empty() {
        println!("  stale copies ({}):", prepared.stale_copies.len());
        for (id, handles) in &prepared.stale_copies {
            for handle in handles {
                println!("    {} ({})", handle, id);
            }
        }
    }
    if !prepared.orphans.is_empty() {
        println!("  orphans ({}):", prepared.orphans.len());
        for handle in &prepared.orphans {
            println!("    {}", handle);
        }
    }
    if plan.is_noop() && prepared.stale_copies.is_empty() {
        println!("nothing to do");
    }
    Ok(())
}

fn print_ids(label: &str, ids: &[String]) {
    println!("  {} ({}):", label, ids.len());
    for id in ids {
        println!("    {}", id);
    }
}

/// `kbsync status`: list fingerprint records.
pub async fn run_status(config: &Config) -> Result<()> {
    logging::init_console(&config.logging);

    let store = store::open(&config.state).await?;
    let snapshot = store.load().await?;

    if snapshot.is_empty() {
        println!("No documents synced yet ({}).", store.describe());
        return Ok(());
    }

    println!("{} documents ({})", snapshot.len(), store.describe());
    println!(
        "{:<40} {:<30} {:<12} SYNCED",
        "ID", "REMOTE HANDLE", "HASH"
    );
    for (id, record) in &snapshot {
        println!(
            "{:<40} {:<30} {:<12} {}",
            id,
            record.remote_handle,
            short_hash(&record.content_hash),
            record.synced_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// First 12 characters of a content hash.
fn short_hash(hash: &str) -> String {
    hash.chars().take(12).collect()
}
