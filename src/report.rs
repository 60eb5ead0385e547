//! Run reporting.
//!
//! The sync engine never writes to a log or a terminal directly. It emits
//! [`SyncEvent`]s to an injected [`ReportSink`] and returns a [`RunReport`]
//! with the final counts. The CLI decides where events go (tracing log,
//! human lines on stderr, JSON lines on stderr) and writes the report to
//! the log directory.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::models::RemoteHandle;

/// Name of the JSON report overwritten every run.
pub const LAST_REPORT_FILE: &str = "last_report.json";
/// Name of the JSON-lines report history.
pub const REPORT_HISTORY_FILE: &str = "reports.jsonl";

/// Which remote call failed for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Upload,
    Replace,
    Delete,
    PruneOrphan,
}

/// Per-document failure. Isolated: the run continues and the document's
/// fingerprint record is left as it was, so the next run retries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationError {
    pub id: String,
    pub operation: Operation,
    pub reason: String,
}

/// Final state of one document in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Added,
    Updated,
    Unchanged,
    Removed,
    /// Missing from the document set but kept remotely.
    Kept,
    Failed,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Added => "NEW",
            Outcome::Updated => "UPDATE",
            Outcome::Unchanged => "SKIP",
            Outcome::Removed => "DELETE",
            Outcome::Kept => "KEEP",
            Outcome::Failed => "FAIL",
        }
    }
}

/// Structured events emitted by the sync engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The plan is computed; mutations start next.
    Planned {
        added: usize,
        updated: usize,
        unchanged: usize,
        removed: usize,
        dry_run: bool,
    },
    /// A document reached its final state for this run.
    Document {
        id: String,
        outcome: Outcome,
        detail: Option<String>,
    },
    /// A remote file no record references.
    Orphan { handle: RemoteHandle, pruned: bool },
    /// The run finished and the fingerprint store was saved.
    Finished { report: RunReport },
}

/// Receives sync events. Implementations must not fail the run.
pub trait ReportSink: Send + Sync {
    fn report(&self, event: &SyncEvent);
}

/// Writes events to the `tracing` log (and therefore the log files).
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&self, event: &SyncEvent) {
        match event {
            SyncEvent::Planned {
                added,
                updated,
                unchanged,
                removed,
                dry_run,
            } => {
                tracing::info!(added, updated, unchanged, removed, dry_run, "sync plan");
            }
            SyncEvent::Document {
                id,
                outcome: Outcome::Failed,
                detail,
            } => {
                tracing::error!(
                    document = %id,
                    error = detail.as_deref().unwrap_or(""),
                    "{:<6} {}",
                    Outcome::Failed.label(),
                    id
                );
            }
            SyncEvent::Document {
                id,
                outcome,
                detail,
            } => match detail {
                Some(detail) => tracing::info!("{:<6} {} ({})", outcome.label(), id, detail),
                None => tracing::info!("{:<6} {}", outcome.label(), id),
            },
            SyncEvent::Orphan { handle, pruned } => {
                tracing::warn!(handle = %handle, pruned, "remote file not tracked by any record");
            }
            SyncEvent::Finished { report } => {
                tracing::info!(
                    added = report.added,
                    updated = report.updated,
                    skipped = report.skipped,
                    removed = report.removed,
                    failed = report.failed,
                    "sync finished"
                );
            }
        }
    }
}

/// Human-friendly lines on stderr: `sync  UPDATE  getting-started`.
pub struct HumanSink;

impl ReportSink for HumanSink {
    fn report(&self, event: &SyncEvent) {
        let line = match event {
            SyncEvent::Planned {
                added,
                updated,
                unchanged,
                removed,
                dry_run,
            } => format!(
                "sync  plan{}  +{} ~{} ={} -{}\n",
                if *dry_run { " (dry-run)" } else { "" },
                format_number(*added as u64),
                format_number(*updated as u64),
                format_number(*unchanged as u64),
                format_number(*removed as u64)
            ),
            SyncEvent::Document {
                id,
                outcome,
                detail,
            } => match detail {
                Some(detail) => format!("sync  {:<6}  {}  ({})\n", outcome.label(), id, detail),
                None => format!("sync  {:<6}  {}\n", outcome.label(), id),
            },
            SyncEvent::Orphan { handle, pruned } => format!(
                "sync  ORPHAN  {}{}\n",
                handle,
                if *pruned { "  (pruned)" } else { "" }
            ),
            SyncEvent::Finished { .. } => return,
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable events: one JSON object per line on stderr.
pub struct JsonSink;

impl ReportSink for JsonSink {
    fn report(&self, event: &SyncEvent) {
        let obj = match event {
            SyncEvent::Planned {
                added,
                updated,
                unchanged,
                removed,
                dry_run,
            } => serde_json::json!({
                "event": "plan",
                "added": added,
                "updated": updated,
                "unchanged": unchanged,
                "removed": removed,
                "dry_run": dry_run,
            }),
            SyncEvent::Document {
                id,
                outcome,
                detail,
            } => serde_json::json!({
                "event": "document",
                "id": id,
                "outcome": outcome,
                "detail": detail,
            }),
            SyncEvent::Orphan { handle, pruned } => serde_json::json!({
                "event": "orphan",
                "handle": handle,
                "pruned": pruned,
            }),
            SyncEvent::Finished { report } => serde_json::json!({
                "event": "finished",
                "report": report,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// Discards events.
pub struct NoSink;

impl ReportSink for NoSink {
    fn report(&self, _event: &SyncEvent) {}
}

/// Forwards every event to several sinks.
pub struct FanoutSink(pub Vec<Box<dyn ReportSink>>);

impl ReportSink for FanoutSink {
    fn report(&self, event: &SyncEvent) {
        for sink in &self.0 {
            sink.report(event);
        }
    }
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub vector_store_id: String,
    pub dry_run: bool,
    pub added: usize,
    pub updated: usize,
    /// Unchanged documents (no remote call).
    pub skipped: usize,
    pub removed: usize,
    /// Missing from the document set but retained remotely: deletion is
    /// disabled or the fetch was truncated.
    pub kept: usize,
    pub failed: usize,
    pub failures: Vec<MutationError>,
    /// Remote handles no record references.
    pub orphans: Vec<String>,
    pub orphans_pruned: usize,
    /// Unreferenced copies of a document deleted before its upload.
    pub stale_copies_removed: usize,
}

impl RunReport {
    pub fn new(vector_store_id: &str, dry_run: bool) -> Self {
        Self {
            started_at: Some(Utc::now()),
            vector_store_id: vector_store_id.to_string(),
            dry_run,
            ..Self::default()
        }
    }

    pub fn record_failure(&mut self, failure: MutationError) {
        self.failed += 1;
        self.failures.push(failure);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Print the run summary on stdout.
    pub fn print_summary(&self) {
        println!("sync{}", if self.dry_run { " (dry-run)" } else { "" });
        println!("  vector store: {}", self.vector_store_id);
        println!("  added: {}", format_number(self.added as u64));
        println!("  updated: {}", format_number(self.updated as u64));
        println!("  skipped: {}", format_number(self.skipped as u64));
        println!("  removed: {}", format_number(self.removed as u64));
        if self.kept > 0 {
            println!("  kept: {}", format_number(self.kept as u64));
        }
        if self.stale_copies_removed > 0 {
            println!("  stale copies removed: {}", self.stale_copies_removed);
        }
        if !self.orphans.is_empty() {
            println!(
                "  orphans: {} (pruned {})",
                self.orphans.len(),
                self.orphans_pruned
            );
        }
        println!("  failed: {}", format_number(self.failed as u64));
        for failure in &self.failures {
            println!(
                "    {} [{:?}]: {}",
                failure.id, failure.operation, failure.reason
            );
        }
        println!("{}", if self.has_failures() { "completed with failures" } else { "ok" });
    }

    /// Write `last_report.json` and append to `reports.jsonl` under `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(
            dir.join(LAST_REPORT_FILE),
            serde_json::to_string_pretty(self)?,
        )?;
        let mut history = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(REPORT_HISTORY_FILE))?;
        writeln!(history, "{}", serde_json::to_string(self)?)?;
        Ok(())
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode '{}'. Use off, human, or json.", other),
        }
    }

    /// Sink for this mode. Events always reach the log as well.
    pub fn sink(&self) -> Box<dyn ReportSink> {
        let console: Box<dyn ReportSink> = match self {
            ProgressMode::Off => Box::new(NoSink),
            ProgressMode::Human => Box::new(HumanSink),
            ProgressMode::Json => Box::new(JsonSink),
        };
        Box::new(FanoutSink(vec![Box::new(LogSink), console]))
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}
