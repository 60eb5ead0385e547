//! # kb-sync CLI (`kbsync`)
//!
//! The `kbsync` binary drives the help-center → vector-store sync.
//!
//! ## Usage
//!
//! ```bash
//! kbsync --config ./config/kbsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbsync init` | Create the fingerprint store schema |
//! | `kbsync run` | Full pipeline: fetch, normalize, sync, ship logs |
//! | `kbsync fetch` | Fetch articles into the staging directory |
//! | `kbsync sync` | Sync the staged articles into the vector store |
//! | `kbsync plan` | Show the sync plan without changing anything |
//! | `kbsync status` | List fingerprint records |
//!
//! ## Exit Codes
//!
//! Fatal errors (fetch failure, duplicate identifiers, empty article set,
//! unsaved fingerprint store) exit non-zero. Per-document failures are
//! listed in the summary and retried by the next run; they do not change the
//! exit code.

use clap::{Parser, Subcommand};
use kb_sync::{config, pipeline, report::ProgressMode};
use std::path::PathBuf;

/// kb-sync: keep a vector store in sync with help-center articles.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Secrets (`OPENAI_API_KEY`, `SPACES_KEY`, `SPACES_SECRET`) are read
/// from the environment.
#[derive(Parser)]
#[command(
    name = "kbsync",
    about = "Keep a vector store in sync with help-center articles",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbsync.toml")]
    config: PathBuf,

    /// Progress output on stderr: `off`, `human`, or `json`.
    ///
    /// Defaults to `human` when stderr is a terminal, otherwise `off`.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the fingerprint store.
    ///
    /// Creates the SQLite database and its table. Idempotent.
    Init,

    /// Run the full pipeline.
    ///
    /// Restores state from object storage if configured, fetches and
    /// normalizes all articles, syncs them, mirrors state back, and ships
    /// the run logs.
    Run {
        /// Compute and report the plan without mutating the vector store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch articles and write them to the staging directory.
    Fetch,

    /// Sync the staging directory into the vector store.
    Sync {
        /// Compute and report the plan without mutating the vector store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the sync plan for the staging directory.
    Plan,

    /// List the documents recorded in the fingerprint store.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let progress = match cli.progress.as_deref() {
        Some(value) => ProgressMode::parse(value)?,
        None => ProgressMode::default_for_tty(),
    };

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            pipeline::run_init(&cfg).await?;
        }
        Commands::Run { dry_run } => {
            pipeline::run_full(&cfg, dry_run, progress).await?;
        }
        Commands::Fetch => {
            pipeline::run_fetch(&cfg).await?;
        }
        Commands::Sync { dry_run } => {
            pipeline::run_sync(&cfg, dry_run, progress).await?;
        }
        Commands::Plan => {
            pipeline::run_plan(&cfg).await?;
        }
        Commands::Status => {
            pipeline::run_status(&cfg).await?;
        }
    }

    Ok(())
}
