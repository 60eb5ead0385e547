//! Logging setup.
//!
//! Sync commands log through `tracing` to three places:
//!
//! | Destination | Level | Lifetime |
//! |-------------|-------|----------|
//! | stderr | warnings and errors | |
//! | `{dir}/last_run.log` | configured level | truncated at the start of each run |
//! | `{dir}/upload.log` | configured level | appended forever |
//!
//! `{dir}/upload.log.shipped` holds how many bytes of `upload.log` have
//! already been appended to the remote daily log.
//!
//! The level comes from `RUST_LOG` when set, otherwise `[logging].level`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

pub const LAST_RUN_LOG: &str = "last_run.log";
pub const UPLOAD_LOG: &str = "upload.log";
pub const UPLOAD_LOG_OFFSET: &str = "upload.log.shipped";

/// Paths of the log files written by [`init_file_logging`].
#[derive(Debug, Clone)]
pub struct LogFiles {
    pub dir: PathBuf,
    pub last_run: PathBuf,
    pub upload: PathBuf,
    pub upload_offset: PathBuf,
}

impl LogFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            last_run: dir.join(LAST_RUN_LOG),
            upload: dir.join(UPLOAD_LOG),
            upload_offset: dir.join(UPLOAD_LOG_OFFSET),
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("warn,kb_sync={lvl},kbsync={lvl}", lvl = level).into()
    })
}

/// Install the console + file subscriber used by `run`, `fetch`, and `sync`.
pub fn init_file_logging(config: &LoggingConfig) -> Result<LogFiles> {
    let files = LogFiles::in_dir(&config.dir);
    std::fs::create_dir_all(&files.dir)
        .with_context(|| format!("Failed to create log dir: {}", files.dir.display()))?;
    std::fs::File::create(&files.last_run)
        .with_context(|| format!("Failed to truncate {}", files.last_run.display()))?;

    let last_run = tracing_appender::rolling::never(&files.dir, LAST_RUN_LOG);
    let upload = tracing_appender::rolling::never(&files.dir, UPLOAD_LOG);

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(LevelFilter::WARN),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(last_run),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(upload),
        )
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(files)
}

/// Console-only logging for commands that do not touch the remote store.
pub fn init_console(config: &LoggingConfig) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(LevelFilter::WARN),
        )
        .try_init();
}
