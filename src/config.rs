use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub helpcenter: HelpCenterConfig,
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub spaces: Option<SpacesConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HelpCenterConfig {
    /// Articles listing endpoint, e.g.
    /// `https://support.example.com/api/v2/help_center/en-us/articles.json`.
    pub api_url: String,
    /// Public help-center root, used for article links when the API omits `html_url`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default)]
    pub max_articles: Option<usize>,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_sort_order")]
    pub sort_order: String,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_per_page() -> u32 {
    30
}
fn default_sort_by() -> String {
    "created_at".to_string()
}
fn default_sort_order() -> String {
    "desc".to_string()
}
fn default_page_delay_ms() -> u64 {
    500
}
fn default_fetch_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vs_provider")]
    pub provider: String,
    /// Existing vector store id. When unset (outside production) a new store is created.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_vs_name")]
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_vs_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Root directory for the `directory` provider.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

fn default_vs_provider() -> String {
    "openai".to_string()
}
fn default_vs_name() -> String {
    "Support Docs".to_string()
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_vs_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_poll_timeout_secs() -> u64 {
    300
}

impl VectorStoreConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_backend")]
    pub backend: String,
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: default_state_backend(),
            path: default_state_path(),
        }
    }
}

fn default_state_backend() -> String {
    "sqlite".to_string()
}
fn default_state_path() -> PathBuf {
    PathBuf::from("data/kbsync.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Delete the remote copy of documents that disappeared upstream.
    /// When false they are only reported and their records are kept.
    #[serde(default = "default_true")]
    pub delete_removed: bool,
    /// List the remote store before mutating and re-upload records whose
    /// remote copy is gone.
    #[serde(default = "default_true")]
    pub verify_remote: bool,
    /// Delete remote files that no fingerprint record references.
    #[serde(default)]
    pub prune_orphans: bool,
    #[serde(default = "default_articles_dir")]
    pub articles_dir: PathBuf,
    /// Keep the staging directory after a full run.
    #[serde(default)]
    pub keep_articles: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            delete_removed: true,
            verify_remote: true,
            prune_orphans: false,
            articles_dir: default_articles_dir(),
            keep_articles: false,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_articles_dir() -> PathBuf {
    PathBuf::from("articles")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_log_level() -> String {
    "info".to_string()
}

/// S3-compatible object storage (DigitalOcean Spaces) used for log shipping
/// and state mirroring. Credentials come from the environment.
#[derive(Debug, Deserialize, Clone)]
pub struct SpacesConfig {
    pub bucket: String,
    #[serde(default = "default_spaces_region")]
    pub region: String,
    /// Defaults to `https://<region>.digitaloceanspaces.com`.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,
    #[serde(default = "default_true")]
    pub mirror_state: bool,
}

fn default_spaces_region() -> String {
    "nyc3".to_string()
}
fn default_presign_expiry_secs() -> u64 {
    MAX_PRESIGN_EXPIRY_SECS
}

/// SigV4 presigned URLs cannot outlive seven days.
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate help center
    let api_url = config.helpcenter.api_url.trim();
    if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
        bail!("helpcenter.api_url must be an http(s) URL");
    }
    if !(1..=100).contains(&config.helpcenter.per_page) {
        bail!("helpcenter.per_page must be in [1, 100]");
    }
    if config.helpcenter.max_articles == Some(0) {
        bail!("helpcenter.max_articles must be > 0 when set");
    }

    // Validate vector store
    match config.vector_store.provider.as_str() {
        "openai" => {}
        "directory" => {
            if config.vector_store.root.is_none() {
                bail!("vector_store.root must be set when provider is 'directory'");
            }
        }
        other => bail!(
            "Unknown vector store provider: '{}'. Must be openai or directory.",
            other
        ),
    }

    // Validate state
    match config.state.backend.as_str() {
        "sqlite" | "json" => {}
        other => bail!(
            "Unknown state backend: '{}'. Must be sqlite or json.",
            other
        ),
    }

    // Validate spaces
    if let Some(ref spaces) = config.spaces {
        if spaces.bucket.trim().is_empty() {
            bail!("spaces.bucket must not be empty");
        }
        if !(1..=MAX_PRESIGN_EXPIRY_SECS).contains(&spaces.presign_expiry_secs) {
            bail!(
                "spaces.presign_expiry_secs must be in [1, {}]",
                MAX_PRESIGN_EXPIRY_SECS
            );
        }
    }

    Ok(config)
}
