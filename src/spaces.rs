//! S3-compatible object storage (DigitalOcean Spaces) for log shipping and
//! fingerprint-state mirroring.
//!
//! Requests are signed with AWS Signature Version 4 using `hmac` + `sha2`.
//! Objects are addressed path-style: `https://{endpoint}/{bucket}/{key}`.
//!
//! # Configuration
//!
//! ```toml
//! [spaces]
//! bucket = "kb-sync-logs"
//! region = "nyc3"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! presign_expiry_secs = 604800
//! mirror_state = true
//! ```
//!
//! # Environment Variables
//!
//! - `SPACES_KEY` (or `DO_SPACES_KEY`): required
//! - `SPACES_SECRET` (or `DO_SPACES_SECRET`): required
//!
//! # Objects
//!
//! | Key | Written by | Semantics |
//! |-----|------------|-----------|
//! | `last_run.log` | [`SpacesClient::ship_logs`] | overwritten every run |
//! | `daily.log` | [`SpacesClient::ship_logs`] | existing object + unshipped tail of `upload.log` |
//! | `<state file name>` | [`SpacesClient::mirror_state`] | copy of the fingerprint store |

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;

use crate::config::SpacesConfig;
use crate::logging::LogFiles;

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const LAST_RUN_KEY: &str = "last_run.log";
const DAILY_LOG_KEY: &str = "daily.log";

/// Access key pair loaded from the environment.
struct SpacesCredentials {
    access_key: String,
    secret_key: String,
}

impl SpacesCredentials {
    fn from_env() -> Result<Self> {
        let access_key = env_with_fallback("SPACES_KEY", "DO_SPACES_KEY")?;
        let secret_key = env_with_fallback("SPACES_SECRET", "DO_SPACES_SECRET")?;
        Ok(Self {
            access_key,
            secret_key,
        })
    }
}

fn env_with_fallback(primary: &str, fallback: &str) -> Result<String> {
    std::env::var(primary)
        .or_else(|_| std::env::var(fallback))
        .with_context(|| format!("{} (or {}) environment variable not set", primary, fallback))
}

/// Presigned download links for shipped logs.
#[derive(Debug, Default, Clone)]
pub struct ShippedLogs {
    pub last_run_url: Option<String>,
    pub daily_log_url: Option<String>,
}

pub struct SpacesClient {
    client: reqwest::Client,
    creds: SpacesCredentials,
    bucket: String,
    region: String,
    /// Scheme and host, no trailing slash.
    endpoint: String,
    host: String,
    presign_expiry_secs: u64,
}

impl SpacesClient {
    pub fn from_config(config: &SpacesConfig) -> Result<Self> {
        let creds = SpacesCredentials::from_env()?;
        Self::with_credentials(config, creds)
    }

    fn with_credentials(config: &SpacesConfig, creds: SpacesCredentials) -> Result<Self> {
        let endpoint = config
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.digitaloceanspaces.com", config.region))
            .trim_end_matches('/')
            .to_string();
        let host = endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            creds,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint,
            host,
            presign_expiry_secs: config.presign_expiry_secs,
        })
    }

    fn canonical_uri(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        format!("/{}/{}", uri_encode(&self.bucket), encoded_key)
    }

    fn credential_scope(&self, date_stamp: &str) -> String {
        format!("{}/{}/{}/aws4_request", date_stamp, self.region, SERVICE)
    }

    /// Build the `Authorization` header for a header-signed request.
    fn authorization(
        &self,
        method: &str,
        canonical_uri: &str,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> (String, String) {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let headers = [
            ("host", self.host.as_str()),
            ("x-amz-content-sha256", payload_hash),
            ("x-amz-date", amz_date.as_str()),
        ];
        let signed_headers = headers.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, canonical_uri, canonical_headers, signed_headers, payload_hash
        );
        let credential_scope = self.credential_scope(&date_stamp);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key =
            derive_signing_key(&self.creds.secret_key, &date_stamp, &self.region, SERVICE);
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key, credential_scope, signed_headers, signature
        );
        (authorization, amz_date)
    }

    /// Download an object. Returns `None` when it does not exist.
    pub async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let canonical_uri = self.canonical_uri(key);
        let payload_hash = hex_sha256(b"");
        let (authorization, amz_date) =
            self.authorization("GET", &canonical_uri, &payload_hash, Utc::now());

        let resp = self
            .client
            .get(format!("{}{}", self.endpoint, canonical_uri))
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get s3://{}/{}: {}", self.bucket, key, e))?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "GetObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    /// Upload (overwrite) an object.
    pub async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let canonical_uri = self.canonical_uri(key);
        let payload_hash = hex_sha256(&body);
        let (authorization, amz_date) =
            self.authorization("PUT", &canonical_uri, &payload_hash, Utc::now());

        let resp = self
            .client
            .put(format!("{}{}", self.endpoint, canonical_uri))
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .body(body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to put s3://{}/{}: {}", self.bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(())
    }

    /// Presigned GET URL for `key`, valid for `presign_expiry_secs`.
    pub fn presign_get(&self, key: &str, now: DateTime<Utc>) -> String {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let canonical_uri = self.canonical_uri(key);
        let credential_scope = self.credential_scope(&date_stamp);

        let mut params = vec![
            ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.creds.access_key, credential_scope),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            (
                "X-Amz-Expires".to_string(),
                self.presign_expiry_secs.to_string(),
            ),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring = params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
            canonical_uri, canonical_querystring, self.host, UNSIGNED_PAYLOAD
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key =
            derive_signing_key(&self.creds.secret_key, &date_stamp, &self.region, SERVICE);
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        format!(
            "{}{}?{}&X-Amz-Signature={}",
            self.endpoint, canonical_uri, canonical_querystring, signature
        )
    }

    /// Upload `last_run.log` (overwrite) and append the part of `upload.log`
    /// not shipped yet onto the remote `daily.log`. Empty or missing local
    /// files are skipped.
    pub async fn ship_logs(&self, logs: &LogFiles) -> Result<ShippedLogs> {
        let mut shipped = ShippedLogs::default();

        match read_nonempty(&logs.last_run)? {
            Some(content) => {
                tracing::info!(bytes = content.len(), "uploading {}", LAST_RUN_KEY);
                self.put_object(LAST_RUN_KEY, content).await?;
                shipped.last_run_url = Some(self.presign_get(LAST_RUN_KEY, Utc::now()));
            }
            None => tracing::warn!("{} not found or empty, skipping", LAST_RUN_KEY),
        }

        match read_unshipped(&logs.upload, &logs.upload_offset)? {
            Some((content, shipped_to)) => {
                let existing = self.get_object(DAILY_LOG_KEY).await?.unwrap_or_default();
                let merged = merge_daily_log(existing, &content);
                tracing::info!(
                    bytes = merged.len(),
                    new = content.len(),
                    "uploading {}",
                    DAILY_LOG_KEY
                );
                self.put_object(DAILY_LOG_KEY, merged).await?;
                record_shipped(&logs.upload_offset, shipped_to)?;
                shipped.daily_log_url = Some(self.presign_get(DAILY_LOG_KEY, Utc::now()));
            }
            None => tracing::warn!("no new upload log lines, skipping"),
        }

        Ok(shipped)
    }

    /// Download the state file when it does not exist locally.
    /// Returns true when a copy was restored.
    pub async fn restore_state(&self, path: &Path) -> Result<bool> {
        if path.exists() {
            tracing::debug!(path = %path.display(), "state file present locally");
            return Ok(false);
        }
        let key = state_key(path)?;
        match self.get_object(&key).await? {
            Some(bytes) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                tracing::info!(key = %key, "restored state from object storage");
                Ok(true)
            }
            None => {
                tracing::info!(key = %key, "no remote state yet, starting fresh");
                Ok(false)
            }
        }
    }

    /// Upload the local state file.
    pub async fn mirror_state(&self, path: &Path) -> Result<()> {
        let key = state_key(path)?;
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        self.put_object(&key, bytes).await?;
        tracing::info!(key = %key, "mirrored state to object storage");
        Ok(())
    }
}

fn read_nonempty(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(None),
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Bytes of `log` past the offset recorded in `offset_file`, with the
/// log length to record once they are shipped. A log shorter than the
/// offset was rotated or truncated and is shipped from the start.
fn read_unshipped(log: &Path, offset_file: &Path) -> Result<Option<(Vec<u8>, u64)>> {
    let Some(content) = read_nonempty(log)? else {
        return Ok(None);
    };
    let len = content.len() as u64;
    let offset = match std::fs::read_to_string(offset_file) {
        Ok(text) => text.trim().parse::<u64>().unwrap_or(0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", offset_file.display()))
        }
    };
    let start = if offset > len { 0 } else { offset };
    if start == len {
        return Ok(None);
    }
    Ok(Some((content[start as usize..].to_vec(), len)))
}

fn record_shipped(offset_file: &Path, len: u64) -> Result<()> {
    std::fs::write(offset_file, len.to_string())
        .with_context(|| format!("Failed to write {}", offset_file.display()))
}

fn merge_daily_log(mut existing: Vec<u8>, new: &[u8]) -> Vec<u8> {
    if !existing.is_empty() && !existing.ends_with(b"\n") {
        existing.push(b'\n');
    }
    existing.extend_from_slice(new);
    existing
}

fn state_key(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| anyhow::anyhow!("state path has no file name: {}", path.display()))
}

// ============ SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}
