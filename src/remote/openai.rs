//! OpenAI vector-store adapter.
//!
//! Talks to the OpenAI REST API directly with `reqwest`:
//!
//! | Operation | Calls |
//! |-----------|-------|
//! | resolve store | `GET /vector_stores/{id}`, else `POST /vector_stores` |
//! | upload | `POST /files` (multipart, `purpose=assistants`) → `POST /vector_stores/{id}/files` → poll `GET /vector_stores/{id}/files/{file}` |
//! | delete | `DELETE /vector_stores/{id}/files/{file}` → `DELETE /files/{file}` |
//! | list | `GET /vector_stores/{id}/files?limit=100&after=...`, names from `GET /files` |
//!
//! Requires the `OPENAI_API_KEY` environment variable.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 404 → [`RemoteError::NotFound`], no retry
//! - Other 4xx → fail immediately
//! - Network errors → retry, except for `POST /files`: a request that
//!   timed out may still have created the file, and a blind retry would
//!   leave an unreferenced duplicate behind
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::VectorStoreConfig;
use crate::error::RemoteError;
use crate::models::{RemoteFile, RemoteHandle};

use super::VectorStore;

const LIST_PAGE_SIZE: u32 = 100;

/// Which failures a request may be retried on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Rate limits, server errors and network errors.
    Transient,
    /// Rate limits and server errors only. For requests that are not safe
    /// to repeat when it is unknown whether the server saw them.
    StatusOnly,
}

impl Retry {
    fn allows(self, err: &RemoteError) -> bool {
        match self {
            Retry::Transient => err.is_transient(),
            Retry::StatusOnly => matches!(err, RemoteError::Http { .. }) && err.is_transient(),
        }
    }
}

pub struct OpenAiVectorStore {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    store_id: String,
    max_retries: u32,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl OpenAiVectorStore {
    /// Build the client and resolve (or create) the target vector store.
    ///
    /// In `production` the configured store must exist; elsewhere a missing
    /// or unknown id falls back to creating a fresh store named
    /// `vector_store.name`.
    pub async fn connect(config: &VectorStoreConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let mut store = Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            store_id: String::new(),
            max_retries: config.max_retries,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
        };
        store.store_id = store.resolve_store(config).await?;
        Ok(store)
    }

    async fn resolve_store(&self, config: &VectorStoreConfig) -> Result<String> {
        let configured = config.id.as_deref().map(str::trim).filter(|id| !id.is_empty());

        if let Some(id) = configured {
            let url = format!("{}/vector_stores/{}", self.api_base, id);
            match self.execute("retrieve vector store", || self.client.get(&url)).await {
                Ok(_) => {
                    tracing::info!(vector_store = id, "using existing vector store");
                    return Ok(id.to_string());
                }
                Err(e) if config.is_production() => {
                    bail!("vector store {} is not usable in production: {}", id, e);
                }
                Err(e) => {
                    tracing::warn!(vector_store = id, error = %e, "vector store not found, creating a new one");
                }
            }
        } else if config.is_production() {
            bail!("vector_store.id must be set in the production environment");
        }

        let url = format!("{}/vector_stores", self.api_base);
        let body = json!({ "name": config.name });
        let created = self
            .execute("create vector store", || self.client.post(&url).json(&body))
            .await?;
        let id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("create vector store response has no id"))?
            .to_string();
        tracing::info!(vector_store = %id, name = %config.name, "created vector store");
        Ok(id)
    }

    /// Send a request built by `build`, retrying transient failures.
    async fn execute<F>(&self, what: &str, build: F) -> Result<Value, RemoteError>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        self.execute_with(what, Retry::Transient, build).await
    }

    /// Send a request built by `build`, retrying the failures `retry` allows.
    ///
    /// `build` is called once per attempt because multipart bodies cannot be
    /// cloned.
    async fn execute_with<F>(
        &self,
        what: &str,
        retry: Retry,
        build: F,
    ) -> Result<Value, RemoteError>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = build()
                .bearer_auth(&self.api_key)
                .header("OpenAI-Beta", "assistants=v2")
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|e| RemoteError::Protocol(format!("{}: {}", what, e)));
                    }

                    let body: String = response
                        .text()
                        .await
                        .unwrap_or_default()
                        .chars()
                        .take(500)
                        .collect();

                    if status.as_u16() == 404 {
                        return Err(RemoteError::NotFound(format!("{}: {}", what, body)));
                    }

                    let err = RemoteError::Http {
                        status: status.as_u16(),
                        body,
                    };
                    if retry.allows(&err) {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    let err = RemoteError::Transport(format!("{}: {}", what, e));
                    if retry.allows(&err) {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| RemoteError::Transport(format!("{}: retries exhausted", what))))
    }

    /// Poll until the vector store has finished ingesting `file_id`.
    async fn wait_until_indexed(&self, file_id: &str) -> Result<(), RemoteError> {
        let url = format!(
            "{}/vector_stores/{}/files/{}",
            self.api_base, self.store_id, file_id
        );
        let started = Instant::now();

        loop {
            let status = self
                .execute("poll file status", || self.client.get(&url))
                .await?;
            match status.get("status").and_then(Value::as_str) {
                Some("completed") => return Ok(()),
                Some(state @ ("failed" | "cancelled")) => {
                    let reason = status
                        .pointer("/last_error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("no error message");
                    return Err(RemoteError::Protocol(format!(
                        "indexing {} {}: {}",
                        file_id, state, reason
                    )));
                }
                _ => {}
            }

            if started.elapsed() >= self.poll_timeout {
                return Err(RemoteError::Transport(format!(
                    "indexing {} did not finish within {}s",
                    file_id,
                    self.poll_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Map of file id to file name for every `assistants` file in the
    /// account. Vector store listings carry ids only.
    async fn file_names(&self) -> Result<HashMap<String, String>, RemoteError> {
        let url = format!("{}/files", self.api_base);
        let mut names = HashMap::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![
                ("purpose".to_string(), "assistants".to_string()),
                ("limit".to_string(), LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(ref cursor) = after {
                query.push(("after".to_string(), cursor.clone()));
            }

            let page = self
                .execute("list files", || self.client.get(&url).query(&query))
                .await?;

            let (batch, has_more) = parse_file_names(&page)?;
            let last = batch.last().map(|(id, _)| id.clone());
            names.extend(batch);

            match (has_more, last) {
                (true, Some(cursor)) => after = Some(cursor),
                _ => break,
            }
        }

        Ok(names)
    }

    /// Best-effort removal of an uploaded file that never made it into the store.
    async fn discard_file(&self, file_id: &str) {
        let url = format!("{}/files/{}", self.api_base, file_id);
        if let Err(e) = self.execute("delete file", || self.client.delete(&url)).await {
            tracing::warn!(file_id, error = %e, "failed to clean up stray upload");
        }
    }
}

#[async_trait]
impl VectorStore for OpenAiVectorStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    async fn upload(&self, filename: &str, content: &str) -> Result<RemoteHandle, RemoteError> {
        let files_url = format!("{}/files", self.api_base);
        let uploaded = self
            .execute_with("upload file", Retry::StatusOnly, || {
                let part = multipart::Part::bytes(content.as_bytes().to_vec())
                    .file_name(filename.to_string());
                let form = multipart::Form::new()
                    .text("purpose", "assistants")
                    .part("file", part);
                self.client.post(&files_url).multipart(form)
            })
            .await?;

        let file_id = uploaded
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Protocol("file upload response has no id".to_string()))?
            .to_string();

        let attach_url = format!("{}/vector_stores/{}/files", self.api_base, self.store_id);
        let attach_body = json!({ "file_id": file_id });
        if let Err(e) = self
            .execute("attach file", || {
                self.client.post(&attach_url).json(&attach_body)
            })
            .await
        {
            self.discard_file(&file_id).await;
            return Err(e);
        }

        if let Err(e) = self.wait_until_indexed(&file_id).await {
            let handle = RemoteHandle::new(file_id.clone());
            if let Err(cleanup) = self.delete(&handle).await {
                tracing::warn!(file_id = %file_id, error = %cleanup, "failed to detach unindexed file");
            }
            return Err(e);
        }

        Ok(RemoteHandle::new(file_id))
    }

    async fn delete(&self, handle: &RemoteHandle) -> Result<(), RemoteError> {
        let detach_url = format!(
            "{}/vector_stores/{}/files/{}",
            self.api_base,
            self.store_id,
            handle.as_str()
        );
        let detached = self
            .execute("detach file", || self.client.delete(&detach_url))
            .await;

        // The vector store only references the file; remove the file itself
        // too so it does not linger in the account.
        let file_url = format!("{}/files/{}", self.api_base, handle.as_str());
        if let Err(e) = self
            .execute("delete file", || self.client.delete(&file_url))
            .await
        {
            if !e.is_not_found() {
                tracing::warn!(file_id = %handle, error = %e, "failed to delete underlying file");
            }
        }

        detached.map(|_| ())
    }

    async fn list(&self) -> Result<Option<Vec<RemoteFile>>, RemoteError> {
        let url = format!("{}/vector_stores/{}/files", self.api_base, self.store_id);
        let mut files = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![("limit".to_string(), LIST_PAGE_SIZE.to_string())];
            if let Some(ref cursor) = after {
                query.push(("after".to_string(), cursor.clone()));
            }

            let page = self
                .execute("list vector store files", || {
                    self.client.get(&url).query(&query)
                })
                .await?;

            let (batch, has_more) = parse_file_list(&page)?;
            let last = batch.last().map(|f| f.handle.to_string());
            files.extend(batch);

            match (has_more, last) {
                (true, Some(cursor)) => after = Some(cursor),
                _ => break,
            }
        }

        if !files.is_empty() {
            let mut names = self.file_names().await?;
            for file in &mut files {
                file.filename = names.remove(file.handle.as_str());
            }
        }

        Ok(Some(files))
    }
}

fn parse_file_list(page: &Value) -> Result<(Vec<RemoteFile>, bool), RemoteError> {
    let data = page
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| RemoteError::Protocol("file list response has no data array".to_string()))?;

    let mut files = Vec::with_capacity(data.len());
    for item in data {
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Protocol("file list entry has no id".to_string()))?;
        files.push(RemoteFile {
            handle: RemoteHandle::new(id),
            filename: None,
        });
    }

    let has_more = page
        .get("has_more")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok((files, has_more))
}

/// Parse one `GET /files` page into `(id, filename)` pairs.
fn parse_file_names(page: &Value) -> Result<(Vec<(String, String)>, bool), RemoteError> {
    let data = page
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| RemoteError::Protocol("files response has no data array".to_string()))?;

    let names = data
        .iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(Value::as_str)?;
            let name = item.get("filename").and_then(Value::as_str)?;
            Some((id.to_string(), name.to_string()))
        })
        .collect();

    let has_more = page
        .get("has_more")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok((names, has_more))
}
