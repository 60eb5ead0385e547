//! Help-center article fetcher.
//!
//! Pages through a Zendesk-style articles endpoint
//! (`GET <api_url>?page=N&per_page=M&sort_by=...&sort_order=...`) and returns
//! every article as a [`RawArticle`]. Responses look like:
//!
//! ```json
//! { "articles": [ { "id": 1, "title": "...", "body": "<p>..</p>", ... } ],
//!   "next_page": "https://.../articles.json?page=2" }
//! ```
//!
//! Paging stops when a page comes back empty, `next_page` is null, or the
//! configured `max_articles` cap is reached. Hitting the cap while more
//! articles remain marks the result as truncated. Any failing page fails the
//! whole fetch with a [`FetchError`]; there is no retry at this layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::config::HelpCenterConfig;
use crate::error::FetchError;
use crate::models::RawArticle;

/// Hard stop for APIs that keep returning a `next_page`.
const MAX_PAGES: u32 = 10_000;

/// Result of a full fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedArticles {
    pub articles: Vec<RawArticle>,
    /// The `max_articles` cap cut the listing short; articles missing from
    /// `articles` may still exist upstream.
    pub truncated: bool,
}

/// A source of help-center articles.
///
/// [`HelpCenterClient`] is the production implementation; tests drive the
/// pipeline with fixed article lists.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Fetch the current article set.
    async fn fetch_all(&self) -> Result<FetchedArticles, FetchError>;
}

/// HTTP client for the help-center articles API.
pub struct HelpCenterClient {
    config: HelpCenterConfig,
    client: reqwest::Client,
}

impl HelpCenterClient {
    pub fn new(config: &HelpCenterConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("kb-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    async fn fetch_page(&self, page: u32) -> Result<ArticlePage, FetchError> {
        let resp = self
            .client
            .get(&self.config.api_url)
            .query(&[
                ("page", page.to_string()),
                ("per_page", self.config.per_page.to_string()),
                ("sort_by", self.config.sort_by.clone()),
                ("sort_order", self.config.sort_order.clone()),
            ])
            .send()
            .await
            .map_err(|source| FetchError::Transport { page, source })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                page,
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let text = resp
            .text()
            .await
            .map_err(|source| FetchError::Transport { page, source })?;
        parse_page(page, &text, self.config.base_url.as_deref())
    }
}

#[async_trait]
impl ArticleSource for HelpCenterClient {
    fn name(&self) -> &str {
        "helpcenter"
    }

    async fn fetch_all(&self) -> Result<FetchedArticles, FetchError> {
        let mut articles: Vec<RawArticle> = Vec::new();
        let mut truncated = false;
        let mut page = 1u32;

        loop {
            if page > MAX_PAGES {
                return Err(FetchError::Malformed {
                    page,
                    reason: format!("pagination did not terminate after {} pages", MAX_PAGES),
                });
            }

            let batch = self.fetch_page(page).await?;
            if batch.articles.is_empty() {
                break;
            }

            articles.extend(batch.articles);
            tracing::info!(page, total = articles.len(), "fetched article page");

            if let Some(cap) = self.config.max_articles {
                if articles.len() >= cap {
                    truncated = articles.len() > cap || batch.has_next;
                    articles.truncate(cap);
                    if truncated {
                        tracing::warn!(cap, "stopped at max_articles; more articles exist upstream");
                    }
                    break;
                }
            }
            if !batch.has_next {
                break;
            }

            page += 1;
            if self.config.page_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.page_delay_ms)).await;
            }
        }

        Ok(FetchedArticles {
            articles,
            truncated,
        })
    }
}

/// One decoded page of results.
#[derive(Debug)]
struct ArticlePage {
    articles: Vec<RawArticle>,
    has_next: bool,
}

#[derive(Deserialize)]
struct WirePage {
    articles: Option<Vec<WireArticle>>,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Deserialize)]
struct WireArticle {
    id: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

fn parse_page(page: u32, text: &str, base_url: Option<&str>) -> Result<ArticlePage, FetchError> {
    let wire: WirePage = serde_json::from_str(text).map_err(|e| FetchError::Malformed {
        page,
        reason: e.to_string(),
    })?;

    let Some(raw) = wire.articles else {
        return Err(FetchError::Malformed {
            page,
            reason: "response has no 'articles' array".to_string(),
        });
    };

    let mut articles = Vec::with_capacity(raw.len());
    for item in raw {
        let id = match item.id {
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::String(s)) if !s.is_empty() => s,
            _ => {
                return Err(FetchError::Malformed {
                    page,
                    reason: "article without a usable id".to_string(),
                })
            }
        };

        let title = item
            .title
            .filter(|t| !t.trim().is_empty())
            .or(item.name)
            .unwrap_or_else(|| format!("Article {}", id));

        let html_url = item.html_url.filter(|u| !u.is_empty()).or_else(|| {
            base_url.map(|base| format!("{}/hc/articles/{}", base.trim_end_matches('/'), id))
        });

        articles.push(RawArticle {
            title,
            body_html: item.body.unwrap_or_default(),
            html_url,
            created_at: item.created_at.as_deref().and_then(parse_timestamp),
            updated_at: item.updated_at.as_deref().and_then(parse_timestamp),
            id,
        });
    }

    Ok(ArticlePage {
        articles,
        has_next: wire.next_page.is_some_and(|next| !next.is_empty()),
    })
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
