//! Article → document normalization.
//!
//! Converts a [`RawArticle`] into a [`Document`]: a stable identifier derived
//! from the title, Markdown text converted from the HTML body, and a SHA-256
//! content hash. Every step is deterministic so that re-running on the same
//! article yields a byte-identical body and hash.
//!
//! Documents are written to disk with a small frontmatter block:
//!
//! ```text
//! ---
//! title: Getting started
//! article_id: 360001
//! url: https://support.example.com/hc/articles/360001
//! created_at: 2024-01-02T03:04:05Z
//! updated_at: 2024-05-06T07:08:09Z
//! ---
//!
//! # Getting started
//!
//! ...body...
//! ```
//!
//! The hash covers only the text after the frontmatter, so timestamp churn
//! upstream never registers as a content change.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::OnceLock;

use crate::models::{Document, RawArticle};

const FRONTMATTER_FENCE: &str = "---";

/// Normalize one article.
pub fn normalize(article: &RawArticle) -> Document {
    let title = normalize_title(&article.title, &article.id);
    let mut id = slugify(&title);
    if id.is_empty() {
        id = format!("article-{}", article.id);
    }

    let body = format!("# {}\n\n{}", title, html_to_markdown(&article.body_html));
    let content_hash = content_hash(&body);

    Document {
        id,
        article_id: article.id.clone(),
        title,
        source_url: article.html_url.clone(),
        created_at: article.created_at,
        updated_at: article.updated_at,
        body,
        content_hash,
    }
}

/// Hex-encoded SHA-256 of a normalized body.
pub fn content_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Convert text to a filename-safe slug.
///
/// Lowercases, drops everything but word characters, whitespace and
/// hyphens, then collapses whitespace/hyphen runs into a single `-`.
pub fn slugify(text: &str) -> String {
    static STRIP: OnceLock<Regex> = OnceLock::new();
    static DASHES: OnceLock<Regex> = OnceLock::new();
    let strip = STRIP.get_or_init(|| Regex::new(r"[^\w\s-]").unwrap());
    let dashes = DASHES.get_or_init(|| Regex::new(r"[-\s]+").unwrap());

    let lowered = text.to_lowercase();
    let stripped = strip.replace_all(&lowered, "");
    let slug = dashes.replace_all(&stripped, "-");
    slug.trim_matches('-').to_string()
}

/// Convert an HTML body to clean Markdown.
///
/// Falls back to tag-stripped text if the converter rejects the input.
pub fn html_to_markdown(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    // Some exports double-escape angle brackets and quotes.
    let html = html
        .replace("\\u003C", "<")
        .replace("\\u003E", ">")
        .replace("\\u003D", "=")
        .replace("\\u0022", "\"");

    let markdown = match htmd::convert(&html) {
        Ok(md) => md,
        Err(e) => {
            tracing::warn!(error = %e, "HTML conversion failed, stripping tags instead");
            strip_tags(&html)
        }
    };

    clean_markdown(&markdown)
}

/// Whitespace normalization applied after conversion.
fn clean_markdown(markdown: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static NEWLINES: OnceLock<Regex> = OnceLock::new();
    let spaces = SPACES.get_or_init(|| Regex::new(r" {2,}").unwrap());
    let newlines = NEWLINES.get_or_init(|| Regex::new(r"\n{3,}").unwrap());

    let unified = markdown.replace("\r\n", "\n").replace('\u{a0}', " ");
    let lines: Vec<String> = unified
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                spaces.replace_all(line.trim_end(), " ").into_owned()
            }
        })
        .collect();
    let joined = lines.join("\n");
    newlines.replace_all(&joined, "\n\n").trim().to_string()
}

fn strip_tags(html: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]*>").unwrap());
    tags.replace_all(html, " ").into_owned()
}

fn normalize_title(title: &str, article_id: &str) -> String {
    let collapsed = title.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        format!("Article {}", article_id)
    } else {
        collapsed
    }
}

/// Render a document as the Markdown file that gets staged and uploaded.
pub fn render_document(doc: &Document) -> String {
    format!(
        "{fence}\ntitle: {title}\narticle_id: {article_id}\nurl: {url}\ncreated_at: {created}\nupdated_at: {updated}\n{fence}\n\n{body}",
        fence = FRONTMATTER_FENCE,
        title = doc.title,
        article_id = doc.article_id,
        url = doc.source_url.as_deref().unwrap_or(""),
        created = format_ts(doc.created_at),
        updated = format_ts(doc.updated_at),
        body = doc.body,
    )
}

/// Parse a rendered document back. `id` is the file stem it was stored under.
pub fn parse_document(id: &str, text: &str) -> Result<Document> {
    let text = text.replace("\r\n", "\n");
    let rest = text
        .strip_prefix("---\n")
        .ok_or_else(|| anyhow::anyhow!("missing frontmatter in '{}'", id))?;
    let end = rest
        .find("\n---\n")
        .ok_or_else(|| anyhow::anyhow!("unterminated frontmatter in '{}'", id))?;
    let frontmatter = &rest[..end];
    let after = &rest[end + "\n---\n".len()..];
    let body = after.strip_prefix('\n').unwrap_or(after);

    let mut title = None;
    let mut article_id = None;
    let mut url = None;
    let mut created_at = None;
    let mut updated_at = None;

    for line in frontmatter.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "title" => title = Some(value.to_string()),
            "article_id" => article_id = Some(value.to_string()),
            "url" => url = non_empty(value),
            "created_at" => created_at = parse_ts(value),
            "updated_at" => updated_at = parse_ts(value),
            _ => {}
        }
    }

    let Some(title) = title else {
        bail!("frontmatter in '{}' has no title", id);
    };

    Ok(Document {
        id: id.to_string(),
        article_id: article_id.unwrap_or_default(),
        title,
        source_url: url,
        created_at,
        updated_at,
        body: body.to_string(),
        content_hash: content_hash(body),
    })
}

/// Read a staged `<id>.md` file.
pub fn read_document_file(path: &Path) -> Result<Document> {
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(|| anyhow::anyhow!("not a document file: {}", path.display()))?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    parse_document(&id, &text)
}

fn format_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(id: &str, title: &str, body: &str) -> RawArticle {
        RawArticle {
            id: id.to_string(),
            title: title.to_string(),
            body_html: body.to_string(),
            html_url: Some(format!("https://support.example.com/hc/articles/{}", id)),
            created_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            updated_at: Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()),
        }
    }

    #[test]
    fn slugify_matches_expected_shapes() {
        assert_eq!(slugify("How to Pair a Device?"), "how-to-pair-a-device");
        assert_eq!(slugify("  Spaces -- and -- dashes  "), "spaces-and-dashes");
        assert_eq!(slugify("snake_case stays"), "snake_case-stays");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn empty_slug_falls_back_to_article_id() {
        let doc = normalize(&article("42", "???", "<p>x</p>"));
        assert_eq!(doc.id, "article-42");
        assert_eq!(doc.filename(), "article-42.md");
    }

    #[test]
    fn missing_title_gets_placeholder() {
        let doc = normalize(&article("7", "   ", "<p>x</p>"));
        assert_eq!(doc.title, "Article 7");
        assert_eq!(doc.id, "article-7");
    }

    #[test]
    fn normalize_is_deterministic() {
        let a = article("1", "Setup", "<h2>Step one</h2><p>Plug it   in.</p>");
        assert_eq!(normalize(&a), normalize(&a));
    }

    #[test]
    fn body_starts_with_title_heading() {
        let doc = normalize(&article("1", "Setup", "<p>Hello</p>"));
        assert!(doc.body.starts_with("# Setup\n\n"));
        assert!(doc.body.contains("Hello"));
    }

    #[test]
    fn timestamp_change_does_not_change_hash() {
        let a = article("1", "Setup", "<p>Hello</p>");
        let mut b = a.clone();
        b.updated_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(normalize(&a).content_hash, normalize(&b).content_hash);
    }

    #[test]
    fn formatting_churn_does_not_change_hash() {
        let a = article("1", "Setup", "<p>Hello world</p>");
        let b = article("1", "Setup", "<p>Hello   world</p>\n\n\n\n");
        assert_eq!(normalize(&a).content_hash, normalize(&b).content_hash);
    }

    #[test]
    fn content_change_changes_hash() {
        let a = article("1", "Setup", "<p>Hello</p>");
        let b = article("1", "Setup", "<p>Goodbye</p>");
        assert_ne!(normalize(&a).content_hash, normalize(&b).content_hash);
    }

    #[test]
    fn clean_markdown_collapses_whitespace() {
        let cleaned = clean_markdown("a  b\n   \n\n\n\nc   \r\nd");
        assert_eq!(cleaned, "a b\n\nc\nd");
    }

    #[test]
    fn escaped_markup_is_unescaped() {
        let md = html_to_markdown("\\u003Cp\\u003EEscaped\\u003C/p\\u003E");
        assert_eq!(md, "Escaped");
    }

    #[test]
    fn rendered_document_parses_back_identically() {
        let doc = normalize(&article(
            "360001",
            "Getting started",
            "<p>First</p><ul><li>one</li><li>two</li></ul>",
        ));
        let rendered = render_document(&doc);
        assert!(rendered.starts_with("---\ntitle: Getting started\narticle_id: 360001\n"));
        let parsed = parse_document(&doc.id, &rendered).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn parse_rejects_missing_frontmatter() {
        assert!(parse_document("x", "# Just markdown\n").is_err());
        assert!(parse_document("x", "---\ntitle: x\n# never closed\n").is_err());
    }

    #[test]
    fn empty_url_and_timestamps_parse_as_none() {
        let text = "---\ntitle: T\narticle_id: 1\nurl: \ncreated_at: \nupdated_at: \n---\n\n# T\n\n";
        let doc = parse_document("t", text).unwrap();
        assert_eq!(doc.source_url, None);
        assert_eq!(doc.created_at, None);
        assert_eq!(doc.body, "# T\n\n");
    }
}
