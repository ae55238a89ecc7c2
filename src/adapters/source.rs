//! Article sources.
//!
//! `JsonlSource` reads news items exported by a feed fetcher, one JSON object
//! per line:
//!
//! ```json
//! {"title": "...", "link": "...", "resolved_url": "...", "published_at": "...", "html": "..."}
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use super::SourceAdapter;
use crate::domain::ContentItem;

/// One line of a news export
#[derive(Debug, Deserialize)]
struct NewsRecord {
    #[serde(default)]
    title: Option<String>,

    link: String,

    /// Final URL after redirects; preferred for identity when present
    #[serde(default)]
    resolved_url: Option<String>,

    #[serde(default)]
    published_at: Option<String>,

    #[serde(default)]
    html: Option<String>,

    #[serde(default)]
    text: Option<String>,

    #[serde(default)]
    language: Option<String>,
}

/// Source reading a JSONL export lazily
#[derive(Debug, Clone)]
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Turn one JSONL line into a content item
    pub fn parse_record(line: &str) -> Result<ContentItem> {
        let record: NewsRecord = serde_json::from_str(line).context("Invalid news record")?;

        let url = record
            .resolved_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(record.link);
        if url.trim().is_empty() {
            anyhow::bail!("News record has no URL");
        }

        let published_raw = record
            .published_at
            .with_context(|| format!("News record for {} has no published_at", url))?;
        let published_at = parse_timestamp(&published_raw)
            .with_context(|| format!("Unparseable published_at '{}'", published_raw))?;

        let payload = record
            .html
            .or(record.text)
            .filter(|p| !p.trim().is_empty())
            .with_context(|| format!("News record for {} has no html or text", url))?;

        let mut item = ContentItem::new(url, payload, published_at);
        if let Some(title) = record.title.filter(|t| !t.trim().is_empty()) {
            item = item.with_title(title.trim());
        }
        if let Some(language) = record.language.filter(|l| !l.trim().is_empty()) {
            item = item.with_language(language.trim().to_lowercase());
        }
        Ok(item)
    }
}

/// Accept RFC 3339 (exports) and RFC 2822 (raw RSS pubDate)
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .context("Expected an RFC 3339 or RFC 2822 timestamp")
}

enum ReadState {
    Unopened(PathBuf),
    Reading {
        path: PathBuf,
        lines: Lines<BufReader<File>>,
        line_no: usize,
    },
    Done,
}

impl SourceAdapter for JsonlSource {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn items(&self) -> BoxStream<'static, Result<ContentItem>> {
        stream::unfold(ReadState::Unopened(self.path.clone()), |state| async move {
            let (path, mut lines, mut line_no) = match state {
                ReadState::Unopened(path) => match File::open(&path).await {
                    Ok(file) => {
                        let lines = BufReader::new(file).lines();
                        (path, lines, 0)
                    }
                    Err(e) => {
                        let err = anyhow::Error::new(e)
                            .context(format!("Failed to open source: {}", path.display()));
                        return Some((Err(err), ReadState::Done));
                    }
                },
                ReadState::Reading {
                    path,
                    lines,
                    line_no,
                } => (path, lines, line_no),
                ReadState::Done => return None,
            };

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        line_no += 1;
                        if line.trim().is_empty() {
                            continue;
                        }
                        let item = Self::parse_record(&line)
                            .with_context(|| format!("{}:{}", path.display(), line_no));
                        let next = ReadState::Reading {
                            path,
                            lines,
                            line_no,
                        };
                        return Some((item, next));
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        let err = anyhow::Error::new(e)
                            .context(format!("Failed to read source: {}", path.display()));
                        return Some((Err(err), ReadState::Done));
                    }
                }
            }
        })
        .boxed()
    }
}

/// Fixed in-memory source
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    items: Vec<ContentItem>,
}

impl VecSource {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self { items }
    }
}

impl SourceAdapter for VecSource {
    fn name(&self) -> &str {
        "memory"
    }

    fn items(&self) -> BoxStream<'static, Result<ContentItem>> {
        stream::iter(self.items.clone().into_iter().map(Ok)).boxed()
    }
}
