use crate::source::Source;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datepulse_core::{ContentItem, ContentMetadata, Platform};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One line of an offline dump.
#[derive(Debug, Deserialize)]
struct Record {
    platform: Platform,
    source_id: String,
    #[serde(default)]
    title: Option<String>,
    body: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    score: Option<i64>,
    #[serde(default)]
    extra: BTreeMap<String, String>,
}

impl From<Record> for ContentItem {
    fn from(record: Record) -> Self {
        let mut item =
            ContentItem::new(record.platform, record.source_id, record.body, record.published_at);
        item.title = record.title;
        item.metadata = ContentMetadata {
            author: record.author,
            url: record.url,
            score: record.score,
            extra: record.extra,
        };
        item
    }
}

/// Reads newline-delimited JSON exported by a scraper or an earlier run.
pub struct JsonlSource {
    path: PathBuf,
    name: String,
}

impl JsonlSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("jsonl:{}", path.display()),
            path,
        }
    }
}

#[async_trait]
impl Source for JsonlSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<ContentItem>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        let mut items = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(record) => items.push(record.into()),
                Err(e) => {
                    tracing::warn!(line = line_no + 1, "Skipping malformed record: {}", e)
                }
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_reads_records_and_skips_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"platform":"youtube","source_id":"vid1","title":"Dating app fatigue","body":"Why everyone is tired of swiping","published_at":"2025-10-01T12:00:00Z","url":"https://youtu.be/vid1"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(
            file,
            r#"{{"platform":"reddit","source_id":"t3_x","body":"second","published_at":"2025-10-02T08:30:00Z","score":42}}"#
        )
        .unwrap();

        let source = JsonlSource::new(file.path());
        let items = source.fetch().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].platform, Platform::Youtube);
        assert_eq!(items[0].title.as_deref(), Some("Dating app fatigue"));
        assert_eq!(items[0].metadata.url.as_deref(), Some("https://youtu.be/vid1"));
        assert_eq!(items[1].metadata.score, Some(42));
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let source = JsonlSource::new("/nonexistent/dump.jsonl");
        assert!(source.fetch().await.is_err());
    }
}
