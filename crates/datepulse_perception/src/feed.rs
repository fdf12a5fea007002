use crate::source::{strip_html, validate_url, Source};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datepulse_core::{ContentItem, ContentMetadata, Platform};
use rss::{Channel, Item};
use std::time::Duration;

/// A subreddit or YouTube channel exposed as an RSS feed.
pub struct RssSource {
    url: String,
    name: String,
    platform: Platform,
    client: reqwest::Client,
}

impl RssSource {
    pub fn new(url: &str, platform: Platform) -> Result<Self> {
        validate_url(url)?;
        Ok(Self {
            url: url.to_string(),
            name: format!("rss:{}:{}", platform, url),
            platform,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent("datepulse/0.1")
                .build()?,
        })
    }

    fn convert(&self, item: &Item) -> Option<ContentItem> {
        // GUID first, link as fallback; an entry with neither cannot be deduplicated.
        let source_id = item
            .guid()
            .map(|g| g.value().to_string())
            .or_else(|| item.link().map(str::to_string))?;

        let body = item
            .content()
            .or_else(|| item.description())
            .map(strip_html)
            .unwrap_or_default();
        let published_at = item
            .pub_date()
            .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let mut content = ContentItem::new(self.platform, source_id, body, published_at);
        content.title = item.title().map(strip_html);
        content.metadata = ContentMetadata {
            author: item.author().map(str::to_string),
            url: item.link().map(str::to_string),
            ..ContentMetadata::default()
        };
        Some(content)
    }
}

#[async_trait]
impl Source for RssSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<ContentItem>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch RSS feed")?;
        if !response.status().is_success() {
            anyhow::bail!("RSS feed returned HTTP {}", response.status());
        }
        let bytes = response.bytes().await?;

        let channel = Channel::read_from(&bytes[..]).context("Failed to parse RSS feed")?;

        let items: Vec<ContentItem> = channel
            .items()
            .iter()
            .filter_map(|item| self.convert(item))
            .collect();
        let skipped = channel.items().len() - items.len();
        if skipped > 0 {
            tracing::warn!(source = %self.name, skipped, "Feed entries without guid or link skipped");
        }
        tracing::debug!(source = %self.name, count = items.len(), "Fetched feed");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
<channel>
  <title>r/dating</title>
  <link>https://www.reddit.com/r/dating</link>
  <description>posts</description>
  <item>
    <title>Is texting after the first date too eager?</title>
    <link>https://www.reddit.com/r/dating/comments/abc</link>
    <guid>t3_abc</guid>
    <description>&lt;p&gt;We had a great time and I want to text her tonight.&lt;/p&gt;</description>
    <pubDate>Tue, 14 Oct 2025 10:00:00 GMT</pubDate>
  </item>
  <item>
    <title>Link only</title>
    <link>https://www.reddit.com/r/dating/comments/def</link>
    <description>Second post body</description>
  </item>
  <item>
    <title>No identity</title>
    <description>Cannot dedup this one</description>
  </item>
</channel>
</rss>"#;

    #[tokio::test]
    async fn test_fetch_converts_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/dating/.rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .mount(&server)
            .await;

        let source =
            RssSource::new(&format!("{}/r/dating/.rss", server.uri()), Platform::Reddit).unwrap();
        let items = source.fetch().await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_id, "t3_abc");
        assert_eq!(items[0].platform, Platform::Reddit);
        assert_eq!(
            items[0].body,
            "We had a great time and I want to text her tonight."
        );
        assert_eq!(items[0].published_at.to_rfc3339(), "2025-10-14T10:00:00+00:00");
        assert_eq!(
            items[1].source_id,
            "https://www.reddit.com/r/dating/comments/def"
        );
        assert!(items.iter().all(|i| i.embedding.is_none()));
    }

    #[tokio::test]
    async fn test_fetch_fails_on_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = RssSource::new(&format!("{}/feed", server.uri()), Platform::Youtube).unwrap();
        assert!(source.fetch().await.is_err());
    }
}
