//! Stage 2: attach embedding vectors to cleaned English content.

use anyhow::Result;
use chrono::{Duration, Utc};
use datepulse_core::{ContentItem, EmbeddingConfig, Store};
use datepulse_reasoning::EmbeddingClient;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};

static RE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmbedSummary {
    pub processed: usize,
    pub embedded: usize,
    pub failed_batches: usize,
}

/// Strip URLs, collapse whitespace and cut to `max_chars` characters.
pub fn preprocess(text: &str, max_chars: usize) -> String {
    let without_urls = RE_URL.replace_all(text, " ");
    let collapsed = without_urls.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => collapsed[..cut].to_string(),
        None => collapsed,
    }
}

pub struct EmbeddingGenerator {
    store: Arc<dyn Store>,
    client: Arc<dyn EmbeddingClient>,
    config: EmbeddingConfig,
    lookback_days: i64,
}

impl EmbeddingGenerator {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn EmbeddingClient>,
        config: EmbeddingConfig,
        lookback_days: i64,
    ) -> Self {
        Self {
            store,
            client,
            config,
            lookback_days,
        }
    }

    pub async fn run(&self) -> Result<EmbedSummary> {
        let since = Utc::now() - Duration::days(self.lookback_days);
        let items = self
            .store
            .content_needing_embedding(since, self.config.max_items)
            .await?;
        let mut summary = EmbedSummary {
            processed: items.len(),
            ..EmbedSummary::default()
        };
        if items.is_empty() {
            tracing::info!("No content needs embedding");
            return Ok(summary);
        }

        let batch_size = self.config.batch_size.max(1);
        for (batch_no, batch) in items.chunks(batch_size).enumerate() {
            match self.embed_batch(batch).await {
                Ok(count) => summary.embedded += count,
                Err(e) => {
                    summary.failed_batches += 1;
                    tracing::warn!(batch = batch_no, size = batch.len(), "Embedding batch failed: {:#}", e);
                    self.clear_batch(batch).await;
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            embedded = summary.embedded,
            failed_batches = summary.failed_batches,
            "Embedding generation complete"
        );
        Ok(summary)
    }

    async fn embed_batch(&self, batch: &[ContentItem]) -> Result<usize> {
        let texts: Vec<String> = batch
            .iter()
            .map(|item| preprocess(&item.text(), self.config.max_chars))
            .collect();
        let vectors = self.client.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            anyhow::bail!(
                "Embedding service returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            );
        }

        let mut stored = 0;
        for (item, vector) in batch.iter().zip(&vectors) {
            match self.store.set_embedding(item.id, Some(vector)).await {
                Ok(()) => stored += 1,
                Err(e) => tracing::warn!(content_id = %item.id, "Failed to store embedding: {:#}", e),
            }
        }
        Ok(stored)
    }

    /// A failed batch leaves every item without a vector until the next run.
    async fn clear_batch(&self, batch: &[ContentItem]) {
        for item in batch {
            if let Err(e) = self.store.set_embedding(item.id, None).await {
                tracing::warn!(content_id = %item.id, "Failed to clear embedding: {:#}", e);
            }
        }
    }
}
