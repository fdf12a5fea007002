//! Stage 1: language and length filtering.
//!
//! Lossy: anything too short or not recognised as English is deleted, not
//! kept under another language tag.

use anyhow::Result;
use datepulse_core::{Language, PipelineConfig, Store};
use serde::Serialize;
use std::sync::Arc;

/// Function words used by the English heuristic.
///
/// The heuristic is crude. Short slang-heavy posts can fall under the ratio
/// and get dropped even when they are English.
pub const COMMON_ENGLISH_WORDS: [&str; 40] = [
    "the", "be", "to", "of", "and", "a", "in", "that", "have", "i", "it", "for", "not", "on",
    "with", "he", "as", "you", "do", "at", "this", "but", "his", "by", "from", "they", "we",
    "say", "her", "she", "or", "an", "will", "my", "one", "all", "would", "there", "their",
    "what",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanSummary {
    pub processed: usize,
    pub kept: usize,
    pub filtered: usize,
}

/// Share of whitespace tokens that are common English function words.
pub fn english_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut matches = 0usize;
    for token in text.split_whitespace() {
        total += 1;
        let word = token
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if COMMON_ENGLISH_WORDS.contains(&word.as_str()) {
            matches += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        matches as f64 / total as f64
    }
}

pub fn is_english(text: &str, threshold: f64) -> bool {
    english_ratio(text) >= threshold
}

pub struct ContentCleaner {
    store: Arc<dyn Store>,
    min_chars: usize,
    english_threshold: f64,
}

impl ContentCleaner {
    pub fn new(store: Arc<dyn Store>, config: &PipelineConfig) -> Self {
        Self {
            store,
            min_chars: config.min_content_chars,
            english_threshold: config.english_ratio_threshold,
        }
    }

    pub async fn run(&self) -> Result<CleanSummary> {
        let items = self.store.content_by_language(Language::Unknown).await?;
        let mut summary = CleanSummary::default();

        for item in items {
            summary.processed += 1;
            let keep = item.body.chars().count() >= self.min_chars
                && is_english(&item.text(), self.english_threshold);

            let outcome = if keep {
                self.store.set_language(item.id, Language::En).await
            } else {
                self.store.delete_content(item.id).await
            };
            match outcome {
                Ok(()) if keep => summary.kept += 1,
                Ok(()) => summary.filtered += 1,
                Err(e) => tracing::warn!(content_id = %item.id, "Failed to clean item: {:#}", e),
            }
        }

        tracing::info!(
            processed = summary.processed,
            kept = summary.kept,
            filtered = summary.filtered,
            "Content cleaning complete"
        );
        Ok(summary)
    }
}
