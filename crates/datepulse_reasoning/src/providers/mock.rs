//! Mock providers: deterministic responses for tests and offline runs.

use crate::api_types::{CompletionResponse, Message};
use crate::embedding::EmbeddingClient;
use crate::llm::{CompletionParams, LlmClient};
use anyhow::Result;
use datepulse_core::Embedding;

#[derive(Debug, Clone)]
enum Reply {
    Echo,
    Fixed(String),
    Fail,
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    model: String,
    reply: Reply,
}

impl MockProvider {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            reply: Reply::Echo,
        }
    }

    /// Always answer with `text`.
    pub fn with_reply(text: impl Into<String>) -> Self {
        Self {
            model: "mock".to_string(),
            reply: Reply::Fixed(text.into()),
        }
    }

    /// Every call errors, as an unreachable service would.
    pub fn failing() -> Self {
        Self {
            model: "mock".to_string(),
            reply: Reply::Fail,
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        _system: &str,
        messages: Vec<Message>,
        _params: CompletionParams,
    ) -> Result<CompletionResponse> {
        let text = match &self.reply {
            Reply::Echo => format!(
                "(Mock {} Response) I received {} message(s).",
                self.model,
                messages.len()
            ),
            Reply::Fixed(text) => text.clone(),
            Reply::Fail => anyhow::bail!("Mock provider configured to fail"),
        };
        Ok(CompletionResponse {
            text,
            stop_reason: Some("stop".to_string()),
            usage: None,
        })
    }
}

/// Offline embedder using feature hashing over lowercase words.
///
/// Texts sharing most of their vocabulary land close together, unrelated
/// texts land far apart. Output is L2-normalised and fully deterministic.
#[derive(Debug, Clone)]
pub struct MockEmbeddingClient {
    dimension: usize,
    fail_marker: Option<String>,
}

impl Default for MockEmbeddingClient {
    fn default() -> Self {
        Self {
            dimension: 64,
            fail_marker: None,
        }
    }
}

impl MockEmbeddingClient {
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            fail_marker: None,
        }
    }

    /// Fail any batch containing a text with `marker` in it.
    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            fail_marker: Some(marker.into()),
            ..Self::default()
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = fnv1a(&word.to_lowercase());
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            values[slot] += sign;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        values
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf29ce484222325u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait::async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                anyhow::bail!("Mock embedding batch rejected");
            }
        }
        texts
            .iter()
            .map(|t| Embedding::new(self.embed_one(t)).map_err(Into::into))
            .collect()
    }
}
