use crate::api_types::{CompletionResponse, Message};
use anyhow::Result;
use async_trait::async_trait;

/// Parameters for a single completion request.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    /// Maximum tokens to generate (will be clamped to provider limits)
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Ask the provider to constrain output to a JSON object.
    pub json_mode: bool,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.3,
            json_mode: false,
        }
    }
}

/// External text-generation service. Call-and-wait, no streaming, no retry:
/// callers own the fallback when a call fails.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<CompletionResponse>;
}
