//! OpenAI-compatible providers.
//!
//! Both clients talk to any endpoint speaking the OpenAI wire format
//! (`/chat/completions`, `/embeddings`), so self-hosted gateways work by
//! pointing `base_url` elsewhere.

use crate::api_types::{CompletionResponse, Message, Role, Usage};
use crate::embedding::{validate_batch, EmbeddingClient};
use crate::llm::{CompletionParams, LlmClient};
use anyhow::{Context, Result};
use datepulse_core::{ConfigError, Embedding};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Read the API key, failing with a configuration error before any work starts.
fn api_key_from_env() -> Result<String, ConfigError> {
    require_api_key(env::var(API_KEY_VAR).ok())
}

fn require_api_key(value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ConfigError::MissingCredential {
            provider: "openai".to_string(),
            var: API_KEY_VAR,
        }),
    }
}

fn resolve_base_url(configured: Option<&str>) -> String {
    configured
        .map(str::to_string)
        .or_else(|| env::var("OPENAI_BASE_URL").ok())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
        .trim_end_matches('/')
        .to_string()
}

// =============================================================================
// Chat completions
// =============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(model: &str, base_url: Option<&str>) -> Result<Self> {
        let api_key = api_key_from_env()?;
        Self::with_credentials(api_key, resolve_base_url(base_url), model)
    }

    pub fn with_credentials(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: &str,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(60)).build()?,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

/// Convert messages to OpenAI format, with the system prompt first.
fn build_openai_messages(system: &str, messages: Vec<Message>) -> Vec<Value> {
    let mut openai_messages = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        openai_messages.push(json!({"role": "system", "content": system}));
    }
    for msg in messages {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        openai_messages.push(json!({"role": role, "content": msg.content}));
    }
    openai_messages
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    #[tracing::instrument(skip(self, system, messages, params), fields(model = %self.model))]
    async fn complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<CompletionResponse> {
        let mut payload = json!({
            "model": self.model,
            "messages": build_openai_messages(system, messages),
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        if params.json_mode {
            payload["response_format"] = json!({"type": "json_object"});
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("Failed to send request to OpenAI")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API Error ({}): {}", status, error_text);
        }

        // Parse Response
        let resp_json: Value = response.json().await.context("Invalid OpenAI response body")?;
        let choice = &resp_json["choices"][0];
        let text = choice["message"]["content"]
            .as_str()
            .context("OpenAI response has no message content")?
            .to_string();
        let stop_reason = choice["finish_reason"].as_str().map(|s| s.to_string());
        let usage = serde_json::from_value::<Usage>(resp_json["usage"].clone()).ok();

        Ok(CompletionResponse {
            text,
            stop_reason,
            usage,
        })
    }
}

// =============================================================================
// Embeddings
// =============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingClient {
    pub fn new(model: &str, base_url: Option<&str>) -> Result<Self> {
        let api_key = api_key_from_env()?;
        Self::with_credentials(api_key, resolve_base_url(base_url), model)
    }

    pub fn with_credentials(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: &str,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(120)).build()?,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    fn name(&self) -> &str {
        "openai"
    }

    #[tracing::instrument(skip(self, texts), fields(model = %self.model, batch = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({"model": self.model, "input": texts}))
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API Error ({}): {}", status, error_text);
        }

        let mut body: EmbeddingResponse = response
            .json()
            .await
            .context("Invalid embedding response body")?;
        // The API reports positions explicitly; do not trust array order.
        body.data.sort_by_key(|d| d.index);

        validate_batch(
            texts.len(),
            body.data.into_iter().map(|d| d.embedding).collect(),
        )
    }
}
