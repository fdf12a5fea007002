pub mod mock;
pub mod openai;

use crate::embedding::EmbeddingClient;
use crate::llm::LlmClient;
use anyhow::Result;
use datepulse_core::{ConfigError, EmbeddingConfig, LlmConfig};
use std::sync::Arc;

pub use mock::{MockEmbeddingClient, MockProvider};
pub use openai::{OpenAiClient, OpenAiEmbeddingClient};

/// Build the text-generation client named by config. `"none"` yields no
/// client, which puts the labeler on its heuristic path.
pub fn build_llm_client(config: &LlmConfig) -> Result<Option<Arc<dyn LlmClient>>> {
    let client: Arc<dyn LlmClient> = match config.provider.to_lowercase().as_str() {
        "none" | "" => return Ok(None),
        "mock" => Arc::new(MockProvider::new(&config.model)),
        "openai" => Arc::new(OpenAiClient::new(
            &config.model,
            config.base_url.as_deref(),
        )?),
        other => {
            return Err(ConfigError::UnknownProvider {
                kind: "llm",
                name: other.to_string(),
            }
            .into())
        }
    };
    tracing::info!("Using {} text-generation provider ({})", client.name(), config.model);
    Ok(Some(client))
}

pub fn build_embedding_client(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    let client: Arc<dyn EmbeddingClient> = match config.provider.to_lowercase().as_str() {
        "mock" => Arc::new(MockEmbeddingClient::default()),
        "openai" => Arc::new(OpenAiEmbeddingClient::new(
            &config.model,
            config.base_url.as_deref(),
        )?),
        other => {
            return Err(ConfigError::UnknownProvider {
                kind: "embedding",
                name: other.to_string(),
            }
            .into())
        }
    };
    tracing::info!("Using {} embedding provider ({})", client.name(), config.model);
    Ok(client)
}
