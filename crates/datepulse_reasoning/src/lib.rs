pub mod api_types;
pub mod embedding;
pub mod json;
pub mod llm;
pub mod providers;

pub use embedding::EmbeddingClient;
pub use llm::{CompletionParams, LlmClient};
pub use providers::{build_embedding_client, build_llm_client};
