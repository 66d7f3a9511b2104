use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, LlmProvider};
use crate::error::{EmbeddingError, GenerationError};

pub mod client;
pub mod gemini;
pub mod retry;

pub use client::LlmClient;
pub use gemini::GeminiClient;
pub use retry::{GenerationClient, RetryPolicy};

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds `text` as a search query. Asymmetric models encode queries
    /// differently from the stored documents they are matched against.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Builds the generation and embedding backends selected by `LLM_PROVIDER`.
pub fn backends(config: &Config) -> anyhow::Result<(Arc<dyn TextGenerator>, Arc<dyn Embedder>)> {
    match config.llm_provider {
        LlmProvider::Gemini => {
            let client = Arc::new(GeminiClient::new(config)?);
            Ok((client.clone(), client))
        }
        LlmProvider::OpenAi => {
            let client = Arc::new(LlmClient::new(config)?);
            Ok((client.clone(), client))
        }
    }
}
