use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

use super::{Embedder, TextGenerator};
use crate::config::Config;
use crate::error::{EmbeddingError, GenerationError};

/// Client for OpenAI-compatible servers (llama.cpp, vLLM, hosted APIs).
pub struct LlmClient {
    chat_client: Client<OpenAIConfig>,
    embedding_client: Client<OpenAIConfig>,
    chat_model: String,
    embedding_model: String,
    query_prefix: Option<String>,
}

impl LlmClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let chat_config = OpenAIConfig::new()
            .with_api_base(&config.llama_url)
            .with_api_key(config.llama_api_key.as_deref().unwrap_or("unused"));

        let embedding_config = OpenAIConfig::new()
            .with_api_base(&config.embedding_url)
            .with_api_key(config.embedding_api_key.as_deref().unwrap_or("unused"));

        let http = reqwest::Client::builder()
            .timeout(config.llm_timeout())
            .build()?;

        Ok(Self {
            chat_client: Client::with_config(chat_config).with_http_client(http.clone()),
            embedding_client: Client::with_config(embedding_config).with_http_client(http),
            chat_model: config.llama_model.clone(),
            embedding_model: config.embedding_model.clone(),
            query_prefix: config.embedding_query_prefix.clone(),
        })
    }

    pub async fn chat(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String, GenerationError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(messages)
            .build()
            .map_err(classify_error)?;

        let response = self
            .chat_client
            .chat()
            .create(request)
            .await
            .map_err(classify_error)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }

    /// OpenAI-style servers have no task parameter; asymmetric models take an
    /// instruction prefix on the query side instead.
    fn query_input(&self, text: &str) -> String {
        match &self.query_prefix {
            Some(prefix) => format!("{}{}", prefix, text),
            None => text.to_string(),
        }
    }
}

fn is_rate_limit_message(kind: Option<&str>, message: &str) -> bool {
    let lowered = message.to_lowercase();
    matches!(kind, Some("rate_limit_exceeded") | Some("requests") | Some("tokens"))
        || lowered.contains("rate limit")
        || lowered.contains("resource_exhausted")
        || lowered.contains("too many requests")
}

fn classify_error(err: OpenAIError) -> GenerationError {
    match err {
        OpenAIError::ApiError(api) => {
            if is_rate_limit_message(api.r#type.as_deref(), &api.message) {
                GenerationError::RateLimited(api.message)
            } else {
                GenerationError::Backend(api.message)
            }
        }
        OpenAIError::Reqwest(e) if e.status().map(|s| s.as_u16()) == Some(429) => {
            GenerationError::RateLimited(e.to_string())
        }
        other => GenerationError::Backend(other.to_string()),
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(classify_error)?;
        self.chat(vec![message.into()]).await
    }
}

#[async_trait]
impl Embedder for LlmClient {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input(self.query_input(text))
            .build()
            .map_err(|e| EmbeddingError::Backend(e.to_string()))?;

        let response = self
            .embedding_client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingError::Backend(e.to_string()))?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or(EmbeddingError::Empty)?
            .embedding;

        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmProvider, StoreBackend};
    use std::time::Duration;

    fn test_config(prefix: Option<&str>) -> Config {
        Config {
            discord_token: "test".to_string(),
            owner_id: None,
            register_commands: false,
            llm_provider: LlmProvider::OpenAi,
            gemini_api_key: None,
            gemini_api_url: "test".to_string(),
            gemini_model: "test".to_string(),
            gemini_embedding_model: "test".to_string(),
            llama_url: "http://localhost:8080/v1".to_string(),
            llama_model: "test".to_string(),
            llama_api_key: None,
            embedding_url: "http://localhost:8080/v1".to_string(),
            embedding_model: "test".to_string(),
            embedding_api_key: None,
            embedding_query_prefix: prefix.map(str::to_string),
            llm_timeout_secs: 5,
            store_backend: StoreBackend::Sqlite,
            supabase_url: None,
            supabase_key: None,
            database_url: ":memory:".to_string(),
            heartbeat_interval: Duration::from_secs(10),
            bot_status_id: 1,
            memory_limit: 5,
        }
    }

    #[test]
    fn test_query_prefix() {
        let client = LlmClient::new(&test_config(Some("search_query: "))).unwrap();
        assert_eq!(client.query_input("rust"), "search_query: rust");

        let plain = LlmClient::new(&test_config(None)).unwrap();
        assert_eq!(plain.query_input("rust"), "rust");
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(is_rate_limit_message(Some("rate_limit_exceeded"), "slow down"));
        assert!(is_rate_limit_message(None, "Rate limit reached for requests"));
        assert!(is_rate_limit_message(None, "429 Too Many Requests"));
        assert!(!is_rate_limit_message(Some("invalid_request_error"), "model not found"));
    }
}
