//! Native Gemini REST client (`generateContent` / `embedContent`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, TextGenerator};
use crate::config::Config;
use crate::error::{EmbeddingError, GenerationError};

const QUERY_TASK_TYPE: &str = "RETRIEVAL_QUERY";

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let api_key = config
            .gemini_api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("GEMINI_API_KEY must be set"))?;
        let http = reqwest::Client::builder()
            .timeout(config.llm_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.gemini_api_url.trim_end_matches('/').to_string(),
            api_key,
            model: model_path(&config.gemini_model),
            embedding_model: model_path(&config.gemini_embedding_model),
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, model, method)
    }
}

/// Gemini addresses models as `models/<name>`; accept either form.
fn model_path(name: &str) -> String {
    if name.starts_with("models/") {
        name.to_string()
    } else {
        format!("models/{}", name)
    }
}

/// Maps a non-success Gemini response onto the generation error taxonomy.
/// Quota exhaustion arrives as HTTP 429 with status `RESOURCE_EXHAUSTED`.
fn classify_error(status: u16, body: &str) -> GenerationError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());

    let exhausted = parsed
        .as_ref()
        .map(|e| e.error.status == "RESOURCE_EXHAUSTED")
        .unwrap_or(false);

    if status == 429 || exhausted {
        GenerationError::RateLimited(message)
    } else {
        GenerationError::Api { status, message }
    }
}

fn extract_text(response: GenerateResponse) -> Result<String, GenerationError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerationError::Blocked(reason));
    }

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .http
            .post(self.endpoint(&self.model, "generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &body));
        }

        let parsed: GenerateResponse = response.json().await?;
        extract_text(parsed)
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbedRequest {
            model: self.embedding_model.clone(),
            content: Content {
                parts: vec![Part { text }],
            },
            task_type: QUERY_TASK_TYPE,
        };

        let response = self
            .http
            .post(self.endpoint(&self.embedding_model, "embedContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: EmbedResponse = response.json().await?;
        debug!("Gemini: embedding with {} dimensions", parsed.embedding.values.len());
        if parsed.embedding.values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        Ok(parsed.embedding.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_path() {
        assert_eq!(model_path("gemini-2.0-flash"), "models/gemini-2.0-flash");
        assert_eq!(model_path("models/text-embedding-004"), "models/text-embedding-004");
    }

    #[test]
    fn test_classify_rate_limit() {
        let body = r#"{"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}}"#;
        match classify_error(429, body) {
            GenerationError::RateLimited(msg) => assert_eq!(msg, "Quota exceeded"),
            other => panic!("expected rate limit, got {:?}", other),
        }

        // Status field alone is enough
        assert!(classify_error(400, r#"{"error": {"status": "RESOURCE_EXHAUSTED"}}"#).is_rate_limited());
    }

    #[test]
    fn test_classify_other_errors() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#;
        match classify_error(400, body) {
            GenerationError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "API key not valid");
            }
            other => panic!("expected api error, got {:?}", other),
        }

        match classify_error(502, "Bad Gateway") {
            GenerationError::Api { message, .. } => assert_eq!(message, "Bad Gateway"),
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let json = r#"{"candidates": [{"content": {"parts": [{"text": "hi "}, {"text": "there"}]}}]}"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(extract_text(response).unwrap(), "hi there");
    }

    #[test]
    fn test_extract_text_blocked_and_empty() {
        let blocked = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let response: GenerateResponse = serde_json::from_str(blocked).unwrap();
        assert!(matches!(extract_text(response), Err(GenerationError::Blocked(r)) if r == "SAFETY"));

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates": []}"#).unwrap();
        assert!(matches!(extract_text(empty), Err(GenerationError::EmptyResponse)));
    }

    #[test]
    fn test_embed_request_shape() {
        let request = EmbedRequest {
            model: "models/text-embedding-004".into(),
            content: Content {
                parts: vec![Part { text: "what is rust" }],
            },
            task_type: QUERY_TASK_TYPE,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["taskType"], "RETRIEVAL_QUERY");
        assert_eq!(value["content"]["parts"][0]["text"], "what is rust");
    }
}
