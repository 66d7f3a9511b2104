use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{EmbeddingError, StoreError};
use crate::llm::Embedder;
use crate::store::{SimilarityMatch, Store};

pub const MATCH_THRESHOLD: f64 = 0.5;
pub const MATCH_COUNT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchParams {
    pub threshold: f64,
    pub count: usize,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            threshold: MATCH_THRESHOLD,
            count: MATCH_COUNT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("similarity search failed: {0}")]
    Store(#[from] StoreError),
}

/// Looks up knowledge-base entries similar to a user message.
#[derive(Clone)]
pub struct ContextRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn Store>,
    params: MatchParams,
}

impl ContextRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn Store>) -> Self {
        Self {
            embedder,
            store,
            params: MatchParams::default(),
        }
    }

    #[cfg(test)]
    fn with_params(mut self, params: MatchParams) -> Self {
        self.params = params;
        self
    }

    pub async fn try_retrieve(&self, query: &str) -> Result<Vec<SimilarityMatch>, RetrievalError> {
        let embedding = self.embedder.embed_query(query).await?;
        let matches = self
            .store
            .match_documents(&embedding, self.params.threshold, self.params.count)
            .await?;
        debug!("RAG: {} matches for query", matches.len());
        Ok(matches)
    }

    /// Best effort: any failure yields no context rather than failing the turn.
    pub async fn retrieve(&self, query: &str) -> Vec<SimilarityMatch> {
        self.try_retrieve(query).await.unwrap_or_else(|e| {
            warn!("Error in RAG: {}", e);
            Vec::new()
        })
    }
}

/// Joins match contents with blank lines. No matches gives an empty block.
pub fn context_block(matches: &[SimilarityMatch]) -> String {
    matches
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
