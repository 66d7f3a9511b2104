//! Error types for each external boundary.
//!
//! The pipeline decides how each of these degrades; none of them is ever
//! shown to a Discord user verbatim.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store request failed (status: {status}): {message}")]
    Api { status: u16, message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid timestamp in store: {0}")]
    Timestamp(String),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding request failed (status: {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Embedding backend error: {0}")]
    Backend(String),

    #[error("No embedding returned")]
    Empty,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    /// The only error class worth retrying.
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation request failed (status: {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Prompt blocked by provider: {0}")]
    Blocked(String),

    #[error("Generation backend error: {0}")]
    Backend(String),

    #[error("Provider returned no text")]
    EmptyResponse,
}

impl GenerationError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Discord error: {0}")]
    Discord(#[from] serenity::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
