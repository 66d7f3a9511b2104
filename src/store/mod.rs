//! Persistent state: bot configuration, chat memory, the knowledge base and
//! the liveness row.
//!
//! The pipeline only sees the [`Store`] trait. Two adapters exist: a
//! PostgREST client for a hosted Supabase project and an embedded SQLite
//! database for local runs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, StoreBackend};
use crate::error::StoreError;

pub mod sqlite;
pub mod supabase;

pub use sqlite::SqliteStore;
pub use supabase::SupabaseStore;

/// Singleton bot configuration row, edited from outside the bot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default, skip_serializing)]
    pub id: Option<i64>,
    #[serde(rename = "discord_channel_id", default)]
    pub allowed_channel_id: Option<String>,
    #[serde(default)]
    pub system_instructions: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial update of [`BotConfig`]; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigUpdate {
    pub allowed_channel_id: Option<String>,
    pub system_instructions: Option<String>,
}

/// One completed turn as stored in `chat_memory`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMemoryRecord {
    #[serde(default)]
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, skip_serializing, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct NewMemory {
    pub user_id: String,
    pub message: String,
    pub summary: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SimilarityMatch {
    pub content: String,
    pub similarity: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
    pub id: i64,
    pub connected: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl BotStatus {
    pub fn now(id: i64, connected: bool) -> Self {
        Self {
            id,
            connected,
            last_heartbeat: Some(Utc::now()),
        }
    }
}

/// Accepts RFC 3339 as well as the offset-less form PostgREST returns for
/// `timestamp without time zone` columns, which is read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Timestamps are informational; one that cannot be read becomes `None`
/// instead of failing the whole row.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

#[async_trait]
pub trait Store: Send + Sync {
    /// First `bot_config` row, if any.
    async fn fetch_config(&self) -> Result<Option<BotConfig>, StoreError>;

    /// Updates the existing config row or creates one.
    async fn update_config(&self, update: ConfigUpdate) -> Result<(), StoreError>;

    async fn insert_memory(&self, record: &NewMemory) -> Result<(), StoreError>;

    /// Newest-first, at most `limit` rows.
    async fn recent_memories(&self, limit: usize) -> Result<Vec<ChatMemoryRecord>, StoreError>;

    /// Knowledge-base entries whose cosine similarity to `embedding` exceeds
    /// `threshold`, best first, at most `count`.
    async fn match_documents(
        &self,
        embedding: &[f32],
        threshold: f64,
        count: usize,
    ) -> Result<Vec<SimilarityMatch>, StoreError>;

    /// Insert-or-replace keyed by `status.id`.
    async fn upsert_status(&self, status: &BotStatus) -> Result<(), StoreError>;

    async fn fetch_status(&self, id: i64) -> Result<Option<BotStatus>, StoreError>;
}

/// Opens the store selected by `STORE_BACKEND`.
pub fn connect(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    match config.store_backend {
        StoreBackend::Supabase => {
            info!("Store: using Supabase at {:?}", config.supabase_url);
            Ok(Arc::new(SupabaseStore::new(config)?))
        }
        StoreBackend::Sqlite => {
            info!("Store: using SQLite database {}", config.database_url);
            let store = SqliteStore::new(&config.database_url)?;
            store.execute_init()?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_row_deserializes_from_postgrest() {
        let json = r#"{
            "id": 7,
            "discord_channel_id": "123456789012345678",
            "system_instructions": null,
            "updated_at": "2025-02-05T14:30:15.123456+00:00"
        }"#;
        let config: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.id, Some(7));
        assert_eq!(config.allowed_channel_id.as_deref(), Some("123456789012345678"));
        assert_eq!(config.system_instructions, None);
        assert!(config.updated_at.is_some());
    }

    #[test]
    fn test_rows_with_naive_timestamps_decode() {
        let configs: Vec<BotConfig> = serde_json::from_str(
            r#"[{"id":1,"discord_channel_id":"123","system_instructions":"Be terse.","updated_at":"2025-02-05T14:30:15.123456"}]"#,
        )
        .unwrap();
        assert_eq!(configs[0].allowed_channel_id.as_deref(), Some("123"));
        assert_eq!(
            configs[0].updated_at.map(|t| t.to_rfc3339()),
            Some("2025-02-05T14:30:15.123456+00:00".to_string())
        );

        let records: Vec<ChatMemoryRecord> = serde_json::from_str(
            r#"[{"user_id":"42","message":"User: hi\nBot: hello","summary":"Greeted user.","created_at":"2025-02-05 14:30:15"}]"#,
        )
        .unwrap();
        assert_eq!(records[0].summary.as_deref(), Some("Greeted user."));
        assert!(records[0].created_at.is_some());

        let status: BotStatus =
            serde_json::from_str(r#"{"id":1,"connected":true,"last_heartbeat":"not a time"}"#).unwrap();
        assert!(status.connected);
        assert_eq!(status.last_heartbeat, None);
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert!(parse_timestamp("2025-02-05T14:30:15Z").is_some());
        assert!(parse_timestamp("2025-02-05T14:30:15.5+02:00").is_some());
        assert!(parse_timestamp("2025-02-05T14:30:15").is_some());
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_match_ignores_extra_columns() {
        let json = r#"[{"id": 1, "content": "doc", "similarity": 0.82}]"#;
        let matches: Vec<SimilarityMatch> = serde_json::from_str(json).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].content, "doc");
    }
}
