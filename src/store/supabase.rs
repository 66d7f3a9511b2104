use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{BotConfig, BotStatus, ChatMemoryRecord, ConfigUpdate, NewMemory, SimilarityMatch, Store};
use crate::config::Config;
use crate::error::StoreError;
use crate::gate::UNSET_CHANNEL_SENTINEL;

// Only the columns the bot reads; timestamps are written, never needed back.
const CONFIG_COLUMNS: &str = "id,discord_channel_id,system_instructions";
const MEMORY_COLUMNS: &str = "user_id,message,summary";

/// Talks to a Supabase project through its PostgREST endpoint.
pub struct SupabaseStore {
    http: reqwest::Client,
    rest_url: String,
}

impl SupabaseStore {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let url = config
            .supabase_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("SUPABASE_URL must be set"))?;
        let key = config
            .supabase_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("SUPABASE_KEY must be set"))?;
        Self::with_credentials(url, key, Duration::from_secs(30))
    }

    pub fn with_credentials(url: &str, key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(key)?);
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            rest_url: format!("{}/rest/v1", url.trim_end_matches('/')),
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}/{}", self.rest_url, name)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StoreError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let response = self.http.get(self.table(table)).query(query).send().await?;
        let rows = Self::check(response).await?.json::<Vec<T>>().await?;
        debug!("Supabase: {} returned {} rows", table, rows.len());
        Ok(rows)
    }
}

#[async_trait]
impl Store for SupabaseStore {
    async fn fetch_config(&self) -> Result<Option<BotConfig>, StoreError> {
        let rows: Vec<BotConfig> = self
            .select(
                "bot_config",
                &[
                    ("select", CONFIG_COLUMNS.into()),
                    ("order", "id.asc".into()),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn update_config(&self, update: ConfigUpdate) -> Result<(), StoreError> {
        let existing = self.fetch_config().await?;
        let now = Utc::now();

        let response = match existing.and_then(|c| c.id) {
            Some(id) => {
                let mut payload = serde_json::Map::new();
                payload.insert("updated_at".into(), json!(now));
                if let Some(instructions) = update.system_instructions {
                    payload.insert("system_instructions".into(), json!(instructions));
                }
                if let Some(channel) = update.allowed_channel_id {
                    payload.insert("discord_channel_id".into(), json!(channel));
                }
                self.http
                    .patch(self.table("bot_config"))
                    .query(&[("id", format!("eq.{}", id))])
                    .header("Prefer", "return=minimal")
                    .json(&Value::Object(payload))
                    .send()
                    .await?
            }
            None => {
                let payload = json!({
                    "system_instructions": update.system_instructions.unwrap_or_default(),
                    "discord_channel_id": update
                        .allowed_channel_id
                        .unwrap_or_else(|| UNSET_CHANNEL_SENTINEL.to_string()),
                    "updated_at": now,
                });
                self.http
                    .post(self.table("bot_config"))
                    .header("Prefer", "return=minimal")
                    .json(&payload)
                    .send()
                    .await?
            }
        };
        Self::check(response).await?;
        Ok(())
    }

    async fn insert_memory(&self, record: &NewMemory) -> Result<(), StoreError> {
        let response = self
            .http
            .post(self.table("chat_memory"))
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn recent_memories(&self, limit: usize) -> Result<Vec<ChatMemoryRecord>, StoreError> {
        self.select(
            "chat_memory",
            &[
                ("select", MEMORY_COLUMNS.into()),
                ("order", "created_at.desc".into()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn match_documents(
        &self,
        embedding: &[f32],
        threshold: f64,
        count: usize,
    ) -> Result<Vec<SimilarityMatch>, StoreError> {
        let response = self
            .http
            .post(format!("{}/rpc/match_documents", self.rest_url))
            .json(&json!({
                "query_embedding": embedding,
                "match_threshold": threshold,
                "match_count": count,
            }))
            .send()
            .await?;
        let matches = Self::check(response).await?.json::<Vec<SimilarityMatch>>().await?;
        Ok(matches)
    }

    async fn upsert_status(&self, status: &BotStatus) -> Result<(), StoreError> {
        let response = self
            .http
            .post(self.table("bot_status"))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(status)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn fetch_status(&self, id: i64) -> Result<Option<BotStatus>, StoreError> {
        let rows: Vec<BotStatus> = self
            .select(
                "bot_status",
                &[
                    ("select", "id,connected,last_heartbeat".into()),
                    ("id", format!("eq.{}", id)),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}
