use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{BotConfig, BotStatus, ChatMemoryRecord, ConfigUpdate, NewMemory, SimilarityMatch, Store};
use crate::error::StoreError;
use crate::gate::UNSET_CHANNEL_SENTINEL;

/// Embedded store with the same tables as the hosted schema. Embeddings are
/// kept as JSON arrays and matched by cosine similarity in process.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> Result<(), StoreError> {
        info!("Database: Initializing schema...");
        let sql = "
            CREATE TABLE IF NOT EXISTS bot_config (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                discord_channel_id TEXT,
                system_instructions TEXT,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS chat_memory (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                message TEXT NOT NULL,
                summary TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_memory_created ON chat_memory (created_at);

            CREATE TABLE IF NOT EXISTS knowledge_base (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                embedding TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bot_status (
                id INTEGER PRIMARY KEY,
                connected BOOLEAN NOT NULL DEFAULT FALSE,
                last_heartbeat TEXT
            );
        ";
        let conn = self.lock();
        conn.execute_batch(sql)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Adds a knowledge-base entry. Corpus management normally happens
    /// outside the bot; this exists to seed local databases.
    pub async fn insert_document(&self, content: &str, embedding: &[f32]) -> Result<i64, StoreError> {
        let content = content.to_string();
        let embedding = serde_json::to_string(embedding)?;
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO knowledge_base (content, embedding) VALUES (?1, ?2)",
                (content, embedding),
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock only means another statement panicked; the
        // connection itself is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = store.lock();
            f(&conn)
        })
        .await?
    }
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|ts| super::parse_timestamp(&ts).ok_or(StoreError::Timestamp(ts)))
        .transpose()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl Store for SqliteStore {
    async fn fetch_config(&self) -> Result<Option<BotConfig>, StoreError> {
        self.run_blocking(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, discord_channel_id, system_instructions, updated_at
                     FROM bot_config ORDER BY id LIMIT 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(id, channel, instructions, updated_at)| {
                Ok(BotConfig {
                    id: Some(id),
                    allowed_channel_id: channel,
                    system_instructions: instructions,
                    updated_at: parse_timestamp(updated_at)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn update_config(&self, update: ConfigUpdate) -> Result<(), StoreError> {
        self.run_blocking(move |conn| {
            let now = timestamp_now();
            let existing: Option<i64> = conn
                .query_row("SELECT id FROM bot_config ORDER BY id LIMIT 1", [], |row| row.get(0))
                .optional()?;

            match existing {
                Some(id) => {
                    // NULL parameters keep the current column value
                    conn.execute(
                        "UPDATE bot_config SET
                            system_instructions = COALESCE(?1, system_instructions),
                            discord_channel_id = COALESCE(?2, discord_channel_id),
                            updated_at = ?3
                         WHERE id = ?4",
                        params![update.system_instructions, update.allowed_channel_id, now, id],
                    )?;
                }
                None => {
                    conn.execute(
                        "INSERT INTO bot_config (discord_channel_id, system_instructions, updated_at)
                         VALUES (?1, ?2, ?3)",
                        params![
                            update
                                .allowed_channel_id
                                .unwrap_or_else(|| UNSET_CHANNEL_SENTINEL.to_string()),
                            update.system_instructions.unwrap_or_default(),
                            now
                        ],
                    )?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn insert_memory(&self, record: &NewMemory) -> Result<(), StoreError> {
        let record = record.clone();
        debug!("Database: Saving memory for user {}", record.user_id);
        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO chat_memory (user_id, message, summary, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![record.user_id, record.message, record.summary, timestamp_now()],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent_memories(&self, limit: usize) -> Result<Vec<ChatMemoryRecord>, StoreError> {
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, message, summary, created_at FROM chat_memory
                 ORDER BY created_at DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?;

            let mut results = Vec::new();
            for row in rows {
                let (user_id, message, summary, created_at) = row?;
                results.push(ChatMemoryRecord {
                    user_id,
                    message,
                    summary,
                    created_at: parse_timestamp(created_at)?,
                });
            }
            Ok(results)
        })
        .await
    }

    async fn match_documents(
        &self,
        embedding: &[f32],
        threshold: f64,
        count: usize,
    ) -> Result<Vec<SimilarityMatch>, StoreError> {
        let query = embedding.to_vec();
        let matches = self
            .run_blocking(move |conn| {
                let mut stmt = conn.prepare("SELECT content, embedding FROM knowledge_base")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;

                let mut matches = Vec::new();
                for row in rows {
                    let (content, raw) = row?;
                    let stored: Vec<f32> = serde_json::from_str(&raw)?;
                    let similarity = cosine_similarity(&query, &stored);
                    if similarity > threshold {
                        matches.push(SimilarityMatch { content, similarity });
                    }
                }
                matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
                matches.truncate(count);
                Ok(matches)
            })
            .await?;

        debug!("Database: match_documents returned {} results", matches.len());
        Ok(matches)
    }

    async fn upsert_status(&self, status: &BotStatus) -> Result<(), StoreError> {
        let status = status.clone();
        self.run_blocking(move |conn| {
            let heartbeat = status
                .last_heartbeat
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true));
            conn.execute(
                "INSERT INTO bot_status (id, connected, last_heartbeat) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET connected = ?2, last_heartbeat = ?3",
                params![status.id, status.connected, heartbeat],
            )?;
            Ok(())
        })
        .await
    }

    async fn fetch_status(&self, id: i64) -> Result<Option<BotStatus>, StoreError> {
        self.run_blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, connected, last_heartbeat FROM bot_status WHERE id = ?1",
                    [id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, bool>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(id, connected, heartbeat)| {
                Ok(BotStatus {
                    id,
                    connected,
                    last_heartbeat: parse_timestamp(heartbeat)?,
                })
            })
            .transpose()
        })
        .await
    }
}
