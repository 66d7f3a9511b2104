//! Rolling conversational memory.
//!
//! Every completed turn is appended once as a transcript plus a one-line
//! summary. Prompts see only the last few turns, oldest first.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::store::{ChatMemoryRecord, NewMemory, Store};

pub const DEFAULT_RECENT_LIMIT: usize = 5;

#[derive(Clone)]
pub struct MemoryStore {
    store: Arc<dyn Store>,
}

impl MemoryStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn try_append(
        &self,
        user_id: &str,
        transcript: &str,
        summary: &str,
    ) -> Result<(), StoreError> {
        let record = NewMemory {
            user_id: user_id.to_string(),
            message: transcript.to_string(),
            summary: summary.to_string(),
        };
        self.store.insert_memory(&record).await?;
        debug!("Memory: stored turn for user {}", user_id);
        Ok(())
    }

    /// Losing a turn from memory is acceptable; the failure is only logged.
    pub async fn append(&self, user_id: &str, transcript: &str, summary: &str) {
        if let Err(e) = self.try_append(user_id, transcript, summary).await {
            error!("Error storing message: {}", e);
        }
    }

    /// The store hands back newest-first; prompts need chronological order.
    pub async fn try_recent(&self, limit: usize) -> Result<Vec<ChatMemoryRecord>, StoreError> {
        let mut records = self.store.recent_memories(limit).await?;
        records.truncate(limit);
        records.reverse();
        Ok(records)
    }

    pub async fn recent(&self, limit: usize) -> Vec<ChatMemoryRecord> {
        self.try_recent(limit).await.unwrap_or_else(|e| {
            warn!("Error fetching memory: {}", e);
            Vec::new()
        })
    }
}

/// Stored form of one turn.
pub fn transcript(user_message: &str, bot_reply: &str) -> String {
    format!("User: {}\nBot: {}", user_message, bot_reply)
}

pub fn history_block(records: &[ChatMemoryRecord]) -> String {
    records
        .iter()
        .map(|r| {
            format!(
                "Msg: {} (Summary: {})",
                r.message,
                r.summary.as_deref().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    async fn memory_with_turns(n: usize) -> MemoryStore {
        let store = SqliteStore::new(":memory:").unwrap();
        store.execute_init().unwrap();
        let memory = MemoryStore::new(Arc::new(store));
        for i in 1..=n {
            memory
                .try_append("u1", &transcript(&format!("q{}", i), &format!("a{}", i)), &format!("s{}", i))
                .await
                .unwrap();
        }
        memory
    }

    #[tokio::test]
    async fn test_recent_is_bounded_and_chronological() {
        let memory = memory_with_turns(8).await;

        let recent = memory.recent(DEFAULT_RECENT_LIMIT).await;
        assert_eq!(recent.len(), 5);
        let messages: Vec<_> = recent.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "User: q4\nBot: a4",
                "User: q5\nBot: a5",
                "User: q6\nBot: a6",
                "User: q7\nBot: a7",
                "User: q8\nBot: a8",
            ]
        );
        assert!(recent
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn test_recent_with_few_records() {
        let memory = memory_with_turns(2).await;
        let recent = memory.recent(5).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].summary.as_deref(), Some("s1"));
        assert_eq!(recent[1].summary.as_deref(), Some("s2"));

        let empty = memory_with_turns(0).await;
        assert!(empty.recent(5).await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failures_degrade() {
        let store = SqliteStore::new(":memory:").unwrap(); // no schema
        let memory = MemoryStore::new(Arc::new(store));

        assert!(memory.try_append("u1", "t", "s").await.is_err());
        memory.append("u1", "t", "s").await; // must not panic
        assert!(memory.try_recent(5).await.is_err());
        assert!(memory.recent(5).await.is_empty());
    }

    #[test]
    fn test_history_block_format() {
        let records = vec![
            ChatMemoryRecord {
                user_id: "u1".into(),
                message: "User: hi\nBot: hello".into(),
                summary: Some("Greeted user.".into()),
                created_at: None,
            },
            ChatMemoryRecord {
                user_id: "u2".into(),
                message: "User: bye\nBot: later".into(),
                summary: None,
                created_at: None,
            },
        ];
        assert_eq!(
            history_block(&records),
            "Msg: User: hi\nBot: hello (Summary: Greeted user.)\nMsg: User: bye\nBot: later (Summary: )"
        );
        assert_eq!(history_block(&[]), "");
    }
}
