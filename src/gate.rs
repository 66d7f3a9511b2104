use std::sync::Arc;
use tracing::warn;

use crate::store::{BotConfig, Store};

/// Placeholder written by setup tooling before a channel is chosen. It means
/// "no restriction yet", not a channel id.
pub const UNSET_CHANNEL_SENTINEL: &str = "UNKNOWN_PLEASE_UPDATE";

pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str = "You are a helpful assistant.";

impl BotConfig {
    /// Channel ids are compared as strings, verbatim; snowflakes overflow the
    /// integer range of some clients that write this row.
    pub fn allows_channel(&self, channel_id: &str) -> bool {
        match self.allowed_channel_id.as_deref() {
            None | Some("") | Some(UNSET_CHANNEL_SENTINEL) => true,
            Some(allowed) => allowed == channel_id,
        }
    }

    pub fn is_channel_restricted(&self) -> bool {
        !matches!(
            self.allowed_channel_id.as_deref(),
            None | Some("") | Some(UNSET_CHANNEL_SENTINEL)
        )
    }

    pub fn instructions(&self) -> &str {
        self.system_instructions
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SYSTEM_INSTRUCTIONS)
    }
}

/// Fetches the live configuration for every message; nothing is cached so
/// edits take effect on the next message.
#[derive(Clone)]
pub struct ConfigGate {
    store: Arc<dyn Store>,
}

impl ConfigGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// `None` when the row is missing or the store is unreachable.
    pub async fn fetch_config(&self) -> Option<BotConfig> {
        match self.store.fetch_config().await {
            Ok(Some(config)) => Some(config),
            Ok(None) => {
                warn!("Bot configuration missing.");
                None
            }
            Err(e) => {
                warn!("Error fetching config: {}", e);
                None
            }
        }
    }
}
