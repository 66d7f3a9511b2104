//! One request/response cycle per inbound message:
//! gate → retrieve context and memory → prompt → generate → reply →
//! summarize → store.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::TransportError;
use crate::gate::ConfigGate;
use crate::llm::{Embedder, GenerationClient};
use crate::memory::{self, MemoryStore, DEFAULT_RECENT_LIMIT};
use crate::rag::{self, ContextRetriever};
use crate::store::{BotConfig, Store};

pub const FALLBACK_REPLY: &str =
    "I'm having trouble connecting to my brain right now. Please try again.";
pub const ERROR_REPLY: &str = "I encountered an error processing your request.";
pub const SUMMARY_PLACEHOLDER: &str = "Interaction stored.";

/// Held while the bot is working on a reply; dropping it stops the indicator.
pub type TypingGuard = Box<dyn Send>;

/// The chat channel a message arrived on.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), TransportError>;
    fn start_typing(&self) -> TypingGuard;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    pub author_id: String,
    pub channel_id: String,
    pub content: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    ConfigMissing,
    ChannelNotAllowed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing was sent or stored.
    Skipped(SkipReason),
    /// Reply sent and the turn appended to memory.
    Stored,
    /// Generation was unavailable; the fallback apology was sent.
    FellBack,
    /// The reply could not be delivered; the generic error reply was attempted.
    Failed,
}

pub fn build_prompt(instructions: &str, context: &str, history: &str, message: &str) -> String {
    format!(
        "System Instructions: {instructions}\n\n\
         Context from Knowledge Base:\n{context}\n\n\
         Recent Chat History:\n{history}\n\n\
         User's New Message: {message}\n\n\
         Provide a helpful response."
    )
}

pub fn summary_prompt(message: &str, reply: &str) -> String {
    format!(
        "Summarize this interaction in one sentence for future context.\n\
         User: {message}\n\
         Bot: {reply}"
    )
}

pub struct Pipeline {
    gate: ConfigGate,
    retriever: ContextRetriever,
    memory: MemoryStore,
    generator: GenerationClient,
    memory_limit: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        generator: GenerationClient,
    ) -> Self {
        Self {
            gate: ConfigGate::new(store.clone()),
            retriever: ContextRetriever::new(embedder, store.clone()),
            memory: MemoryStore::new(store),
            generator,
            memory_limit: DEFAULT_RECENT_LIMIT,
        }
    }

    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Runs one turn. Never returns an error: every failure is either
    /// degraded or turned into one of the fixed replies.
    pub async fn handle(&self, message: &IncomingMessage, transport: &dyn Transport) -> TurnOutcome {
        let Some(config) = self.gate.fetch_config().await else {
            return TurnOutcome::Skipped(SkipReason::ConfigMissing);
        };

        if !config.allows_channel(&message.channel_id) {
            debug!("Ignoring message from unauthorized channel {}", message.channel_id);
            return TurnOutcome::Skipped(SkipReason::ChannelNotAllowed);
        }

        info!(
            author = %message.author_id,
            channel = %message.channel_id,
            "Processing message: {}",
            message.content
        );

        match self.run_turn(&config, message, transport).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Error processing message: {}", e);
                if let Err(e) = transport.send(ERROR_REPLY).await {
                    error!("Failed to send error reply: {}", e);
                }
                TurnOutcome::Failed
            }
        }
    }

    async fn run_turn(
        &self,
        config: &BotConfig,
        message: &IncomingMessage,
        transport: &dyn Transport,
    ) -> Result<TurnOutcome, TransportError> {
        let _typing = transport.start_typing();

        let (matches, history) = tokio::join!(
            self.retriever.retrieve(&message.content),
            self.memory.recent(self.memory_limit),
        );

        let prompt = build_prompt(
            config.instructions(),
            &rag::context_block(&matches),
            &memory::history_block(&history),
            &message.content,
        );

        let Some(reply) = self.generator.generate(&prompt).await else {
            transport.send(FALLBACK_REPLY).await?;
            return Ok(TurnOutcome::FellBack);
        };

        transport.send(&reply).await?;

        let summary = self
            .generator
            .generate(&summary_prompt(&message.content, &reply))
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| SUMMARY_PLACEHOLDER.to_string());

        self.memory
            .append(
                &message.author_id,
                &memory::transcript(&message.content, &reply),
                &summary,
            )
            .await;

        Ok(TurnOutcome::Stored)
    }
}
