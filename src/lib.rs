pub mod commands;
pub mod config;
pub mod discord;
pub mod error;
pub mod gate;
pub mod liveness;
pub mod llm;
pub mod memory;
pub mod pipeline;
pub mod rag;
pub mod store;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub store: std::sync::Arc<dyn store::Store>,
    pub pipeline: std::sync::Arc<pipeline::Pipeline>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
