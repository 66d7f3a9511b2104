use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which text-generation / embedding backend to talk to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" | "llama" => Ok(Self::OpenAi),
            other => Err(anyhow::anyhow!("Unknown LLM_PROVIDER: {}", other)),
        }
    }
}

/// Where bot config, chat memory, the knowledge base and liveness live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Supabase,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supabase" | "postgrest" => Ok(Self::Supabase),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(anyhow::anyhow!("Unknown STORE_BACKEND: {}", other)),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub owner_id: Option<u64>,
    pub register_commands: bool,

    pub llm_provider: LlmProvider,
    pub gemini_api_key: Option<String>,
    pub gemini_api_url: String,
    pub gemini_model: String,
    pub gemini_embedding_model: String,
    pub llama_url: String,
    pub llama_model: String,
    pub llama_api_key: Option<String>,
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    /// Prepended to retrieval queries on OpenAI-compatible embedding servers
    /// that expect an instruction prefix (e.g. `search_query: `).
    pub embedding_query_prefix: Option<String>,
    pub llm_timeout_secs: u64,

    pub store_backend: StoreBackend,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub database_url: String,

    pub heartbeat_interval: Duration,
    pub bot_status_id: i64,
    pub memory_limit: usize,
}

const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let llm_provider: LlmProvider = env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "gemini".to_string())
            .parse()?;
        let store_backend: StoreBackend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "supabase".to_string())
            .parse()?;

        let gemini_api_key = non_empty_var("GEMINI_API_KEY");
        if llm_provider == LlmProvider::Gemini && gemini_api_key.is_none() {
            anyhow::bail!("GEMINI_API_KEY must be set when LLM_PROVIDER=gemini");
        }

        let supabase_url = non_empty_var("SUPABASE_URL");
        let supabase_key = non_empty_var("SUPABASE_KEY");
        if store_backend == StoreBackend::Supabase
            && (supabase_url.is_none() || supabase_key.is_none())
        {
            anyhow::bail!("SUPABASE_URL and SUPABASE_KEY must be set when STORE_BACKEND=supabase");
        }

        let heartbeat_interval = match env::var("HEARTBEAT_INTERVAL") {
            Ok(raw) => humantime::parse_duration(&raw)
                .map_err(|e| anyhow::anyhow!("HEARTBEAT_INTERVAL is not a valid duration: {}", e))?,
            Err(_) => Duration::from_secs(10),
        };

        Ok(Config {
            discord_token: non_empty_var("DISCORD_TOKEN")
                .ok_or_else(|| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            owner_id: env::var("OWNER_ID").ok().and_then(|id| id.parse().ok()),
            register_commands: env::var("REGISTER_COMMANDS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),

            llm_provider,
            gemini_api_key,
            gemini_api_url: env::var("GEMINI_API_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_API_URL.to_string()),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            gemini_embedding_model: env::var("GEMINI_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-004".to_string()),
            llama_url: env::var("LLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            llama_model: env::var("LLAMA_MODEL").unwrap_or_else(|_| "local-model".to_string()),
            llama_api_key: non_empty_var("LLAMA_API_KEY"),
            embedding_url: env::var("EMBEDDING_URL").unwrap_or_else(|_| {
                env::var("LLAMA_URL").unwrap_or_else(|_| "http://localhost:8080/v1".to_string())
            }),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "local-model".to_string()),
            embedding_api_key: non_empty_var("EMBEDDING_API_KEY"),
            embedding_query_prefix: non_empty_var("EMBEDDING_QUERY_PREFIX"),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),

            store_backend,
            supabase_url,
            supabase_key,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/lorekeeper.db".to_string()),

            heartbeat_interval,
            bot_status_id: env::var("BOT_STATUS_ID")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),
            memory_limit: env::var("MEMORY_LIMIT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
        })
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("owner_id", &self.owner_id)
            .field("register_commands", &self.register_commands)
            .field("llm_provider", &self.llm_provider)
            .field(
                "gemini_api_key",
                &self.gemini_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("gemini_api_url", &self.gemini_api_url)
            .field("gemini_model", &self.gemini_model)
            .field("gemini_embedding_model", &self.gemini_embedding_model)
            .field("llama_url", &self.llama_url)
            .field("llama_model", &self.llama_model)
            .field(
                "llama_api_key",
                &self.llama_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("embedding_url", &self.embedding_url)
            .field("embedding_model", &self.embedding_model)
            .field(
                "embedding_api_key",
                &self.embedding_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("embedding_query_prefix", &self.embedding_query_prefix)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("store_backend", &self.store_backend)
            .field("supabase_url", &self.supabase_url)
            .field(
                "supabase_key",
                &self.supabase_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("database_url", &self.database_url)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("bot_status_id", &self.bot_status_id)
            .field("memory_limit", &self.memory_limit)
            .finish()
    }
}

/// Discord message limit is 2000 characters
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;
