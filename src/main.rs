use lorekeeper::config::Config;
use lorekeeper::liveness::{ConnectionSignal, LivenessReporter};
use lorekeeper::llm::{self, GenerationClient};
use lorekeeper::pipeline::Pipeline;
use lorekeeper::store::{self, Store};
use lorekeeper::{commands, discord, Data};
use poise::serenity_prelude as serenity;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration: {:?}", config);

    let store = store::connect(&config)?;

    // From here on every exit path records the bot as offline
    let signal = ConnectionSignal::new();
    let reporter = LivenessReporter::new(
        store.clone(),
        config.bot_status_id,
        config.heartbeat_interval,
    );

    reporter
        .supervise(&signal, run_bot(config, store, signal.clone()))
        .await
}

async fn run_bot(
    config: Config,
    store: Arc<dyn Store>,
    signal: ConnectionSignal,
) -> anyhow::Result<()> {
    let (generator, embedder) = llm::backends(&config)?;
    let pipeline = Pipeline::new(store.clone(), embedder, GenerationClient::new(generator))
        .with_memory_limit(config.memory_limit);

    let discord_token = config.discord_token.clone();
    let owners: HashSet<serenity::UserId> = config
        .owner_id
        .map(serenity::UserId::new)
        .into_iter()
        .collect();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            owners,
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    if let serenity::FullEvent::Message { new_message } = event {
                        discord::handle_message(ctx, new_message, data).await;
                    }
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Logged in as {}", ready.user.name);
                let registration = async {
                    if config.register_commands {
                        poise::builtins::register_globally(ctx, &framework.options().commands)
                            .await?;
                    }
                    Ok::<(), serenity::Error>(())
                };
                discord::on_ready(&signal, registration).await;

                Ok(Data {
                    config,
                    store,
                    pipeline: Arc::new(pipeline),
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MESSAGES;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down...");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting bot...");
    client
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Client error: {}", e))
}
