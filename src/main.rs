mod bot;
mod config;
mod llm;
mod memory;
mod platform;
mod registry;
mod router;
mod scheduler;
mod templates;
mod translator;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::llm::LlmClient;
use crate::memory::{BotStore, MemoryStore};
use crate::platform::telegram::TelegramClient;
use crate::platform::{BotIdentity, Transport};
use crate::registry::{BotRegistry, TransportFactory};
use crate::scheduler::Scheduler;
use crate::templates::Services;
use crate::translator::LibreTranslateClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,botsmith=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Bot API: {}", config.telegram.api_base_url);
    info!("  Database: {}", config.storage.database_path.display());
    info!("  Completion model: {}", config.completion.model);
    info!("  Configured bots: {}", config.bots.len());

    let store = MemoryStore::open(&config.storage.database_path)?;

    let services = Arc::new(Services {
        completion: Arc::new(LlmClient::new(config.completion.clone())?),
        translator: Arc::new(LibreTranslateClient::new(config.translator.clone())?),
        reminders: Arc::new(store.clone()),
        links: Arc::new(store.clone()),
        link_prefix: config.shortener.link_prefix.clone(),
    });

    let api_base_url = config.telegram.api_base_url.clone();
    let factory: TransportFactory = Arc::new(move |identity: &BotIdentity| {
        let client: Arc<dyn Transport> = Arc::new(TelegramClient::new(identity, &api_base_url));
        client
    });

    let registry = Arc::new(
        BotRegistry::new(factory, services, config.poll_settings())
            .with_store(Arc::new(store.clone())),
    );

    // Stored bots first, so seeds only add what is new
    let stored = store.load_all().await.context("Failed to load stored bots")?;
    registry.restore_all(stored).await;
    let seeded = registry.seed(&config.bots).await;
    if seeded > 0 {
        info!("Registered {} bot(s) from config", seeded);
    }

    let (count, _) = registry.stats().await;
    if count == 0 {
        warn!("No bots registered; add [[bots]] entries to the config");
    }

    let scheduler = Scheduler::start(registry.clone(), &config.heartbeat).await?;

    info!("Bot runtime is running with {} bot(s). Press Ctrl-C to stop.", count);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down...");
    registry.shutdown_all().await;
    if let Err(e) = scheduler.shutdown().await {
        warn!("{:#}", e);
    }

    Ok(())
}
