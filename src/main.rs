mod bot;
mod config;
mod llm;
mod platform;
mod prompts;
mod twitter;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,socialbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Provider: {} ({})", config.llm.provider, config.llm.model);
    info!("  Telegram enabled: {}", config.telegram.enabled);
    info!("  Twitter enabled: {}", config.twitter.enabled);
    if config.twitter.enabled {
        info!("  Monitoring: {:?}", config.twitter.accounts_to_monitor);
        info!("  Polling interval: {}s", config.twitter.polling_interval);
    }

    bot::run(config).await
}
