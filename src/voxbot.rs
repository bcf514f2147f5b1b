use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use voxbot::alert::{AlertLayer, forward_alerts};
use voxbot::bot::Bot;
use voxbot::{ConfigManager, LOG_ENV, VERSION};
use voxbot_chat::{Messenger, TelegramClient};
use voxbot_core::{ENV_TELEGRAM_TOKEN, ResilientExecutor, TcpProbe};
use voxbot_transcribe::{AsrSettings, ProviderRegistry, Transcriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Load config
    let config_manager = ConfigManager::new()?;
    let mut config = config_manager.load()?;
    // save back the config to create the file if it doesn't exist
    config_manager.save(&config)?;
    // secrets from the environment are never written back
    config.apply_env();

    // Initialize the logger
    let (alert_layer, alerts) = AlertLayer::new();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .finish()
        .with(alert_layer)
        .init();

    info!(version = VERSION, config = ?config_manager.config_path(), "Starting voxbot");
    debug!("Effective configuration:\n{}", config.to_redacted_string());

    let token = config.telegram_token().with_context(|| {
        format!(
            "Telegram bot token is not set. Add it to {:?} or set {}",
            config_manager.config_path(),
            ENV_TELEGRAM_TOKEN
        )
    })?;
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramClient::new(token)?);
    tokio::spawn(forward_alerts(
        alerts,
        messenger.clone(),
        config.debug_chat_id,
    ));

    // Set up the speech recognition backend
    let registry = ProviderRegistry::with_defaults();
    let transcriber: Arc<dyn Transcriber> =
        Arc::from(registry.create(&config.asr_provider, &AsrSettings::from_config(&config))?);
    transcriber
        .load_model()
        .await
        .with_context(|| format!("Failed to load {} backend", transcriber.name()))?;
    let info = transcriber.model_info();
    info!(provider = %info.provider, model = %info.model, "Speech recognition ready");

    let executor = ResilientExecutor::new(config.retry_policy(), Arc::new(TcpProbe::default()))
        .with_poll_interval(config.connectivity_poll());
    let bot = Bot::new(&config, messenger, transcriber, executor)?;

    tokio::select! {
        result = bot.run() => result,
        _ = signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
