use relationship_copilot::{
    error::OrchestrationError, telegram_bot::TelegramBot, Config, Copilot,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let bot_token = config.telegram_bot_token.clone().ok_or_else(|| {
        OrchestrationError::Config("TELEGRAM_BOT_TOKEN is not set".to_string())
    })?;

    info!("Relationship Copilot Telegram bot starting");

    let copilot = Copilot::from_config(&config).await?;
    Arc::clone(&copilot.conversation).spawn_session_sweeper();

    let bot = TelegramBot::new(bot_token, copilot.conversation)?;
    bot.run().await;

    Ok(())
}
