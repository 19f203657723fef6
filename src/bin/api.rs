use relationship_copilot::{api::start_server, Config, Copilot};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    info!("Relationship Copilot API starting");
    info!(model = %config.gemini_model, port = config.api_port, "Configuration loaded");

    let copilot = Copilot::from_config(&config).await?;
    std::sync::Arc::clone(&copilot.conversation).spawn_session_sweeper();

    start_server(copilot, config.api_port).await
}
