use relationship_copilot::{orchestrator::DEFAULT_LANGUAGE, Config, Copilot};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CLIENT: &str = "ATB-SME-001";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let client_id = args.next().unwrap_or_else(|| DEFAULT_CLIENT.to_string());
    let language = args.next().unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

    let config = Config::from_env()?;
    let copilot = Copilot::from_config(&config).await?;

    info!(client_id = %client_id, language = %language, "Building prep pack");

    match copilot
        .orchestrator
        .build_prep_pack(&client_id, &language)
        .await
    {
        Ok(output) => {
            println!("\n=== PREP PACK ===");
            println!("Report: {}", output.report_location);
            println!(
                "Risk flags: {}",
                output.prep_pack.risk_assessment.risk_flags.len()
            );
            println!("\n{}", output.report_markdown);
            Ok(())
        }
        Err(e) => {
            eprintln!("Prep pack failed [{}]: {}", e.kind(), e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
