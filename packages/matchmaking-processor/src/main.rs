use matchmaking_processor::processor::MatchmakingProcessor;
use shared::config::{MatchmakingConfig, StorageBackend};
use shared::repositories::Repositories;
use shared::telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = MatchmakingConfig::from_env()?;
    if config.storage == StorageBackend::Memory {
        warn!("Standalone processor on in-memory stores only sees its own queue");
    }

    let repositories = Repositories::connect(&config).await;
    let processor = MatchmakingProcessor::from_config(&config, &repositories);

    tokio::select! {
        _ = processor.run() => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down matchmaking processor"),
    }

    Ok(())
}
