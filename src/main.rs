use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use pharmproof::{telemetry, App, BaseConfig};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    info!("Starting pharmproof");

    let config = BaseConfig::parse();
    info!(
        "Configuration: bind_addr={}, storage_path={}, max_attempts={}, poll_interval_secs={}, ledger={:?}",
        config.bind_addr,
        config.storage_path,
        config.max_attempts,
        config.poll_interval_secs,
        config.ledger
    );

    let app = App::initialize(&config)?;
    app.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
        }
    })
    .await?;

    info!("pharmproof shutdown complete");
    Ok(())
}
