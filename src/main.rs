use std::sync::Arc;

use edgeplane::{
    observability::{init_tracing, log_startup_info},
    xds::{start_xds_server, SnapshotAssembler, SnapshotCache},
    Result, Settings,
};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (optional - won't fail if missing)
    // This must happen before any config is read from environment
    if let Err(e) = dotenvy::dotenv() {
        // Only warn if the error is NOT "file not found"
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let settings = Settings::from_env()?;
    init_tracing(&settings.log)?;
    log_startup_info(&settings);

    // A spec that fails to assemble must stop the process here, before any
    // proxy can connect and be handed an empty snapshot
    let spec = settings.load_gateway()?;
    let cache = Arc::new(SnapshotCache::new());
    let assembler = SnapshotAssembler::new(spec, Arc::clone(&cache));
    let receipt = assembler.assemble_and_publish(&settings.xds.node_id)?;

    info!(
        node_id = %receipt.node_id,
        version = receipt.version,
        "Initial snapshot published"
    );

    start_xds_server(&settings.xds, cache, async {
        signal::ctrl_c().await.expect("Failed to install CTRL+C signal handler");
        info!("Shutdown signal received for xDS server");
    })
    .await?;

    info!("Control plane shutdown completed");
    Ok(())
}
