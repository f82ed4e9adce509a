//! Job worker binary.

use anyhow::Context;
use tracing::{error, info};

use mflow_worker::logging::init_tracing;
use mflow_worker::metrics::install_exporter;
use mflow_worker::{AppContext, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting mflow-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        install_exporter(addr).context("failed to install Prometheus exporter")?;
        info!("Prometheus metrics listening on {}", addr);
    }

    let app = AppContext::new(config).context("failed to build worker context")?;
    app.register_builtin_handlers()
        .context("failed to register job handlers")?;

    if let Err(e) = app.start().await {
        error!("Failed to start worker: {}", e);
        app.shutdown().await;
        return Err(e.into());
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    app.shutdown().await;
    info!("Worker shutdown complete");
    Ok(())
}
