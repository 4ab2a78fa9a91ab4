mod accrual;
mod api;
mod bootstrap;
mod config;
mod error;
mod ledger;
mod server;
mod service;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::AppError;

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,loyalty=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn wait_for_ctrl_c(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown requested");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting loyalty accrual service");

    let config = Config::from_env().map_err(AppError::from)?;

    let (state, reconciler) = bootstrap::initialize_app_state(&config).await?;

    let app = server::create_app(state).await;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_ctrl_c(shutdown.clone()));

    let served = server::run_server(app, &config.run_address, shutdown).await;

    // Let an in-flight reconciliation pass finish before exiting.
    reconciler.stop().await;

    info!("Loyalty accrual service stopped");
    served
}
