use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    accrual::{AccrualClient, AccrualSource, ReconcileSignal, Reconciler, ReconcilerHandle},
    api::handler::AppState,
    config::Config,
    error::AppResult,
    ledger::{LedgerStore, PgLedger},
    service::{BalanceService, OrderService},
};

/// Wire the ledger, services and the accrual reconciler. The reconciler is
/// already running when this returns.
pub async fn initialize_app_state(config: &Config) -> AppResult<(AppState, ReconcilerHandle)> {
    info!("Initializing application components ...");

    let pool = initialize_database(&config.database_uri, config.database_max_connections).await?;
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedger::new(pool));

    let client = AccrualClient::new(&config.accrual_system_address, config.accrual_timeout())?;
    info!("Accrual authority at {}", client.base_url());
    let source: Arc<dyn AccrualSource> = Arc::new(client);

    // One signal shared by order intake and the reconciler.
    let signal = Arc::new(ReconcileSignal::new());

    let state = AppState {
        orders: Arc::new(OrderService::new(store.clone(), signal.clone())),
        balance: Arc::new(BalanceService::new(store.clone())),
    };

    let reconcile = config.reconcile();
    info!(
        "Reconciler timing: poll {:?}, back-off {:?}..{:?}",
        reconcile.poll_interval, reconcile.base_delay, reconcile.max_delay
    );
    let reconciler = Reconciler::new(store, source, signal, reconcile).start();

    Ok((state, reconciler))
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("Database pool configured: {} max connections", max_connections);

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}
