// Reelhouse Wallet Backend
// Dual-currency balance ledger with batched persistence and fraud screening

mod alerts;
mod api;
mod balance;
mod config;
mod database;
mod error;
mod fraud;
mod ledger;
mod models;
mod spin;
#[cfg(test)]
mod testutil;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use alerts::{AlertDispatcher, LogSink, NotificationSink, StaticDirectory, UserDirectory, WebhookSink};
use balance::BalanceStore;
use config::Config;
use database::{Database, DbPool, DurableStore, PgStore};
use fraud::FraudDetector;
use ledger::Ledger;
use spin::SpinProcessor;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub store: Arc<dyn DurableStore>,
    pub balances: Arc<BalanceStore>,
    pub ledger: Arc<Ledger>,
    pub spins: Arc<SpinProcessor>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reelhouse_backend=info".parse().unwrap())
                .add_directive("sqlx=warn".parse().unwrap()),
        )
        .init();

    info!("Starting Reelhouse wallet backend");

    let config = Config::from_env();
    info!("Configuration:");
    info!("  Database: {}", config.database_url);
    info!("  Server port: {}", config.port);
    info!("  Flush interval: {:?}", config.flush_interval);
    info!("  Ledger batch size: {}", config.batch_size);
    info!("  Active admins: {}", config.admin_ids.len());

    // Initialize database
    let db = Database::init(&config.database_url).await?;
    let store: Arc<dyn DurableStore> = Arc::new(PgStore::new(db.clone()));

    // Build the service graph
    let ledger = Arc::new(Ledger::new(Arc::clone(&store), &config).await?);
    let balances = Arc::new(BalanceStore::new(
        Arc::clone(&store),
        config.lock_timeout,
        config.signup_bonus_gc,
    ));
    let fraud = Arc::new(FraudDetector::new(config.fraud.clone()));

    let sink: Arc<dyn NotificationSink> = match &config.alert_webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone())),
        None => Arc::new(LogSink),
    };
    let directory: Arc<dyn UserDirectory> =
        Arc::new(StaticDirectory::new(config.admin_ids.clone()));
    let dispatcher = Arc::new(AlertDispatcher::new(Arc::clone(&store), directory, sink));

    let spins = Arc::new(SpinProcessor::new(
        Arc::clone(&balances),
        Arc::clone(&ledger),
        fraud,
        dispatcher,
        config.replay_window,
    ));

    // Start the ledger flush loop in background
    tokio::spawn(Arc::clone(&ledger).run());

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = Arc::new(AppState {
        db: db.clone(),
        store,
        balances,
        ledger,
        spins,
    });

    // Build router
    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/settle", post(api::settle))
        .route("/api/balance/:user_id", get(api::get_balance))
        .route("/api/transactions", post(api::transaction_history))
        .route("/api/admin/adjust", post(api::admin_adjust))
        .route("/api/admin/alerts", post(api::list_alerts))
        .with_state(state)
        .layer(cors);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Reelhouse backend listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
