//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, FsBlobStore},
    background::evaluator_loop,
    config::Config,
    error::ApiError,
    web::{router, AppState, Stores},
};
use checkin_core::ports::{Clock, SystemClock};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let db_adapter = Arc::new(DbAdapter::new(db_pool, clock.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Proof Storage ---
    tokio::fs::create_dir_all(&config.blob_root).await?;
    let files = Arc::new(FsBlobStore::new(
        config.blob_root.clone(),
        config.blob_signing_key.clone(),
        config.public_base_url.clone(),
        clock.clone(),
    ));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(
        Stores::postgres(db_adapter, files),
        clock,
        config.clone(),
    ));

    // --- 5. Start the Deadline Evaluator ---
    let cancel = CancellationToken::new();
    let evaluator_task = if config.evaluator_enabled {
        Some(tokio::spawn(evaluator_loop(
            app_state.evaluator.clone(),
            config.evaluator_interval,
            cancel.clone(),
        )))
    } else {
        info!("Deadline evaluator disabled; relying on /internal/evaluate");
        None
    };

    // --- 6. Create the Web Router ---
    let app = router(app_state)?;

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Some(task) = evaluator_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Deadline evaluator task failed");
        }
    }

    Ok(())
}
