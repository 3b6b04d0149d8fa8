//! services/api/src/bin/evaluate.rs
//!
//! Runs exactly one deadline evaluation pass against the configured database and
//! prints the summary as JSON. Meant to be invoked from cron.

use api_lib::{
    adapters::{DbAdapter, FsBlobStore},
    config::Config,
    error::ApiError,
    web::internal::PassSummaryResponse,
};
use checkin_core::ports::{Clock, SystemClock};
use checkin_core::DeadlineEvaluator;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let db_pool = PgPoolOptions::new()
        .max_connections(
            u32::try_from(config.evaluator_concurrency.max(1))
                .unwrap_or(u32::MAX)
                .saturating_add(1),
        )
        .connect(&config.database_url)
        .await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let db = Arc::new(DbAdapter::new(db_pool, clock.clone()));
    db.run_migrations().await?;

    let blobs = Arc::new(FsBlobStore::new(
        config.blob_root.clone(),
        config.blob_signing_key.clone(),
        config.public_base_url.clone(),
        clock.clone(),
    ));

    let evaluator = DeadlineEvaluator::new(db.clone(), db.clone(), db, blobs, clock)
        .with_concurrency(config.evaluator_concurrency);
    let summary = evaluator.run_pass().await?;
    info!(
        fails_created = summary.total_fails_created,
        errors = summary.errors,
        "Evaluation finished"
    );

    let json = serde_json::to_string_pretty(&PassSummaryResponse::from(&summary))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    println!("{}", json);

    if summary.errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
