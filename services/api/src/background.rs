//! services/api/src/background.rs
//!
//! Periodic deadline evaluation.
//!
//! Spawns alongside the HTTP server and runs an evaluator pass on a fixed
//! interval using `tokio::time::interval`. Every pass is idempotent, so a
//! restart or an overlapping manual `/internal/evaluate` call is harmless.

use std::sync::Arc;
use std::time::Duration;

use checkin_core::DeadlineEvaluator;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run the evaluator loop until `cancel` is triggered.
pub async fn evaluator_loop(
    evaluator: Arc<DeadlineEvaluator>,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = every.as_secs(), "Deadline evaluator started");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Deadline evaluator stopping");
                break;
            }
            _ = interval.tick() => {
                match evaluator.run_pass().await {
                    Ok(summary) => {
                        if summary.errors > 0 {
                            tracing::warn!(
                                errors = summary.errors,
                                fails_created = summary.total_fails_created,
                                "Deadline evaluation finished with errors"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Deadline evaluation pass aborted");
                    }
                }
            }
        }
    }
}
