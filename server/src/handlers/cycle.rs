//! Cycle handler - runs one sync cycle and reports its outcome.

use crate::error::{AppError, Result};
use crate::AppState;
use newshelf_engine::{CycleOutcome, CycleStatus, SyncRunner};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Run a cycle unless one is already in progress.
///
/// Cycles never overlap: a trigger arriving while another cycle holds the
/// lock is rejected with [`AppError::Busy`] instead of queued.
pub async fn trigger_cycle(state: &AppState) -> Result<CycleOutcome> {
    let _guard = state.cycle_lock.try_lock().map_err(|_| AppError::Busy)?;
    Ok(run_logged(&state.runner, &state.shutdown).await)
}

/// Run a cycle inside its own span and log the outcome.
pub async fn run_logged(runner: &SyncRunner, cancel: &CancellationToken) -> CycleOutcome {
    let span = tracing::info_span!(
        "cycle",
        id = %Uuid::new_v4(),
        collection = %runner.collection_id()
    );

    async move {
        tracing::info!(
            window_days = runner.window().num_days(),
            "Starting sync cycle"
        );
        let outcome = runner.run_cycle_with_cancel(cancel).await;
        log_outcome(&outcome);
        outcome
    }
    .instrument(span)
    .await
}

fn log_outcome(outcome: &CycleOutcome) {
    let elapsed_ms = (outcome.finished_at - outcome.started_at).num_milliseconds();

    match outcome.status {
        CycleStatus::Success => tracing::info!(
            in_window = outcome.products_in_window,
            added = outcome.added(),
            removed = outcome.removed(),
            elapsed_ms,
            "Sync cycle succeeded"
        ),
        CycleStatus::Partial => {
            if let Some(apply) = &outcome.apply {
                for item in apply.added_failed.iter().chain(&apply.removed_failed) {
                    tracing::warn!(
                        product = %item.product_id,
                        error = %item.error,
                        "Item not synced"
                    );
                }
            }
            tracing::warn!(
                added = outcome.added(),
                removed = outcome.removed(),
                failed = outcome.failed(),
                elapsed_ms,
                "Sync cycle partially applied"
            );
        }
        CycleStatus::Failed => tracing::error!(
            error = outcome.error.as_deref().unwrap_or("unknown"),
            added = outcome.added(),
            removed = outcome.removed(),
            elapsed_ms,
            "Sync cycle failed"
        ),
    }
}
