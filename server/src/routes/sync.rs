//! Sync trigger route.

use axum::{extract::State, routing::post, Json, Router};
use newshelf_engine::CycleOutcome;

use crate::auth::TriggerAuth;
use crate::error::Result;
use crate::handlers::trigger_cycle;
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/sync", post(sync_handler))
}

/// POST /sync - Run one cycle and return its outcome.
async fn sync_handler(
    State(state): State<AppState>,
    _auth: TriggerAuth,
) -> Result<Json<CycleOutcome>> {
    let outcome = trigger_cycle(&state).await?;
    Ok(Json(outcome))
}
