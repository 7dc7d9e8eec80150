use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::run::Progress;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub run_id: Uuid,
    pub cancelled: bool,
}

/// GET /api/v1/runs/:run_id
pub async fn handle_run_progress(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Progress>, AppError> {
    state
        .runs
        .progress(run_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))
}

/// POST /api/v1/runs/:run_id/cancel
///
/// Work already handed to the backend finishes; its results are discarded.
pub async fn handle_cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    if !state.runs.cancel(run_id) {
        return Err(AppError::NotFound(format!("No active run {run_id}")));
    }
    tracing::info!(run_id = %run_id, "Run cancelled");
    Ok(Json(CancelResponse {
        run_id,
        cancelled: true,
    }))
}
