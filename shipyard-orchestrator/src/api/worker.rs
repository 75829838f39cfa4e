//! Worker API Handlers

use axum::{Json, extract::State};
use shipyard_core::domain::worker::Worker;

use crate::api::AppState;

/// GET /api/workers
/// Snapshot of registered workers
pub async fn list_workers(State(state): State<AppState>) -> Json<Vec<Worker>> {
    tracing::debug!("Listing workers");
    Json(state.orchestrator.registry().workers())
}
