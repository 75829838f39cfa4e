//! Remote build callback endpoint

use axum::{Json, extract::State, http::StatusCode};
use shipyard_core::dto::remote::RemoteBuildCallback;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /api/remote-builds/callback
/// Result of an offloaded build; unknown build ids get 404
pub async fn build_callback(
    State(state): State<AppState>,
    Json(callback): Json<RemoteBuildCallback>,
) -> ApiResult<StatusCode> {
    tracing::info!("Callback for remote build {}", callback.build_id);

    let build_id = callback.build_id.clone();
    if state.orchestrator.broker().on_callback(callback).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("No pending build {}", build_id)))
    }
}
