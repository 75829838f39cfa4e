//! Pipeline API Handlers
//!
//! HTTP endpoints for starting and inspecting pipelines.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use shipyard_core::domain::pipeline::Pipeline;
use shipyard_core::dto::pipeline::{PipelineStarted, ProjectActivity, StartPipeline};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /api/pipelines
/// Start a pipeline; it runs in the background
pub async fn start_pipeline(
    State(state): State<AppState>,
    Json(req): Json<StartPipeline>,
) -> ApiResult<(StatusCode, Json<PipelineStarted>)> {
    tracing::info!(
        "Starting pipeline for {}",
        req.project_name
            .clone()
            .or_else(|| req.project_id.map(|id| id.to_string()))
            .unwrap_or_default()
    );

    let started = state.orchestrator.start(req)?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

/// GET /api/pipelines
/// List live pipelines
pub async fn list_pipelines(State(state): State<AppState>) -> Json<Vec<Pipeline>> {
    tracing::debug!("Listing live pipelines");
    Json(state.orchestrator.pipelines().list_live())
}

/// GET /api/pipelines/{id}
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::debug!("Getting pipeline: {}", id);

    state
        .orchestrator
        .pipelines()
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Pipeline {} not found", id)))
}

/// GET /api/projects/{id}/active
pub async fn project_activity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ProjectActivity>> {
    if state.orchestrator.catalog().get(id).is_none() {
        return Err(ApiError::NotFound(format!("Project {} not found", id)));
    }

    let pipeline_id = state.orchestrator.pipelines().active_for(id);
    Ok(Json(ProjectActivity {
        project_id: id,
        active: pipeline_id.is_some(),
        pipeline_id,
    }))
}
