//! API Module
//!
//! HTTP API layer for the coordinator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod pipeline;
pub mod remote;
pub mod worker;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::pipeline::Orchestrator;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Create the main API router with all endpoints
pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route(
            "/api/pipelines",
            post(pipeline::start_pipeline).get(pipeline::list_pipelines),
        )
        .route("/api/pipelines/{id}", get(pipeline::get_pipeline))
        .route("/api/projects/{id}/active", get(pipeline::project_activity))
        // Worker endpoints
        .route("/api/workers", get(worker::list_workers))
        // Remote build callbacks
        .route("/api/remote-builds/callback", post(remote::build_callback))
        // Add state and middleware
        .with_state(AppState { orchestrator })
        .layer(TraceLayer::new_for_http())
}
