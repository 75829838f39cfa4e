//! Pipeline DTOs for the coordinator HTTP API

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to start a pipeline for a configured project.
///
/// Either `project_id` or `project_name` identifies the project. When
/// `targets` is omitted every configured target is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartPipeline {
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub targets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStarted {
    pub pipeline_id: Uuid,
    pub project_id: Uuid,
}

/// Answer to "is this project active"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectActivity {
    pub project_id: Uuid,
    pub active: bool,
    pub pipeline_id: Option<Uuid>,
}
