//! Pipeline-related API endpoints

use shipyard_core::domain::pipeline::Pipeline;
use shipyard_core::dto::pipeline::{PipelineStarted, ProjectActivity, StartPipeline};
use uuid::Uuid;

use crate::error::Result;
use crate::{CoordinatorClient, handle_response};

impl CoordinatorClient {
    /// Start a pipeline for a configured project
    ///
    /// Fails with a 409 API error when the project already has a live pipeline.
    pub async fn start_pipeline(&self, req: &StartPipeline) -> Result<PipelineStarted> {
        let url = format!("{}/api/pipelines", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        handle_response(response).await
    }

    /// Get a live or recently finished pipeline
    pub async fn get_pipeline(&self, id: Uuid) -> Result<Pipeline> {
        let url = format!("{}/api/pipelines/{}", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// List live pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let url = format!("{}/api/pipelines", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }

    /// Ask whether a project currently has a live pipeline
    pub async fn project_activity(&self, project_id: Uuid) -> Result<ProjectActivity> {
        let url = format!("{}/api/projects/{}/active", self.base_url, project_id);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }
}
