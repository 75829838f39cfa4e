//! Worker-related API endpoints

use shipyard_core::domain::worker::Worker;

use crate::error::Result;
use crate::{CoordinatorClient, handle_response};

impl CoordinatorClient {
    /// List all connected workers
    pub async fn list_workers(&self) -> Result<Vec<Worker>> {
        let url = format!("{}/api/workers", self.base_url);
        let response = self.client.get(&url).send().await?;

        handle_response(response).await
    }
}
