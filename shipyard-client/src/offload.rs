//! Remote build protocol client

use reqwest::Client;
use shipyard_core::dto::remote::{RemoteBuildAccepted, RemoteBuildCallback, RemoteBuildRequest};
use std::time::Duration;

use crate::error::Result;
use crate::{handle_empty_response, handle_response};

/// Client for an offload build server and for the callback leg back to the
/// coordinator
#[derive(Debug, Clone)]
pub struct OffloadClient {
    client: Client,
}

impl OffloadClient {
    /// Create a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Ask the offload server at `url` to start a build.
    ///
    /// Returns as soon as the server has accepted the request; the build
    /// itself finishes later and reports through the callback.
    pub async fn submit_build(
        &self,
        url: &str,
        request: &RemoteBuildRequest,
    ) -> Result<RemoteBuildAccepted> {
        let response = self.client.post(url).json(request).send().await?;

        handle_response(response).await
    }

    /// Post a finished build's result to the requester's `sendBackUrl`
    pub async fn send_callback(&self, url: &str, callback: &RemoteBuildCallback) -> Result<()> {
        tracing::debug!("Posting callback for build {} to {}", callback.build_id, url);
        let response = self.client.post(url).json(callback).send().await?;

        handle_empty_response(response).await
    }
}
