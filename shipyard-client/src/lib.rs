//! Shipyard HTTP Client
//!
//! Typed HTTP clients for the Shipyard services:
//!
//! - [`CoordinatorClient`]: the coordinator API (start/inspect pipelines, list
//!   workers). Used by the CLI.
//! - [`OffloadClient`]: the remote build protocol. Used by the coordinator's
//!   broker to submit builds and by offload servers to post results back.
//!
//! # Example
//!
//! ```no_run
//! use shipyard_client::CoordinatorClient;
//! use shipyard_core::dto::pipeline::StartPipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = CoordinatorClient::new("http://localhost:8080");
//!
//!     let started = client
//!         .start_pipeline(&StartPipeline {
//!             project_name: Some("game".to_string()),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     println!("Started pipeline: {}", started.pipeline_id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod offload;
mod pipelines;
mod workers;

pub use error::{ClientError, Result};
pub use offload::OffloadClient;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the coordinator API
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    /// Base URL of the coordinator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the coordinator API (e.g., "http://localhost:8080")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new coordinator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the coordinator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

// =============================================================================
// Response Handlers
// =============================================================================

/// Check the status code and deserialize a JSON body
pub(crate) async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

/// Check the status code of a response whose body is ignored
pub(crate) async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    Ok(())
}
