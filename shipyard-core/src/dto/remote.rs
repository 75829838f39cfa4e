//! Remote (offloaded) build protocol

use serde::{Deserialize, Serialize};

use crate::domain::worker::Platform;

/// Per-target build configuration forwarded to an offload server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub name: String,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Opaque build-host settings
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// POST body sent to the offload server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBuildRequest {
    /// Correlation id chosen by the requester; servers echo it as `buildId`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    pub workspace_name: String,
    pub send_back_url: String,
    pub config: TargetConfig,
}

/// Immediate response to a remote build request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBuildAccepted {
    pub build_id: String,
}

/// Posted back to `sendBackUrl` once the remote build finishes.
///
/// Exactly one of `base64_artifact` / `error` is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBuildCallback {
    pub build_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteBuildCallback {
    pub fn artifact(build_id: impl Into<String>, base64: String) -> Self {
        Self {
            build_id: build_id.into(),
            base64_artifact: Some(base64),
            error: None,
        }
    }

    pub fn failed(build_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            base64_artifact: None,
            error: Some(error.into()),
        }
    }

    /// Split into artifact or remote build error.
    ///
    /// A callback carrying both or neither field is reported as an error.
    pub fn into_result(self) -> Result<String, String> {
        match (self.base64_artifact, self.error) {
            (Some(artifact), None) => Ok(artifact),
            (None, Some(error)) => Err(error),
            (Some(_), Some(error)) => Err(format!("ambiguous callback: {}", error)),
            (None, None) => Err("callback carried neither artifact nor error".to_string()),
        }
    }
}
