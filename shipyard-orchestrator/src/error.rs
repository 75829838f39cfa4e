//! Orchestration error taxonomy
//!
//! Errors here abort the pipeline they occur in. Deploy-step and hook
//! failures have their own types (`DeployError`, `HookError`) because they
//! are recorded and reported instead of propagated.

use shipyard_core::channel::ChannelError;
use shipyard_core::domain::pipeline::InvalidTransition;
use shipyard_core::domain::worker::Platform;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// No connected worker declares the required platform
    #[error("no worker available for platform {0}")]
    NoWorkerAvailable(Platform),

    /// Requested target has no explicit platform mapping in the project
    #[error("target '{0}' is not configured for this project")]
    UnmappedTarget(String),

    /// A start request named no targets at all
    #[error("no targets requested")]
    EmptyTargetSet,

    /// Transport-level send or remote submit failure
    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    /// At least one worker reported a build error
    #[error("build failed for target(s) {}: {message}", targets.join(", "))]
    BuildTargetFailed { targets: Vec<String>, message: String },

    /// Workers did not report every target before the deadline
    #[error("timed out after {timeout_secs}s waiting for target(s) {}", pending.join(", "))]
    BuildTimedOut {
        pending: Vec<String>,
        timeout_secs: u64,
    },

    #[error("project {0} already has an active pipeline")]
    ProjectAlreadyActive(Uuid),

    #[error("unknown project: {0}")]
    UnknownProject(String),

    #[error("coordinator is shutting down")]
    ShuttingDown,

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("source control error: {0}")]
    SourceControl(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl From<ChannelError> for OrchestrationError {
    fn from(err: ChannelError) -> Self {
        OrchestrationError::DispatchFailed(err.to_string())
    }
}
