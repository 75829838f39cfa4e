//! Build task domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One requested target within a pipeline.
///
/// Mutated only by the completion handler matching on `target`; terminal once
/// `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildTask {
    pub target: String,
    pub pipeline_id: Uuid,
    /// Worker (or offload build id) the target was routed to
    pub assigned_to: Option<String>,
    pub status: BuildStatus,
    pub build_time_ms: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output_location: Option<String>,
    pub error_message: Option<String>,
}

impl BuildTask {
    pub fn queued(pipeline_id: Uuid, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            pipeline_id,
            assigned_to: None,
            status: BuildStatus::Queued,
            build_time_ms: None,
            completed_at: None,
            output_location: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Build task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Queued,
    Building,
    Complete,
    Error,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Complete | BuildStatus::Error)
    }
}
