//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::build::BuildTask;
use crate::domain::deploy::DeployRecord;
use crate::domain::exit::ExitStatus;

/// One end-to-end run for one project.
///
/// Owned by the coordinator for its lifetime; clones are snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub project_id: Uuid,
    pub project_name: String,
    pub targets: Vec<String>,
    pub stage: PipelineStage,
    pub changelog: Vec<String>,
    pub version: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub tasks: Vec<BuildTask>,
    pub deploys: Vec<DeployRecord>,
    pub timings: StageTimings,
    pub failure: Option<PipelineFailure>,
    pub tag: Option<String>,
}

impl Pipeline {
    pub fn new(project_id: Uuid, project_name: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            project_name: project_name.into(),
            targets,
            stage: PipelineStage::Created,
            changelog: Vec::new(),
            version: None,
            started_at: Utc::now(),
            finished_at: None,
            tasks: Vec::new(),
            deploys: Vec::new(),
            timings: StageTimings::default(),
            failure: None,
            tag: None,
        }
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    pub fn advance(&mut self, next: PipelineStage) -> Result<(), InvalidTransition> {
        if !self.stage.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Exit code a wrapping script should report for this pipeline
    pub fn exit_status(&self) -> ExitStatus {
        match self.stage {
            PipelineStage::Done => ExitStatus::Success,
            PipelineStage::Failed => ExitStatus::Failure,
            PipelineStage::Cancelled => ExitStatus::Cancelled,
            _ => ExitStatus::Unknown,
        }
    }
}

/// Pipeline lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Created,
    VersionBump,
    Building,
    Deploying,
    Notifying,
    Tagging,
    Done,
    Failed,
    Cancelled,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Done | PipelineStage::Failed | PipelineStage::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (Created, VersionBump)
                | (VersionBump, Building)
                | (Building, Deploying)
                | (Deploying, Notifying)
                | (Notifying, Tagging)
                | (Tagging, Done)
                | (_, Failed)
                | (_, Cancelled)
        )
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: PipelineStage,
    pub to: PipelineStage,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid pipeline transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Why and where a pipeline stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    pub reason: String,
}

/// Wall-clock durations per stage group, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimings {
    pub prebuild_ms: u64,
    pub build_ms: u64,
    pub deploy_ms: u64,
    pub hooks_ms: u64,
}

impl StageTimings {
    pub fn total_ms(&self) -> u64 {
        self.prebuild_ms + self.build_ms + self.deploy_ms + self.hooks_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        Pipeline::new(Uuid::new_v4(), "game", vec!["LinuxBuild".into()])
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut p = pipeline();
        for stage in [
            PipelineStage::VersionBump,
            PipelineStage::Building,
            PipelineStage::Deploying,
            PipelineStage::Notifying,
            PipelineStage::Tagging,
            PipelineStage::Done,
        ] {
            p.advance(stage).unwrap();
        }
        assert!(p.finished_at.is_some());
    }

    #[test]
    fn test_failed_reachable_from_any_live_stage() {
        for stage in [
            PipelineStage::Created,
            PipelineStage::VersionBump,
            PipelineStage::Building,
            PipelineStage::Deploying,
            PipelineStage::Notifying,
            PipelineStage::Tagging,
        ] {
            assert!(stage.can_transition_to(PipelineStage::Failed));
        }
    }

    #[test]
    fn test_exit_status_follows_stage() {
        let mut p = pipeline();
        assert_eq!(p.exit_status(), ExitStatus::Unknown);
        p.advance(PipelineStage::Cancelled).unwrap();
        assert_eq!(p.exit_status(), ExitStatus::Cancelled);

        let mut p = pipeline();
        p.advance(PipelineStage::Failed).unwrap();
        assert_eq!(p.exit_status().code(), 101);
    }

    #[test]
    fn test_cannot_skip_stages() {
        let mut p = pipeline();
        p.advance(PipelineStage::VersionBump).unwrap();
        p.advance(PipelineStage::Building).unwrap();
        assert!(p.advance(PipelineStage::Tagging).is_err());
        assert_eq!(p.stage, PipelineStage::Building);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut p = pipeline();
        p.advance(PipelineStage::Failed).unwrap();
        assert!(p.advance(PipelineStage::VersionBump).is_err());
        assert!(p.advance(PipelineStage::Failed).is_err());
    }

    #[test]
    fn test_timings_total() {
        let timings = StageTimings {
            prebuild_ms: 1,
            build_ms: 2,
            deploy_ms: 3,
            hooks_ms: 4,
        };
        assert_eq!(timings.total_ms(), 10);
    }
}
