//! Deployment domain types

use serde::{Deserialize, Serialize};

/// Kind of publishing backend a deploy target talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployKind {
    /// App/game store (e.g. platform review pipelines)
    Store,
    /// Object storage bucket or CDN
    Bucket,
    /// Server hosting provider
    Hosting,
}

impl std::fmt::Display for DeployKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployKind::Store => write!(f, "store"),
            DeployKind::Bucket => write!(f, "bucket"),
            DeployKind::Hosting => write!(f, "hosting"),
        }
    }
}

/// A configured deployment step, read from project configuration.
///
/// Declaration order is execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTarget {
    pub name: String,
    pub kind: DeployKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Uploader executable run by the command backend
    pub command: String,
    /// Arguments; `{version}`, `{artifact}` and `{changelog}` are substituted
    #[serde(default)]
    pub args: Vec<String>,
    /// Build target whose artifact this step publishes; all artifacts when unset
    #[serde(default)]
    pub artifact_from: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Outcome of one deploy target within one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail")]
pub enum DeployOutcome {
    Success,
    Failure(String),
    Skipped,
}

impl DeployOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, DeployOutcome::Failure(_))
    }
}

/// Per-target entry of the aggregate deploy report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub target: String,
    pub kind: DeployKind,
    pub outcome: DeployOutcome,
    pub duration_ms: u64,
}
