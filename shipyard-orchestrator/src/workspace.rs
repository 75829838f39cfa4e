//! Source control collaborator
//!
//! The pipeline only needs three things from the project's checkout: the
//! changelog since the last release, a bumped version, and a release tag.
//! [`GitWorkspace`] provides them by shelling out to `git`; the version
//! lives in a `VERSION` file at the checkout root.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{OrchestrationError, Result};
use crate::project::Project;

pub const VERSION_FILE: &str = "VERSION";

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Commit subjects since the most recent tag, newest first. May be empty.
    async fn changelog(&self) -> Result<Vec<String>>;

    /// Compute, persist and commit the next version
    async fn bump_version(&self) -> Result<String>;

    /// Tag the current revision with `v<version>`; returns the tag name
    async fn tag(&self, version: &str) -> Result<String>;
}

/// Opens the source control view of a project for one pipeline run
pub trait WorkspaceFactory: Send + Sync {
    fn open(&self, project: &Project) -> Arc<dyn SourceControl>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GitWorkspaceFactory;

impl WorkspaceFactory for GitWorkspaceFactory {
    fn open(&self, project: &Project) -> Arc<dyn SourceControl> {
        Arc::new(GitWorkspace::new(&project.workspace, project.push_tags))
    }
}

#[derive(Debug, Clone)]
pub struct GitWorkspace {
    dir: PathBuf,
    push_tags: bool,
}

impl GitWorkspace {
    pub fn new(dir: impl Into<PathBuf>, push_tags: bool) -> Self {
        Self {
            dir: dir.into(),
            push_tags,
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        debug!("git {} (in {})", args.join(" "), self.dir.display());
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .await
            .map_err(|e| OrchestrationError::SourceControl(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            return Err(OrchestrationError::SourceControl(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl SourceControl for GitWorkspace {
    async fn changelog(&self) -> Result<Vec<String>> {
        let log = match self.git(&["describe", "--tags", "--abbrev=0"]).await {
            Ok(last_tag) => {
                let range = format!("{}..HEAD", last_tag);
                self.git(&["log", &range, "--pretty=format:%s"]).await?
            }
            // No tag yet: the whole history is new
            Err(_) => self.git(&["log", "--pretty=format:%s"]).await?,
        };
        Ok(parse_changelog(&log))
    }

    async fn bump_version(&self) -> Result<String> {
        let current = read_version(&self.dir).await?;
        let next = next_version(&current)?;
        write_version(&self.dir, &next).await?;

        self.git(&["add", VERSION_FILE]).await?;
        let message = format!("Bump version to {}", next);
        self.git(&["commit", "-m", &message]).await?;

        info!("Version bumped {} -> {}", current, next);
        Ok(next)
    }

    async fn tag(&self, version: &str) -> Result<String> {
        let tag = format!("v{}", version);
        let message = format!("Release {}", version);
        self.git(&["tag", "-a", &tag, "-m", &message]).await?;
        if self.push_tags {
            self.git(&["push", "origin", &tag]).await?;
        }
        info!("Tagged {} in {}", tag, self.dir.display());
        Ok(tag)
    }
}

fn parse_changelog(log: &str) -> Vec<String> {
    log.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Next patch release; pre-release and build metadata are dropped
pub fn next_version(current: &str) -> Result<String> {
    let mut version = semver::Version::parse(current.trim()).map_err(|e| {
        OrchestrationError::SourceControl(format!("invalid version '{}': {}", current.trim(), e))
    })?;
    version.patch += 1;
    version.pre = semver::Prerelease::EMPTY;
    version.build = semver::BuildMetadata::EMPTY;
    Ok(version.to_string())
}

/// Current version, `0.0.0` when the file does not exist yet
pub async fn read_version(dir: &Path) -> Result<String> {
    match tokio::fs::read_to_string(dir.join(VERSION_FILE)).await {
        Ok(content) => Ok(content.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok("0.0.0".to_string()),
        Err(e) => Err(OrchestrationError::SourceControl(format!(
            "failed to read {}: {}",
            VERSION_FILE, e
        ))),
    }
}

async fn write_version(dir: &Path, version: &str) -> Result<()> {
    tokio::fs::write(dir.join(VERSION_FILE), format!("{}\n", version))
        .await
        .map_err(|e| {
            OrchestrationError::SourceControl(format!("failed to write {}: {}", VERSION_FILE, e))
        })
}
