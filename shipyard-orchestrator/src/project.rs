//! Project definitions
//!
//! Loaded once at startup from a TOML file. Every build target carries an
//! explicit platform, so routing never depends on the target's name.

use anyhow::{Context, Result};
use serde::Deserialize;
use shipyard_core::domain::deploy::DeployTarget;
use shipyard_core::domain::worker::Platform;
use shipyard_core::dto::pipeline::StartPipeline;
use shipyard_core::dto::remote::TargetConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::notify::HookConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub git_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Local checkout used for changelog, version bump and tagging
    pub workspace: PathBuf,
    /// Push the version tag to `origin` after tagging
    #[serde(default)]
    pub push_tags: bool,
    pub targets: Vec<TargetSpec>,
    /// Executed in declaration order
    #[serde(default)]
    pub deploy: Vec<DeployTarget>,
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
}

fn default_branch() -> String {
    "main".to_string()
}

/// A named build configuration and where it is built
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub platform: Platform,
    /// Build through the remote broker instead of a connected worker
    #[serde(default)]
    pub offload: bool,
    /// Opaque settings forwarded to offload servers
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl TargetSpec {
    pub fn to_target_config(&self, version: Option<&str>) -> TargetConfig {
        TargetConfig {
            name: self.name.clone(),
            platform: self.platform,
            version: version.map(str::to_string),
            settings: self.settings.clone(),
        }
    }
}

impl Project {
    /// Resolve requested target names against the configuration.
    ///
    /// `None` selects every configured target; an explicit empty list is an
    /// error. Unknown names fail instead of being guessed from their spelling.
    pub fn resolve_targets(
        &self,
        requested: Option<&[String]>,
    ) -> Result<Vec<TargetSpec>, OrchestrationError> {
        let Some(requested) = requested else {
            return Ok(self.targets.clone());
        };
        if requested.is_empty() {
            return Err(OrchestrationError::EmptyTargetSet);
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(requested.len());
        for name in requested {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let spec = self
                .targets
                .iter()
                .find(|t| &t.name == name)
                .ok_or_else(|| OrchestrationError::UnmappedTarget(name.clone()))?;
            resolved.push(spec.clone());
        }
        Ok(resolved)
    }

    pub fn target(&self, name: &str) -> Option<&TargetSpec> {
        self.targets.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectCatalog {
    #[serde(default)]
    projects: Vec<Project>,
}

impl ProjectCatalog {
    pub fn new(projects: Vec<Project>) -> Result<Self> {
        let catalog = Self { projects };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read projects file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid projects file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let catalog: ProjectCatalog = toml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn get(&self, id: Uuid) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Find the project a start request refers to
    pub fn resolve(&self, req: &StartPipeline) -> Result<&Project, OrchestrationError> {
        match (req.project_id, req.project_name.as_deref()) {
            (Some(id), _) => self
                .get(id)
                .ok_or_else(|| OrchestrationError::UnknownProject(id.to_string())),
            (None, Some(name)) => self
                .by_name(name)
                .ok_or_else(|| OrchestrationError::UnknownProject(name.to_string())),
            (None, None) => Err(OrchestrationError::UnknownProject(
                "no project id or name given".to_string(),
            )),
        }
    }

    fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();

        for project in &self.projects {
            if !ids.insert(project.id) {
                anyhow::bail!("duplicate project id {}", project.id);
            }
            if !names.insert(project.name.as_str()) {
                anyhow::bail!("duplicate project name '{}'", project.name);
            }
            if project.targets.is_empty() {
                anyhow::bail!("project '{}' has no targets", project.name);
            }

            let mut targets = HashSet::new();
            for target in &project.targets {
                if !targets.insert(target.name.as_str()) {
                    anyhow::bail!(
                        "project '{}' declares target '{}' twice",
                        project.name,
                        target.name
                    );
                }
            }

            for deploy in &project.deploy {
                if let Some(source) = &deploy.artifact_from {
                    if !targets.contains(source.as_str()) {
                        anyhow::bail!(
                            "deploy '{}' of project '{}' references unknown target '{}'",
                            deploy.name,
                            project.name,
                            source
                        );
                    }
                }
            }
        }

        Ok(())
    }
}
