//! Named workspaces for offloaded builds
//!
//! An offload request names the workspace to build in. Names are looked up
//! in the configured mapping first, then as a directory directly under the
//! workspace root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error("invalid workspace name '{0}'")]
    InvalidName(String),

    #[error("unknown workspace '{0}'")]
    Unknown(String),
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceMap {
    root: PathBuf,
    mapping: HashMap<String, PathBuf>,
}

impl WorkspaceMap {
    pub fn new(root: impl Into<PathBuf>, mapping: HashMap<String, PathBuf>) -> Self {
        Self {
            root: root.into(),
            mapping,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of an existing workspace
    pub fn resolve(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        let dir = match self.mapping.get(name) {
            Some(dir) => dir.clone(),
            None => {
                let plain = !name.is_empty()
                    && name != "."
                    && name != ".."
                    && !name.contains(['/', '\\']);
                if !plain {
                    return Err(WorkspaceError::InvalidName(name.to_string()));
                }
                self.root.join(name)
            }
        };

        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(WorkspaceError::Unknown(name.to_string()))
        }
    }
}

/// Parse `name=dir` pairs separated by commas
pub fn parse_mapping(spec: &str) -> anyhow::Result<HashMap<String, PathBuf>> {
    let mut mapping = HashMap::new();
    for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((name, dir)) = pair.split_once('=') else {
            anyhow::bail!("expected name=dir, got '{}'", pair);
        };
        let (name, dir) = (name.trim(), dir.trim());
        if name.is_empty() || dir.is_empty() {
            anyhow::bail!("expected name=dir, got '{}'", pair);
        }
        mapping.insert(name.to_string(), PathBuf::from(dir));
    }
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_wins_over_root() {
        let root = tempfile::tempdir().unwrap();
        let mapped = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("game")).unwrap();

        let mut mapping = HashMap::new();
        mapping.insert("game".to_string(), mapped.path().to_path_buf());
        let map = WorkspaceMap::new(root.path(), mapping);

        assert_eq!(map.resolve("game").unwrap(), mapped.path());
    }

    #[test]
    fn test_falls_back_to_root_directory() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("tools")).unwrap();
        let map = WorkspaceMap::new(root.path(), HashMap::new());

        assert_eq!(map.resolve("tools").unwrap(), root.path().join("tools"));
        assert_eq!(
            map.resolve("missing"),
            Err(WorkspaceError::Unknown("missing".into()))
        );
        assert_eq!(
            map.resolve("../etc"),
            Err(WorkspaceError::InvalidName("../etc".into()))
        );
    }

    #[test]
    fn test_parse_mapping() {
        let mapping = parse_mapping("game=/srv/game, tools = /srv/tools,").unwrap();
        assert_eq!(mapping["game"], PathBuf::from("/srv/game"));
        assert_eq!(mapping["tools"], PathBuf::from("/srv/tools"));

        assert!(parse_mapping("game").is_err());
        assert!(parse_mapping("=/srv").is_err());
    }
}
