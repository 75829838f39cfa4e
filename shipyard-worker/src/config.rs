//! Worker configuration
//!
//! Defines the worker's identity, how it reaches the coordinator and how it
//! invokes the external build host.

use shipyard_core::domain::worker::Platform;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::workspace::{WorkspaceMap, parse_mapping};

#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this worker
    pub worker_id: String,

    /// Platform this worker builds for
    pub platform: Platform,

    /// Coordinator channel address (e.g., "coordinator:7070")
    pub coordinator_addr: String,

    /// Shared secret presented in the handshake
    pub auth_token: Option<String>,

    /// Build host executable followed by its arguments
    pub build_command: Vec<String>,

    /// Root directory for build outputs and unmapped workspaces
    pub workspace_root: PathBuf,

    /// Workspace name to directory, for offloaded builds
    pub workspace_map: HashMap<String, PathBuf>,

    /// How often to send a heartbeat
    pub heartbeat_interval: Duration,

    /// Bind address of the offload HTTP server; disabled when unset
    pub offload_bind_addr: Option<String>,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - WORKER_ID (optional, default: random)
    /// - WORKER_PLATFORM (optional, default: host OS)
    /// - COORDINATOR_ADDR (optional, default: 127.0.0.1:7070)
    /// - SHIPYARD_AUTH_TOKEN (optional)
    /// - BUILD_COMMAND (optional, default: ./build.sh)
    /// - WORKSPACE_ROOT (optional, default: ./workspace)
    /// - WORKSPACE_MAP (optional, "name=dir,name=dir")
    /// - HEARTBEAT_INTERVAL (optional, seconds, default: 15)
    /// - OFFLOAD_BIND_ADDR (optional)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let platform = match env_string("WORKER_PLATFORM") {
            Some(p) => p
                .parse::<Platform>()
                .map_err(|e| anyhow::anyhow!("WORKER_PLATFORM: {}", e))?,
            None => defaults.platform,
        };

        let build_command = env_string("BUILD_COMMAND")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or(defaults.build_command);

        let heartbeat_interval = std::env::var("HEARTBEAT_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.heartbeat_interval);

        let workspace_map = match env_string("WORKSPACE_MAP") {
            Some(spec) => parse_mapping(&spec).map_err(|e| anyhow::anyhow!("WORKSPACE_MAP: {}", e))?,
            None => HashMap::new(),
        };

        Ok(Self {
            worker_id: env_string("WORKER_ID").unwrap_or(defaults.worker_id),
            platform,
            coordinator_addr: env_string("COORDINATOR_ADDR").unwrap_or(defaults.coordinator_addr),
            auth_token: env_string("SHIPYARD_AUTH_TOKEN"),
            build_command,
            workspace_root: env_string("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            workspace_map,
            heartbeat_interval,
            offload_bind_addr: env_string("OFFLOAD_BIND_ADDR"),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if self.coordinator_addr.is_empty() {
            anyhow::bail!("coordinator_addr cannot be empty");
        }

        if self.build_command.is_empty() {
            anyhow::bail!("build_command cannot be empty");
        }

        if self.heartbeat_interval.as_secs() == 0 {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Config {
    /// Workspaces offloaded builds may name
    pub fn workspaces(&self) -> WorkspaceMap {
        WorkspaceMap::new(self.workspace_root.clone(), self.workspace_map.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            platform: host_platform(),
            coordinator_addr: "127.0.0.1:7070".to_string(),
            auth_token: None,
            build_command: vec!["./build.sh".to_string()],
            workspace_root: PathBuf::from("workspace"),
            workspace_map: HashMap::new(),
            heartbeat_interval: Duration::from_secs(15),
            offload_bind_addr: None,
        }
    }
}

fn host_platform() -> Platform {
    match std::env::consts::OS {
        "windows" => Platform::Windows,
        "macos" => Platform::MacOs,
        _ => Platform::Linux,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}
