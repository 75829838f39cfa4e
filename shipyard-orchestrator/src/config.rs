//! Coordinator configuration
//!
//! Process-level settings come from environment variables with defaults.
//! Project definitions live in a separate TOML file (see [`crate::project`]).

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API bind address
    pub http_addr: String,

    /// Framed channel bind address for workers
    pub channel_addr: String,

    /// Path to the projects TOML file
    pub projects_path: PathBuf,

    /// Shared secret workers must present in their handshake
    pub auth_token: Option<String>,

    /// Where artifacts delivered by offload servers are stored
    pub artifact_dir: PathBuf,

    /// Externally reachable base URL of this coordinator, used for callbacks
    pub public_url: String,

    /// Offload server endpoint for remote builds
    pub offload_url: Option<String>,

    /// Deadline for all targets of one pipeline to report
    pub build_timeout: Duration,

    /// Request timeout when submitting remote builds
    pub submit_timeout: Duration,

    /// How long a worker has to send its handshake
    pub handshake_timeout: Duration,

    /// How long shutdown waits for in-flight pipelines
    pub shutdown_grace: Duration,

    /// Finished pipelines kept for status queries
    pub history_limit: usize,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Recognised variables (all optional):
    /// - SHIPYARD_HTTP_ADDR (default: 0.0.0.0:8080)
    /// - SHIPYARD_CHANNEL_ADDR (default: 0.0.0.0:7070)
    /// - SHIPYARD_PROJECTS (default: shipyard.toml)
    /// - SHIPYARD_AUTH_TOKEN
    /// - SHIPYARD_ARTIFACT_DIR (default: artifacts)
    /// - SHIPYARD_PUBLIC_URL (default: http://localhost:8080)
    /// - SHIPYARD_OFFLOAD_URL
    /// - SHIPYARD_BUILD_TIMEOUT (seconds, default: 7200)
    /// - SHIPYARD_SUBMIT_TIMEOUT (seconds, default: 30)
    /// - SHIPYARD_SHUTDOWN_GRACE (seconds, default: 600)
    /// - SHIPYARD_HISTORY_LIMIT (default: 100)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            http_addr: env_string("SHIPYARD_HTTP_ADDR").unwrap_or(defaults.http_addr),
            channel_addr: env_string("SHIPYARD_CHANNEL_ADDR").unwrap_or(defaults.channel_addr),
            projects_path: env_string("SHIPYARD_PROJECTS")
                .map(PathBuf::from)
                .unwrap_or(defaults.projects_path),
            auth_token: env_string("SHIPYARD_AUTH_TOKEN"),
            artifact_dir: env_string("SHIPYARD_ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_dir),
            public_url: env_string("SHIPYARD_PUBLIC_URL").unwrap_or(defaults.public_url),
            offload_url: env_string("SHIPYARD_OFFLOAD_URL"),
            build_timeout: env_secs("SHIPYARD_BUILD_TIMEOUT").unwrap_or(defaults.build_timeout),
            submit_timeout: env_secs("SHIPYARD_SUBMIT_TIMEOUT").unwrap_or(defaults.submit_timeout),
            handshake_timeout: defaults.handshake_timeout,
            shutdown_grace: env_secs("SHIPYARD_SHUTDOWN_GRACE").unwrap_or(defaults.shutdown_grace),
            history_limit: std::env::var("SHIPYARD_HISTORY_LIMIT")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(defaults.history_limit),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.public_url.starts_with("http://") && !self.public_url.starts_with("https://") {
            anyhow::bail!("public_url must start with http:// or https://");
        }

        if let Some(url) = &self.offload_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("offload_url must start with http:// or https://");
            }
        }

        if self.build_timeout.is_zero() {
            anyhow::bail!("build_timeout must be greater than 0");
        }

        if self.submit_timeout.is_zero() {
            anyhow::bail!("submit_timeout must be greater than 0");
        }

        if self.history_limit == 0 {
            anyhow::bail!("history_limit must be greater than 0");
        }

        Ok(())
    }

    /// URL offload servers post their results to
    pub fn callback_url(&self) -> String {
        format!(
            "{}/api/remote-builds/callback",
            self.public_url.trim_end_matches('/')
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            channel_addr: "0.0.0.0:7070".to_string(),
            projects_path: PathBuf::from("shipyard.toml"),
            auth_token: None,
            artifact_dir: PathBuf::from("artifacts"),
            public_url: "http://localhost:8080".to_string(),
            offload_url: None,
            build_timeout: Duration::from_secs(7200),
            submit_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(600),
            history_limit: 100,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}
