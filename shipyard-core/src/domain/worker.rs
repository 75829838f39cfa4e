//! Worker domain model
//!
//! Represents a build worker connected to the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Platform capability a worker declares when it connects.
///
/// Matching is exact equality over this closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    #[serde(rename = "macos")]
    MacOs,
    Linux,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOs => "macos",
            Platform::Linux => "linux",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "windows" => Ok(Platform::Windows),
            "macos" => Ok(Platform::MacOs),
            "linux" => Ok(Platform::Linux),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// A worker as seen by the coordinator's registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Unique identifier for the worker
    pub id: String,

    /// Declared capability, fixed for the lifetime of the connection
    pub platform: Platform,

    /// Remote address of the worker connection
    pub address: String,

    /// When this worker connected
    pub connected_at: DateTime<Utc>,

    /// Last time any packet (including heartbeats) arrived from this worker
    pub last_seen_at: DateTime<Utc>,

    /// Current status of the worker
    pub status: WorkerStatus,
}

/// Status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    /// Connection is open
    Online,

    /// Connection has been closed
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Online => write!(f, "Online"),
            WorkerStatus::Offline => write!(f, "Offline"),
        }
    }
}
