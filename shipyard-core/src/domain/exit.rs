//! Process exit-code contract
//!
//! Automation that wraps a batch build step (the CLI, the worker's build
//! host) relies on these exact codes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    Success,
    Failure,
    Cancelled,
    Unknown,
}

impl ExitStatus {
    pub const fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 101,
            ExitStatus::Cancelled => 102,
            ExitStatus::Unknown => 103,
        }
    }

    /// Interpret an external process exit code
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => ExitStatus::Success,
            Some(101) => ExitStatus::Failure,
            Some(102) => ExitStatus::Cancelled,
            _ => ExitStatus::Unknown,
        }
    }
}
