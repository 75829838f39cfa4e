//! Pipeline Orchestrator
//!
//! - [`active`]: live-pipeline set (one per project) and bounded history
//! - [`runner`]: the stage sequence and its failure/cancel paths

pub mod active;
pub mod runner;

pub use active::ActivePipelines;
pub use runner::{Components, Orchestrator};
