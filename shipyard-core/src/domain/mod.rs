//! Core domain types
//!
//! This module contains the core domain structures used across Shipyard services.
//! They are shared between the coordinator (which tracks them) and the workers
//! and tooling (which report on or display them).

pub mod build;
pub mod deploy;
pub mod exit;
pub mod pipeline;
pub mod worker;
