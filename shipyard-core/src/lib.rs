//! Shipyard Core
//!
//! Core types and abstractions shared by the Shipyard coordinator, build
//! workers and tooling.
//!
//! This crate contains:
//! - Domain types: Core business entities (Pipeline, BuildTask, Worker, DeployTarget)
//! - DTOs: Wire payloads exchanged between coordinator, workers and offload servers
//! - Channel: The framed, multiplexed packet transport between coordinator and workers

pub mod channel;
pub mod domain;
pub mod dto;
