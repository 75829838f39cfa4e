//! Data Transfer Objects for inter-service communication
//!
//! Payloads exchanged between the coordinator, build workers, offload servers
//! and the CLI. Channel packets and the remote build protocol use camelCase
//! field names on the wire.

pub mod build;
pub mod pipeline;
pub mod remote;
pub mod worker;
