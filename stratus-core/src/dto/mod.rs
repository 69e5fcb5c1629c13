//! Data Transfer Objects for the orchestrator API
//!
//! These are the request and query shapes exchanged between the
//! orchestrator, the client library and the CLI.

pub mod infra;
pub mod pipeline;
pub mod saga;
