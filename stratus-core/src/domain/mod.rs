//! Core domain types
//!
//! This module contains the domain structures used across Stratus services.
//! They are shared between the orchestrator (which runs the sagas), the
//! action executors (which do the work) and the client (which observes it).

pub mod deploy;
pub mod infra;
pub mod saga;
