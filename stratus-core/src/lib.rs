//! Stratus Core
//!
//! Core types and abstractions for the Stratus provisioning and delivery sagas.
//!
//! This crate contains:
//! - Domain types: saga inputs, outputs and status machines
//! - DTOs: Data transfer objects exchanged over the orchestrator API
//! - Retry policies and the failure taxonomy shared by actions and sagas

pub mod domain;
pub mod dto;
pub mod error;
pub mod retry;
