//! Stratus Actions
//!
//! The units of work the sagas invoke, behind two async traits:
//! - [`InfraActions`]: terraform init / plan / apply, VM validation, teardown
//! - [`DeployActions`]: checkout and build, tests, artifact deploy, rollback, notify
//!
//! Production implementations shell out to terraform, git, ssh and scp.
//! The [`simulated`] module provides deterministic stand-ins used by tests
//! and by orchestrators started in simulate mode.
//!
//! Every action may run more than once with the same input (the runtime
//! retries and re-executes), so each implementation converges instead of
//! assuming a clean slate.

pub mod command;
pub mod config;
pub mod deploy;
pub mod infra;
pub mod simulated;

pub use config::ActionConfig;
pub use deploy::{DeployActions, ShellDeployActions};
pub use infra::{InfraActions, TerraformActions};
