//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod deploy;
mod infra;
mod saga;

pub use deploy::DeployCommands;
pub use infra::InfraCommands;
pub use saga::SagaCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Infrastructure provisioning
    Infra {
        #[command(subcommand)]
        command: InfraCommands,
    },
    /// Build, test and deploy the application
    Deploy {
        #[command(subcommand)]
        command: DeployCommands,
    },
    /// Saga instance management
    Saga {
        #[command(subcommand)]
        command: SagaCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Infra { command } => infra::handle_infra_command(command, config).await,
        Commands::Deploy { command } => deploy::handle_deploy_command(command, config).await,
        Commands::Saga { command } => saga::handle_saga_command(command, config).await,
    }
}
