//! Saga command handlers
//!
//! Kind-agnostic instance commands: listing, results and cancellation.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use stratus_client::OrchestratorClient;
use stratus_core::dto::saga::SagaOutcome;

use crate::config::Config;
use crate::output::{print_instance_summary, print_outcome};

/// Saga subcommands
#[derive(Subcommand)]
pub enum SagaCommands {
    /// List all known instances
    List,
    /// Show the result of an instance
    Result {
        id: String,

        /// Wait until the instance finishes
        #[arg(short, long)]
        wait: bool,
    },
    /// Cancel an active instance; compensation still runs
    Cancel { id: String },
}

/// Handle saga commands
pub async fn handle_saga_command(command: SagaCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        SagaCommands::List => list_sagas(&client).await,
        SagaCommands::Result { id, wait } => show_result(&client, &id, wait).await,
        SagaCommands::Cancel { id } => cancel(&client, &id).await,
    }
}

async fn list_sagas(client: &OrchestratorClient) -> Result<()> {
    let instances = client.list_sagas().await?;

    if instances.is_empty() {
        println!("{}", "No saga instances found.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} instance(s):", instances.len()).bold()
        );
        println!();
        for instance in &instances {
            print_instance_summary(instance);
        }
    }

    Ok(())
}

async fn show_result(client: &OrchestratorClient, id: &str, wait: bool) -> Result<()> {
    let outcome = client.saga_result(id, wait).await?;

    let ok = print_outcome(id, &outcome);
    if !ok && !matches!(outcome, SagaOutcome::Pending) {
        anyhow::bail!("{} did not complete", id);
    }

    Ok(())
}

async fn cancel(client: &OrchestratorClient, id: &str) -> Result<()> {
    match client.cancel_saga(id).await {
        Ok(accepted) => {
            println!("{} Cancellation requested for {}", "✓".green(), accepted.id.bold());
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            println!("{}", format!("{} is not running", id).yellow());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
