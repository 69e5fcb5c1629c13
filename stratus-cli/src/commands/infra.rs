//! Infra command handlers
//!
//! Provisioning and status for the infra team. The VM address printed at
//! the end of `provision` is what the app team's `deploy run` discovers.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::*;
use stratus_client::OrchestratorClient;
use stratus_core::domain::infra::{InfraInput, InfraOutput};
use stratus_core::dto::saga::SagaOutcome;

use crate::config::Config;
use crate::output::{colorize_infra_status, print_outcome};

/// Infra subcommands
#[derive(Subcommand)]
pub enum InfraCommands {
    /// Provision the Azure resources and wait for the VM to be ready
    Provision(ProvisionArgs),
    /// Show provisioning status and the VM once ready
    Status {
        /// Instance id
        #[arg(default_value = "infra-myapp-dev")]
        id: String,
    },
}

#[derive(Args, Debug)]
pub struct ProvisionArgs {
    #[arg(long, default_value = "myapp")]
    pub project: String,

    #[arg(long, default_value = "dev")]
    pub environment: String,

    #[arg(long, default_value = "uksouth")]
    pub region: String,

    #[arg(long, default_value = "Standard_B2s")]
    pub vm_size: String,

    #[arg(long, default_value = "azureadmin")]
    pub admin_username: String,

    /// Instance id (default: infra-{project}-{environment})
    #[arg(long)]
    pub id: Option<String>,

    /// Return once the saga has started
    #[arg(long)]
    pub no_wait: bool,
}

impl ProvisionArgs {
    fn to_input(&self) -> InfraInput {
        let mut input = InfraInput::new(&self.project)
            .with_environment(&self.environment)
            .with_region(&self.region);
        input.vm_size = self.vm_size.clone();
        input.admin_username = self.admin_username.clone();
        input
    }
}

/// Handle infra commands
pub async fn handle_infra_command(command: InfraCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        InfraCommands::Provision(args) => provision(&client, args).await,
        InfraCommands::Status { id } => status(&client, &id).await,
    }
}

/// Start a provisioning saga and, unless told otherwise, wait for its result
async fn provision(client: &OrchestratorClient, args: ProvisionArgs) -> Result<()> {
    let input = args.to_input();

    let instance = client
        .start_infra(args.id.clone(), input)
        .await
        .context("Failed to start provisioning")?;

    println!(
        "{} Provisioning started: {}",
        "✓".green(),
        instance.id.bold()
    );

    if args.no_wait {
        println!(
            "{}",
            format!("  Check progress with: stratus infra status {}", instance.id).dimmed()
        );
        return Ok(());
    }

    println!("{}", "  Waiting for the VM to come up...".dimmed());
    let outcome = client
        .saga_result(&instance.id, true)
        .await
        .context("Failed to wait for provisioning")?;

    if let SagaOutcome::Completed { output } = &outcome {
        let output: InfraOutput =
            serde_json::from_value(output.clone()).context("Unexpected provisioning output")?;

        println!("\n{}", "All good!".green().bold());
        println!("  VM: {} @ {}", output.vm_name.cyan(), output.vm_public_ip);
        println!("  RG: {}", output.resource_group_name);
        println!(
            "\n{}",
            format!(
                "App team can deploy now: stratus deploy run --host {}",
                output.vm_public_ip
            )
            .dimmed()
        );
        return Ok(());
    }

    print_outcome(&instance.id, &outcome);
    anyhow::bail!("provisioning of {} did not complete", instance.id)
}

async fn status(client: &OrchestratorClient, id: &str) -> Result<()> {
    let details = match client.infra_output(id).await {
        Ok(details) => details,
        Err(e) if e.is_not_found() => {
            println!(
                "{}",
                format!("{} is not running or doesn't exist yet", id).yellow()
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", format!("Infra {}:", id).bold());
    println!("  Status: {}", colorize_infra_status(details.status));

    if details.ready {
        if let (Some(vm), Some(ip)) = (&details.vm_name, &details.vm_public_ip) {
            println!("  VM:     {} @ {}", vm.cyan(), ip);
        }
        if let Some(rg) = &details.resource_group {
            println!("  RG:     {}", rg);
        }
    }

    Ok(())
}
