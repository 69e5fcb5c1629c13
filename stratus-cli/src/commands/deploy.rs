//! Deploy command handlers
//!
//! The app team's commands. They only need the VM address, which `run`
//! looks up through the infra saga's output when `--host` is omitted.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::*;
use stratus_client::OrchestratorClient;
use stratus_core::domain::deploy::{DeployInput, DeployStatus};
use tokio::time::Instant;

use crate::config::Config;
use crate::output::{colorize_deploy_status, print_outcome};

const DEFAULT_REPO: &str = "https://github.com/example/myapp.git";

/// Deploy subcommands
#[derive(Subcommand)]
pub enum DeployCommands {
    /// Start the pipeline and wait for the first deploy
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// VM address (skips discovery through the infra saga)
        #[arg(long)]
        host: Option<String>,

        /// Infra instance to discover the VM from
        #[arg(long, default_value = "infra-myapp-dev")]
        infra_id: String,

        /// Pipeline instance id (default: cicd-{repository name})
        #[arg(long)]
        id: Option<String>,

        /// Seconds to wait for the application URL
        #[arg(long, default_value = "60")]
        timeout: u64,
    },
    /// Push new code to the same VM
    Redeploy {
        #[command(flatten)]
        source: SourceArgs,

        /// Deploy somewhere else from now on
        #[arg(long)]
        host: Option<String>,

        #[arg(long, default_value = "cicd-myapp")]
        id: String,
    },
    /// Show the pipeline status and the live deploy
    Status {
        #[arg(default_value = "cicd-myapp")]
        id: String,
    },
}

/// What to build
#[derive(Args, Debug)]
pub struct SourceArgs {
    #[arg(long, default_value = DEFAULT_REPO)]
    pub repo_url: String,

    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Build this commit instead of the branch head
    #[arg(long)]
    pub commit: Option<String>,

    #[arg(long)]
    pub build_command: Option<String>,

    #[arg(long)]
    pub test_command: Option<String>,
}

impl SourceArgs {
    fn to_input(&self, host: Option<String>) -> DeployInput {
        let mut input = DeployInput::new(&self.repo_url).with_branch(&self.branch);
        input.commit_sha = self.commit.clone();
        input.target_host = host;
        if let Some(build) = &self.build_command {
            input.build_command = build.clone();
        }
        if let Some(test) = &self.test_command {
            input.test_command = test.clone();
        }
        input
    }
}

/// Handle deploy commands
pub async fn handle_deploy_command(command: DeployCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        DeployCommands::Run {
            source,
            host,
            infra_id,
            id,
            timeout,
        } => {
            run_deploy(
                &client,
                source,
                host,
                &infra_id,
                id,
                Duration::from_secs(timeout),
            )
            .await
        }
        DeployCommands::Redeploy { source, host, id } => {
            redeploy(&client, &id, source.to_input(host)).await
        }
        DeployCommands::Status { id } => status(&client, &id).await,
    }
}

/// Reads the VM address and admin account from a READY infra instance
async fn discover_host(client: &OrchestratorClient, infra_id: &str) -> Result<(String, String)> {
    let details = match client.infra_output(infra_id).await {
        Ok(details) => details,
        Err(e) if e.is_not_found() => anyhow::bail!(
            "can't find infra instance {} - has the infra team run 'stratus infra provision' yet?",
            infra_id
        ),
        Err(e) => return Err(e.into()),
    };

    if !details.ready {
        anyhow::bail!("infra's not ready yet (status: {})", details.status);
    }

    let host = details
        .vm_public_ip
        .context("infra output has no public IP")?;
    let admin = details
        .admin_username
        .unwrap_or_else(|| "azureadmin".to_string());
    Ok((host, admin))
}

async fn run_deploy(
    client: &OrchestratorClient,
    source: SourceArgs,
    host: Option<String>,
    infra_id: &str,
    id: Option<String>,
    timeout: Duration,
) -> Result<()> {
    let mut input = source.to_input(None);

    match host {
        Some(host) => input.target_host = Some(host),
        None => {
            let (host, admin) = discover_host(client, infra_id).await?;
            println!("{} Found VM at {}", "✓".green(), host.cyan());
            input.target_host = Some(host);
            input.admin_username = admin;
        }
    }

    let instance = client
        .start_pipeline(id, input)
        .await
        .context("Failed to start pipeline")?;
    println!("{} Pipeline started: {}", "✓".green(), instance.id.bold());

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let details = client.pipeline_details(&instance.id).await?;

        if let Some(url) = &details.application_url {
            println!("\n{}", "Deployed!".green().bold());
            println!("  URL:      {}", url.cyan());
            if let Some(artifact) = &details.artifact {
                println!("  Artifact: {}", artifact);
            }
            if details.healthy == Some(false) {
                println!("  {}", "⚠ Health check did not pass".yellow());
            }
            return Ok(());
        }

        if matches!(
            details.status,
            DeployStatus::Failed | DeployStatus::RolledBack
        ) {
            let outcome = client.saga_result(&instance.id, false).await?;
            print_outcome(&instance.id, &outcome);
            anyhow::bail!("first deploy of {} failed", instance.id);
        }
    }

    println!("{}", "Timed out waiting for deploy to finish".yellow());
    println!(
        "{}",
        format!("  Check progress with: stratus deploy status {}", instance.id).dimmed()
    );
    Ok(())
}

async fn redeploy(client: &OrchestratorClient, id: &str, input: DeployInput) -> Result<()> {
    let accepted = client
        .request_redeploy(id, input)
        .await
        .with_context(|| format!("Failed to signal {}", id))?;

    println!(
        "{} Redeploy sent to {} - new build+test+deploy cycle starting",
        "✓".green(),
        accepted.id.bold()
    );
    if accepted.pending > 1 {
        println!(
            "{}",
            format!("  {} request(s) queued ahead of the running cycle", accepted.pending).dimmed()
        );
    }

    Ok(())
}

async fn status(client: &OrchestratorClient, id: &str) -> Result<()> {
    let details = match client.pipeline_details(id).await {
        Ok(details) => details,
        Err(e) if e.is_not_found() => {
            println!("{}", format!("{} is not running", id).yellow());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", format!("Pipeline {}:", id).bold());
    println!("  Status:   {}", colorize_deploy_status(details.status));
    if let Some(url) = &details.application_url {
        println!("  URL:      {}", url.cyan());
    }
    if let Some(artifact) = &details.artifact {
        println!("  Artifact: {}", artifact);
    }
    if let Some(healthy) = details.healthy {
        println!(
            "  Healthy:  {}",
            if healthy { "✓".green() } else { "✗".red() }
        );
    }

    Ok(())
}
