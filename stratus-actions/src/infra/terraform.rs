//! Terraform-backed provisioning

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use stratus_core::domain::infra::{InfraInput, InfraOutput, TerraformPlanResult};
use stratus_core::error::ActionError;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::InfraActions;
use crate::command::{self, CommandOutput};
use crate::config::ActionConfig;

const PLAN_FILE_NAME: &str = "tfplan";

/// Drives the terraform CLI in the configured directory
pub struct TerraformActions {
    config: ActionConfig,
}

impl TerraformActions {
    pub fn new(config: ActionConfig) -> Self {
        Self { config }
    }

    fn working_dir(&self) -> Result<PathBuf, ActionError> {
        std::path::absolute(&self.config.terraform_dir).map_err(|e| {
            ActionError::internal(format!(
                "cannot resolve terraform directory {}: {}",
                self.config.terraform_dir.display(),
                e
            ))
        })
    }

    async fn terraform(&self, args: &[String]) -> Result<CommandOutput, ActionError> {
        let dir = self.working_dir()?;
        command::run(&self.config.terraform_bin, args, Some(&dir)).await
    }

    async fn terraform_checked(&self, args: &[String]) -> Result<CommandOutput, ActionError> {
        let dir = self.working_dir()?;
        command::run_checked(&self.config.terraform_bin, args, Some(&dir)).await
    }

    async fn read_outputs(&self, input: &InfraInput) -> Result<InfraOutput, ActionError> {
        let output = self
            .terraform_checked(&args(&["output", "-json"]))
            .await?;

        let json: Value = serde_json::from_str(&output.stdout)
            .map_err(|e| ActionError::transient(format!("unreadable terraform output: {}", e)))?;

        parse_outputs(&json, input)
    }
}

#[async_trait]
impl InfraActions for TerraformActions {
    async fn init(&self, input: &InfraInput) -> Result<String, ActionError> {
        let dir = self.working_dir()?;
        info!(
            "Initializing terraform in {} for {}",
            dir.display(),
            input.default_instance_id()
        );

        self.terraform_checked(&args(&["init", "-input=false", "-no-color"]))
            .await?;

        Ok(dir.display().to_string())
    }

    async fn plan(&self, input: &InfraInput) -> Result<TerraformPlanResult, ActionError> {
        let mut plan_args = args(&[
            "plan",
            "-input=false",
            "-no-color",
            "-detailed-exitcode",
        ]);
        plan_args.push(format!("-out={}", PLAN_FILE_NAME));
        plan_args.extend(var_args(input));

        // -detailed-exitcode: 0 = no changes, 2 = changes present
        let output = self.terraform(&plan_args).await?;
        let has_changes = match output.exit_code {
            0 => false,
            2 => true,
            code => {
                return Err(ActionError::transient(format!(
                    "terraform plan exited with code {}: {}",
                    code,
                    output.summary()
                )));
            }
        };

        let resources_to_add = if has_changes {
            let shown = self
                .terraform_checked(&args(&["show", "-json", PLAN_FILE_NAME]))
                .await?;
            let json: Value = serde_json::from_str(&shown.stdout)
                .map_err(|e| ActionError::transient(format!("unreadable plan: {}", e)))?;
            count_resources_to_add(&json)
        } else {
            0
        };

        let plan_file = self.working_dir()?.join(PLAN_FILE_NAME);
        info!(
            "Plan ready: {} resource(s) to add, changes: {}",
            resources_to_add, has_changes
        );

        Ok(TerraformPlanResult {
            has_changes,
            resources_to_add,
            plan_file: plan_file.display().to_string(),
        })
    }

    async fn apply(
        &self,
        input: &InfraInput,
        plan_file: &str,
    ) -> Result<InfraOutput, ActionError> {
        info!("Applying plan {}", plan_file);

        let output = self
            .terraform(&args(&[
                "apply",
                "-input=false",
                "-no-color",
                "-auto-approve",
                plan_file,
            ]))
            .await?;

        if !output.success() {
            // A re-executed apply finds its saved plan already consumed
            if output.stderr.contains("stale") {
                warn!("Saved plan is stale, applying current configuration instead");
                let mut apply_args =
                    args(&["apply", "-input=false", "-no-color", "-auto-approve"]);
                apply_args.extend(var_args(input));
                self.terraform_checked(&apply_args).await?;
            } else {
                return Err(ActionError::transient(format!(
                    "terraform apply exited with code {}: {}",
                    output.exit_code,
                    output.summary()
                )));
            }
        }

        self.read_outputs(input).await
    }

    async fn validate(&self, output: &InfraOutput) -> Result<bool, ActionError> {
        let address = format!("{}:{}", output.vm_public_ip, self.config.ssh_port);

        for attempt in 1..=self.config.health_check_attempts {
            debug!("Probing {} (attempt {})", address, attempt);

            match tokio::time::timeout(
                self.config.health_check_timeout,
                TcpStream::connect(address.as_str()),
            )
            .await
            {
                Ok(Ok(_)) => {
                    info!("VM {} is reachable at {}", output.vm_name, address);
                    return Ok(true);
                }
                Ok(Err(e)) => debug!("Probe of {} failed: {}", address, e),
                Err(_) => debug!("Probe of {} timed out", address),
            }

            if attempt < self.config.health_check_attempts {
                tokio::time::sleep(self.config.health_check_interval).await;
            }
        }

        warn!("VM {} did not answer on {}", output.vm_name, address);
        Ok(false)
    }

    async fn destroy(&self, input: &InfraInput) -> Result<(), ActionError> {
        info!("Destroying stack {}", input.default_instance_id());

        let mut destroy_args = args(&["destroy", "-input=false", "-no-color", "-auto-approve"]);
        destroy_args.extend(var_args(input));
        self.terraform_checked(&destroy_args).await?;

        Ok(())
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn var_args(input: &InfraInput) -> Vec<String> {
    input
        .terraform_vars()
        .into_iter()
        .map(|(key, value)| format!("-var={}={}", key, value))
        .collect()
}

/// Counts resource changes whose actions include `create`
fn count_resources_to_add(plan: &Value) -> u32 {
    plan.get("resource_changes")
        .and_then(Value::as_array)
        .map(|changes| {
            changes
                .iter()
                .filter(|change| {
                    change["change"]["actions"]
                        .as_array()
                        .is_some_and(|actions| actions.iter().any(|a| a == "create"))
                })
                .count() as u32
        })
        .unwrap_or(0)
}

/// Maps `terraform output -json` onto [`InfraOutput`]
///
/// `admin_username` falls back to the input when the stack does not export it.
fn parse_outputs(json: &Value, input: &InfraInput) -> Result<InfraOutput, ActionError> {
    let value = |key: &str| -> Result<String, ActionError> {
        json.get(key)
            .and_then(|entry| entry.get("value"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ActionError::business(format!("terraform output '{}' is missing", key)))
    };

    Ok(InfraOutput {
        resource_group_name: value("resource_group_name")?,
        vnet_name: value("vnet_name")?,
        nsg_name: value("nsg_name")?,
        vm_name: value("vm_name")?,
        vm_public_ip: value("vm_public_ip")?,
        vm_private_ip: value("vm_private_ip")?,
        admin_username: value("admin_username").unwrap_or_else(|_| input.admin_username.clone()),
    })
}
