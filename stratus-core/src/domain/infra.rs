//! Infrastructure provisioning domain types

use serde::{Deserialize, Serialize};

use crate::error::IllegalTransition;

/// Parameters of one provisioning run
///
/// Every field maps to a Terraform variable of the same name. Immutable for
/// the lifetime of a saga instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraInput {
    pub project_name: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_vm_size")]
    pub vm_size: String,
    #[serde(default = "default_vnet_address_space")]
    pub vnet_address_space: String,
    #[serde(default = "default_subnet_prefix")]
    pub subnet_prefix: String,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
}

fn default_region() -> String {
    "uksouth".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_vm_size() -> String {
    "Standard_B2s".to_string()
}

fn default_vnet_address_space() -> String {
    "10.0.0.0/16".to_string()
}

fn default_subnet_prefix() -> String {
    "10.0.1.0/24".to_string()
}

pub(crate) fn default_admin_username() -> String {
    "azureadmin".to_string()
}

impl InfraInput {
    /// Creates an input for `project_name` with every other field defaulted
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            region: default_region(),
            environment: default_environment(),
            vm_size: default_vm_size(),
            vnet_address_space: default_vnet_address_space(),
            subnet_prefix: default_subnet_prefix(),
            admin_username: default_admin_username(),
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Instance id used when the caller does not pick one
    pub fn default_instance_id(&self) -> String {
        format!("infra-{}-{}", self.project_name, self.environment)
    }

    /// Name of a resource of the given kind, e.g. `vm-myapp-dev`
    pub fn resource_name(&self, prefix: &str) -> String {
        format!("{}-{}-{}", prefix, self.project_name, self.environment)
    }

    /// Terraform `-var` assignments for this input
    pub fn terraform_vars(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("project_name", self.project_name.as_str()),
            ("region", self.region.as_str()),
            ("environment", self.environment.as_str()),
            ("vm_size", self.vm_size.as_str()),
            ("vnet_address_space", self.vnet_address_space.as_str()),
            ("subnet_prefix", self.subnet_prefix.as_str()),
            ("admin_username", self.admin_username.as_str()),
        ]
    }
}

/// Outcome of `terraform plan`
///
/// Only the apply step consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerraformPlanResult {
    pub has_changes: bool,
    pub resources_to_add: u32,
    pub plan_file: String,
}

/// What the provisioning saga hands over once the VM is up and healthy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfraOutput {
    pub resource_group_name: String,
    pub vnet_name: String,
    pub nsg_name: String,
    pub vm_name: String,
    pub vm_public_ip: String,
    pub vm_private_ip: String,
    pub admin_username: String,
}

/// Provisioning saga status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InfraStatus {
    Pending,
    Initializing,
    Planning,
    Provisioning,
    Validating,
    Ready,
    Failed,
    Destroying,
}

impl InfraStatus {
    /// `READY` and `FAILED` end a run
    pub fn is_terminal(self) -> bool {
        matches!(self, InfraStatus::Ready | InfraStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: InfraStatus) -> bool {
        use InfraStatus::*;

        match (self, next) {
            (Pending, Initializing)
            | (Initializing, Planning)
            | (Planning, Provisioning)
            | (Provisioning, Validating)
            | (Validating, Ready) => true,
            // Resources may exist once apply has been invoked
            (Provisioning, Destroying) | (Validating, Destroying) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Checked transition
    pub fn transition_to(self, next: InfraStatus) -> Result<InfraStatus, IllegalTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(IllegalTransition {
                machine: "infra",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InfraStatus::Pending => "PENDING",
            InfraStatus::Initializing => "INITIALIZING",
            InfraStatus::Planning => "PLANNING",
            InfraStatus::Provisioning => "PROVISIONING",
            InfraStatus::Validating => "VALIDATING",
            InfraStatus::Ready => "READY",
            InfraStatus::Failed => "FAILED",
            InfraStatus::Destroying => "DESTROYING",
        }
    }
}

impl std::fmt::Display for InfraStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InfraStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(InfraStatus::Pending),
            "INITIALIZING" => Ok(InfraStatus::Initializing),
            "PLANNING" => Ok(InfraStatus::Planning),
            "PROVISIONING" => Ok(InfraStatus::Provisioning),
            "VALIDATING" => Ok(InfraStatus::Validating),
            "READY" => Ok(InfraStatus::Ready),
            "FAILED" => Ok(InfraStatus::Failed),
            "DESTROYING" => Ok(InfraStatus::Destroying),
            other => Err(format!("unknown infra status '{}'", other)),
        }
    }
}
