//! Infrastructure provisioning actions

mod terraform;

pub use terraform::TerraformActions;

use async_trait::async_trait;
use stratus_core::domain::infra::{InfraInput, InfraOutput, TerraformPlanResult};
use stratus_core::error::ActionError;

/// Steps of the provisioning saga
///
/// `destroy` must succeed when nothing, or only part of the stack, exists.
#[async_trait]
pub trait InfraActions: Send + Sync {
    /// Prepares the working directory; returns it
    async fn init(&self, input: &InfraInput) -> Result<String, ActionError>;

    async fn plan(&self, input: &InfraInput) -> Result<TerraformPlanResult, ActionError>;

    /// Applies a saved plan and reads back the stack outputs
    async fn apply(&self, input: &InfraInput, plan_file: &str)
    -> Result<InfraOutput, ActionError>;

    /// Whether the provisioned VM answers; `Ok(false)` means unhealthy
    async fn validate(&self, output: &InfraOutput) -> Result<bool, ActionError>;

    /// Tears down everything the input describes
    async fn destroy(&self, input: &InfraInput) -> Result<(), ActionError>;
}
