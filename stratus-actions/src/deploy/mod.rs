//! Build, test and deploy actions

mod shell;

pub use shell::ShellDeployActions;

use async_trait::async_trait;
use stratus_core::domain::deploy::{BuildRequest, BuildResult, DeployResult};
use stratus_core::error::ActionError;

/// Steps of the pipeline saga
///
/// `deploy_artifact` keeps the previously deployed artifact around so that
/// `rollback` can restore it. Rollback only undoes `attempted`: when that
/// artifact is not the live release, or is `None`, nothing changes and the
/// call succeeds.
#[async_trait]
pub trait DeployActions: Send + Sync {
    async fn checkout_and_build(&self, request: &BuildRequest)
    -> Result<BuildResult, ActionError>;

    /// Runs the test command; `Ok(false)` means tests ran and failed
    async fn run_tests(&self, request: &BuildRequest) -> Result<bool, ActionError>;

    async fn deploy_artifact(
        &self,
        build: &BuildResult,
        target_host: &str,
        admin_username: &str,
    ) -> Result<DeployResult, ActionError>;

    async fn rollback(
        &self,
        target_host: &str,
        admin_username: &str,
        attempted: Option<&str>,
    ) -> Result<(), ActionError>;

    async fn notify(&self, message: &str) -> Result<(), ActionError>;
}
