//! Deterministic action implementations
//!
//! Stand-ins for terraform and the deploy target. They return fixed fixtures,
//! record every invocation, and can be told to fail in specific ways so saga
//! behavior can be exercised without a cloud account.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use stratus_core::domain::deploy::{BuildRequest, BuildResult, DeployResult};
use stratus_core::domain::infra::{InfraInput, InfraOutput, TerraformPlanResult};
use stratus_core::error::ActionError;
use tracing::info;

use crate::deploy::DeployActions;
use crate::infra::InfraActions;

const PUBLIC_IP: &str = "20.185.72.14";
const PRIVATE_IP: &str = "10.0.1.4";
const RESOURCE_PREFIXES: [&str; 7] = ["rg", "vnet", "nsg", "snet", "pip", "nic", "vm"];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Invocation log and injected transient failures shared by both doubles
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    flaky: Mutex<HashMap<String, u32>>,
    delay: Duration,
}

impl Recorder {
    /// Records the call, waits the configured delay, then consumes one
    /// injected failure if any remain for `action`
    async fn enter(&self, action: &str) -> Result<(), ActionError> {
        lock(&self.calls).push(action.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut flaky = lock(&self.flaky);
        match flaky.get_mut(action) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ActionError::transient(format!(
                    "simulated {} outage",
                    action
                )))
            }
            _ => Ok(()),
        }
    }

    fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn count(&self, action: &str) -> usize {
        lock(&self.calls).iter().filter(|c| *c == action).count()
    }
}

// ============================================================================
// Infrastructure
// ============================================================================

/// Simulated Terraform stack
///
/// Apply creates seven named resources; destroy removes whatever exists and
/// succeeds when nothing does.
pub struct SimulatedInfra {
    recorder: Recorder,
    healthy: bool,
    fail_apply: bool,
    fail_destroy: bool,
    resources: Mutex<BTreeSet<String>>,
}

impl Default for SimulatedInfra {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedInfra {
    pub fn new() -> Self {
        Self {
            recorder: Recorder::default(),
            healthy: true,
            fail_apply: false,
            fail_destroy: false,
            resources: Mutex::new(BTreeSet::new()),
        }
    }

    /// Validation reports the VM as unhealthy
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Apply creates part of the stack, then fails every time
    pub fn failing_apply(mut self) -> Self {
        self.fail_apply = true;
        self
    }

    /// Destroy fails every time
    pub fn failing_destroy(mut self) -> Self {
        self.fail_destroy = true;
        self
    }

    /// The first `failures` invocations of `action` fail transiently
    pub fn flaky(self, action: &str, failures: u32) -> Self {
        lock(&self.recorder.flaky).insert(action.to_string(), failures);
        self
    }

    /// Every invocation takes at least `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.recorder.delay = delay;
        self
    }

    /// Action names in invocation order
    pub fn calls(&self) -> Vec<String> {
        self.recorder.calls()
    }

    pub fn call_count(&self, action: &str) -> usize {
        self.recorder.count(action)
    }

    /// Resources currently present in the simulated cloud
    pub fn resources(&self) -> Vec<String> {
        lock(&self.resources).iter().cloned().collect()
    }
}

#[async_trait]
impl InfraActions for SimulatedInfra {
    async fn init(&self, _input: &InfraInput) -> Result<String, ActionError> {
        self.recorder.enter("init").await?;
        Ok("./terraform".to_string())
    }

    async fn plan(&self, _input: &InfraInput) -> Result<TerraformPlanResult, ActionError> {
        self.recorder.enter("plan").await?;
        Ok(TerraformPlanResult {
            has_changes: true,
            resources_to_add: RESOURCE_PREFIXES.len() as u32,
            plan_file: "./terraform/tfplan".to_string(),
        })
    }

    async fn apply(
        &self,
        input: &InfraInput,
        plan_file: &str,
    ) -> Result<InfraOutput, ActionError> {
        self.recorder.enter("apply").await?;
        info!("Simulating apply of {}", plan_file);

        let mut resources = lock(&self.resources);
        if self.fail_apply {
            for prefix in &RESOURCE_PREFIXES[..2] {
                resources.insert(input.resource_name(prefix));
            }
            return Err(ActionError::transient(format!(
                "quota exceeded for {} in {}",
                input.vm_size, input.region
            )));
        }

        for prefix in RESOURCE_PREFIXES {
            resources.insert(input.resource_name(prefix));
        }

        Ok(InfraOutput {
            resource_group_name: input.resource_name("rg"),
            vnet_name: input.resource_name("vnet"),
            nsg_name: input.resource_name("nsg"),
            vm_name: input.resource_name("vm"),
            vm_public_ip: PUBLIC_IP.to_string(),
            vm_private_ip: PRIVATE_IP.to_string(),
            admin_username: input.admin_username.clone(),
        })
    }

    async fn validate(&self, _output: &InfraOutput) -> Result<bool, ActionError> {
        self.recorder.enter("validate").await?;
        Ok(self.healthy)
    }

    async fn destroy(&self, input: &InfraInput) -> Result<(), ActionError> {
        self.recorder.enter("destroy").await?;

        if self.fail_destroy {
            return Err(ActionError::transient("resource group is locked"));
        }

        let suffix = format!("-{}-{}", input.project_name, input.environment);
        lock(&self.resources).retain(|name| !name.ends_with(&suffix));
        Ok(())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Simulated build host and deploy target
pub struct SimulatedDeploy {
    recorder: Recorder,
    app_port: u16,
    tests_pass: bool,
    failing_branches: Vec<String>,
    healthy: bool,
    fail_deploy: bool,
    fail_rollback: bool,
    fail_notify: bool,
    /// host -> artifacts in deploy order, last one is live
    releases: Mutex<HashMap<String, Vec<String>>>,
    notifications: Mutex<Vec<String>>,
}

impl Default for SimulatedDeploy {
    fn default() -> Self {
        Self::new(8080)
    }
}

impl SimulatedDeploy {
    pub fn new(app_port: u16) -> Self {
        Self {
            recorder: Recorder::default(),
            app_port,
            tests_pass: true,
            failing_branches: Vec::new(),
            healthy: true,
            fail_deploy: false,
            fail_rollback: false,
            fail_notify: false,
            releases: Mutex::new(HashMap::new()),
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_tests(mut self) -> Self {
        self.tests_pass = false;
        self
    }

    /// Tests fail for builds of `branch` only
    pub fn failing_tests_on_branch(mut self, branch: impl Into<String>) -> Self {
        self.failing_branches.push(branch.into());
        self
    }

    /// Deploys succeed but the application never answers its health check
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn failing_deploy(mut self) -> Self {
        self.fail_deploy = true;
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    pub fn failing_notify(mut self) -> Self {
        self.fail_notify = true;
        self
    }

    /// The first `failures` invocations of `action` fail transiently
    pub fn flaky(self, action: &str, failures: u32) -> Self {
        self.inject_failures(action, failures);
        self
    }

    /// The next `failures` invocations of `action` fail transiently
    pub fn inject_failures(&self, action: &str, failures: u32) {
        lock(&self.recorder.flaky).insert(action.to_string(), failures);
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.recorder.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.recorder.calls()
    }

    pub fn call_count(&self, action: &str) -> usize {
        self.recorder.count(action)
    }

    /// Artifact currently live on `host`
    pub fn live_release(&self, host: &str) -> Option<String> {
        lock(&self.releases)
            .get(host)
            .and_then(|artifacts| artifacts.last().cloned())
    }

    /// Messages passed to notify, including ones whose delivery failed
    pub fn notifications(&self) -> Vec<String> {
        lock(&self.notifications).clone()
    }
}

#[async_trait]
impl DeployActions for SimulatedDeploy {
    async fn checkout_and_build(
        &self,
        request: &BuildRequest,
    ) -> Result<BuildResult, ActionError> {
        self.recorder.enter("build").await?;

        let sha = request.commit.sha().to_string();
        let artifact_name = BuildResult::artifact_name_for(&sha);
        Ok(BuildResult {
            artifact_path: format!("instances/{}/artifacts/{}", request.instance_id, artifact_name),
            artifact_name,
            commit_sha: sha,
            tests_passed: 0,
            tests_total: 0,
        })
    }

    async fn run_tests(&self, request: &BuildRequest) -> Result<bool, ActionError> {
        self.recorder.enter("test").await?;

        let input = &request.input;
        let passed = self.tests_pass && !self.failing_branches.contains(&input.branch);
        info!(
            "Simulated '{}' on {}: {}",
            input.test_command,
            input.branch,
            if passed { "156/156 passed" } else { "154/156 passed" }
        );
        Ok(passed)
    }

    async fn deploy_artifact(
        &self,
        build: &BuildResult,
        target_host: &str,
        _admin_username: &str,
    ) -> Result<DeployResult, ActionError> {
        self.recorder.enter("deploy").await?;

        if self.fail_deploy {
            return Err(ActionError::transient(format!(
                "connection to {} refused",
                target_host
            )));
        }

        let mut releases = lock(&self.releases);
        let history = releases.entry(target_host.to_string()).or_default();
        if history.last() != Some(&build.artifact_name) {
            history.push(build.artifact_name.clone());
        }

        Ok(DeployResult {
            target_host: target_host.to_string(),
            artifact: build.artifact_name.clone(),
            application_url: format!("http://{}:{}", target_host, self.app_port),
            healthy: self.healthy,
        })
    }

    async fn rollback(
        &self,
        target_host: &str,
        _admin_username: &str,
        attempted: Option<&str>,
    ) -> Result<(), ActionError> {
        self.recorder.enter("rollback").await?;

        if self.fail_rollback {
            return Err(ActionError::transient(format!(
                "ssh to {} timed out",
                target_host
            )));
        }

        let Some(artifact) = attempted else {
            return Ok(());
        };
        if let Some(history) = lock(&self.releases).get_mut(target_host) {
            if history.len() > 1 && history.last().map(String::as_str) == Some(artifact) {
                history.pop();
            }
        }
        Ok(())
    }

    async fn notify(&self, message: &str) -> Result<(), ActionError> {
        self.recorder.enter("notify").await?;
        lock(&self.notifications).push(message.to_string());

        if self.fail_notify {
            return Err(ActionError::transient("webhook returned 503"));
        }
        Ok(())
    }
}
