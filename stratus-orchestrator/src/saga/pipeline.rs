//! CI/CD Pipeline Saga
//!
//! One cycle: BUILDING -> TESTING -> DEPLOYING -> COMPLETED, or FAILED and
//! then ROLLED_BACK when the rollback succeeds.
//!
//! Rollback only undoes a release the failing cycle handed to deploy; a cycle
//! that failed earlier leaves the live release alone.
//!
//! A failed first cycle ends the instance. After a successful first cycle the
//! instance parks and runs one more cycle per redeploy request until it is
//! cancelled or its mailbox is closed. Failed redeploy cycles are compensated
//! and the instance parks again.

use std::sync::Arc;
use std::time::Duration;

use stratus_actions::DeployActions;
use stratus_core::domain::deploy::{
    BuildRequest, CommitRef, DeployInput, DeployResult, DeployStatus,
};
use stratus_core::domain::saga::SagaLifecycle;
use stratus_core::error::{ActionError, FailureKind, SagaFailure};
use stratus_core::retry::{RetryPolicy, StepOptions};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::runtime::{PipelineContext, RedeployMailbox};

/// Per-step timeouts and retry policies
#[derive(Debug, Clone)]
pub struct PipelineStepOptions {
    pub build: StepOptions,
    pub test: StepOptions,
    pub deploy: StepOptions,
    pub rollback: StepOptions,
    pub notify: StepOptions,
}

impl Default for PipelineStepOptions {
    fn default() -> Self {
        let retry = RetryPolicy::backoff(
            Duration::from_secs(2),
            2.0,
            Duration::from_secs(200),
            3,
        );

        Self {
            build: StepOptions::new(Duration::from_secs(300), retry),
            test: StepOptions::new(Duration::from_secs(600), retry),
            deploy: StepOptions::new(Duration::from_secs(300), retry),
            rollback: StepOptions::new(Duration::from_secs(120), RetryPolicy::default()),
            notify: StepOptions::new(Duration::from_secs(30), retry),
        }
    }
}

impl PipelineStepOptions {
    /// Short timeouts and retries without delay
    pub fn immediate() -> Self {
        let options = StepOptions::new(Duration::from_secs(5), RetryPolicy::immediate(3));
        Self {
            build: options,
            test: options,
            deploy: options,
            rollback: options,
            notify: options,
        }
    }
}

pub struct PipelineSaga {
    actions: Arc<dyn DeployActions>,
    options: PipelineStepOptions,
}

impl PipelineSaga {
    pub fn new(actions: Arc<dyn DeployActions>, options: PipelineStepOptions) -> Self {
        Self { actions, options }
    }

    /// Runs the first cycle, then serves redeploy requests
    ///
    /// Returns the most recent successful deploy once the mailbox closes.
    pub async fn run(
        &self,
        ctx: &PipelineContext,
        mailbox: &RedeployMailbox,
        input: DeployInput,
    ) -> Result<DeployResult, SagaFailure> {
        if input.target().is_none() {
            ctx.transition(DeployStatus::Failed).await?;
            return Err(SagaFailure::precondition(
                "start",
                "target_host is required",
            ));
        }

        let mut latest = self.run_cycle(ctx, &input).await?;

        loop {
            ctx.set_lifecycle(SagaLifecycle::AwaitingSignal).await;
            info!("{}: awaiting redeploy requests", ctx.id());

            let next = tokio::select! {
                request = mailbox.recv() => request,
                _ = ctx.steps().cancelled() => {
                    return Err(SagaFailure::from_step(
                        "await_redeploy",
                        ActionError::cancelled("cancelled while awaiting a redeploy request"),
                    ));
                }
            };

            let Some(request) = next else {
                info!("{}: mailbox closed, finishing", ctx.id());
                return Ok(latest);
            };

            let request = request.inherit_target(&input);
            ctx.set_lifecycle(SagaLifecycle::Running).await;

            match self.run_cycle(ctx, &request).await {
                Ok(result) => latest = result,
                Err(failure) if failure.kind == FailureKind::Cancelled => return Err(failure),
                Err(failure) => {
                    warn!("{}: redeploy cycle {} failed: {}", ctx.id(), ctx.cycle(), failure);
                    ctx.record_failure(failure).await;
                }
            }
        }
    }

    /// One build-test-deploy cycle, compensated on failure
    async fn run_cycle(
        &self,
        ctx: &PipelineContext,
        input: &DeployInput,
    ) -> Result<DeployResult, SagaFailure> {
        let cycle = ctx.begin_cycle().await;

        let Some(host) = input.target() else {
            return Err(SagaFailure::precondition("start", "target_host is required"));
        };

        let previous = ctx.output();
        let mut activated = None;
        let delivered = self
            .deliver(ctx, input, host, cycle, previous.as_ref(), &mut activated)
            .await;

        match delivered {
            Ok(result) => Ok(result),
            Err(failure) => {
                Err(self
                    .compensate(ctx, input, host, failure, previous, activated)
                    .await)
            }
        }
    }

    /// Build, test, deploy and notify
    ///
    /// `activated` is set once deploy is invoked with an artifact that is not
    /// already the live release.
    async fn deliver(
        &self,
        ctx: &PipelineContext,
        input: &DeployInput,
        host: &str,
        cycle: u32,
        previous: Option<&DeployResult>,
        activated: &mut Option<String>,
    ) -> Result<DeployResult, SagaFailure> {
        let actions = &self.actions;

        let commit = match input.commit_sha.as_deref().map(str::trim) {
            Some(sha) if !sha.is_empty() => CommitRef::Pinned(sha.to_string()),
            _ => CommitRef::Synthetic(synthetic_sha(ctx.run_id(), cycle)),
        };
        info!(
            "{}: cycle {} building {} ({}) at {}",
            ctx.id(),
            cycle,
            input.repo_url,
            input.branch,
            commit.sha()
        );

        ctx.transition(DeployStatus::Building).await?;
        let request = BuildRequest {
            instance_id: ctx.id().to_string(),
            input: input.clone(),
            commit,
        };
        let build = ctx
            .step("build", self.options.build, || {
                actions.checkout_and_build(&request)
            })
            .await?;

        ctx.transition(DeployStatus::Testing).await?;
        let passed = ctx
            .step("test", self.options.test, || actions.run_tests(&request))
            .await?;
        if !passed {
            return Err(SagaFailure::from_step(
                "test",
                ActionError::business(format!("tests failed for {}", build.commit_sha)),
            ));
        }

        ctx.transition(DeployStatus::Deploying).await?;
        let already_live = previous.is_some_and(|live| {
            live.target_host == host && live.artifact == build.artifact_name
        });
        if !already_live {
            *activated = Some(build.artifact_name.clone());
        }
        let result = ctx
            .step("deploy", self.options.deploy, || {
                actions.deploy_artifact(&build, host, &input.admin_username)
            })
            .await?;
        if !result.healthy {
            warn!("{}: {} is not answering health checks", ctx.id(), result.application_url);
        }

        ctx.transition_with_output(DeployStatus::Completed, result.clone())
            .await?;
        info!("{}: deployed {} to {}", ctx.id(), result.artifact, host);

        let message = format!("deployed {} to {}", result.artifact, host);
        ctx.step("notify", self.options.notify, || actions.notify(&message))
            .await?;

        Ok(result)
    }

    /// Marks the cycle failed, rolls back, and notifies; returns the original cause
    ///
    /// When the rolled back release had already been published, the query
    /// surface goes back to `previous`.
    async fn compensate(
        &self,
        ctx: &PipelineContext,
        input: &DeployInput,
        host: &str,
        failure: SagaFailure,
        previous: Option<DeployResult>,
        activated: Option<String>,
    ) -> SagaFailure {
        let actions = &self.actions;
        error!("{}: cycle failed: {}", ctx.id(), failure);

        if let Err(e) = ctx.transition(DeployStatus::Failed).await {
            error!("{}: {}", ctx.id(), e);
        }

        let mut failure = failure;
        match ctx
            .compensate("rollback", self.options.rollback, || {
                actions.rollback(host, &input.admin_username, activated.as_deref())
            })
            .await
        {
            Ok(()) => {
                let published = ctx
                    .output()
                    .is_some_and(|output| Some(&output.artifact) == activated.as_ref());
                if published && previous.is_some() {
                    info!("{}: reporting the restored release again", ctx.id());
                    ctx.restore_output(previous).await;
                }
                if let Err(e) = ctx.transition(DeployStatus::RolledBack).await {
                    error!("{}: {}", ctx.id(), e);
                }
            }
            Err(e) => {
                error!("{}: rollback on {} failed: {}", ctx.id(), host, e);
                failure = failure.with_compensation("rollback", e);
            }
        }

        let message = format!("deploy failed: {}", failure.message);
        if let Err(e) = ctx
            .compensate("notify", self.options.notify, || actions.notify(&message))
            .await
        {
            warn!("{}: failure notification not delivered: {}", ctx.id(), e);
        }

        failure
    }
}

/// Stand-in commit id for cycles that did not pin one
///
/// Stable for a given run and cycle, different across cycles of a run and
/// across runs that reuse an instance id.
fn synthetic_sha(run_id: Uuid, cycle: u32) -> String {
    let seed = run_id.as_u128() as u32;
    format!("{:08x}", seed.wrapping_add(cycle.wrapping_mul(0x9E37_79B9)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_actions::simulated::{SimulatedDeploy, SimulatedInfra};
    use stratus_core::dto::saga::SagaOutcome;

    use crate::runtime::{PipelineHandle, RuntimeError};
    use crate::saga::test_support::{harness, harness_with_policy};

    const REPO: &str = "https://github.com/example/myapp.git";

    fn test_input() -> DeployInput {
        DeployInput::new(REPO).with_target_host("1.2.3.4")
    }

    async fn wait_until(handle: &PipelineHandle, condition: impl Fn(&PipelineHandle) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition(handle) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn parked(handle: &PipelineHandle) {
        wait_until(handle, |h| h.lifecycle() == SagaLifecycle::AwaitingSignal).await;
    }

    #[test]
    fn test_synthetic_sha_is_stable_per_cycle() {
        let run = Uuid::from_u128(0x0123_4567_89ab_cdef_0011_2233_4455_6677);
        let first = synthetic_sha(run, 1);

        assert_eq!(first.len(), 8);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first, synthetic_sha(run, 1));
        assert_ne!(first, synthetic_sha(run, 2));

        let other_run = Uuid::from_u128(0x0123_4567_89ab_cdef_0011_2233_4455_6678);
        assert_ne!(first, synthetic_sha(other_run, 1));
    }

    #[tokio::test]
    async fn test_restarted_id_builds_new_artifact() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let first_run = h.runtime.pipeline("cicd-myapp").await.unwrap();
        parked(&first_run).await;
        let first = first_run.details().artifact;

        h.runtime.cancel("cicd-myapp").await.unwrap();
        first_run.result().await;

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let second_run = h.runtime.pipeline("cicd-myapp").await.unwrap();
        parked(&second_run).await;
        let second = second_run.details().artifact;

        assert!(first.is_some() && second.is_some());
        assert_ne!(first, second);
        assert_eq!(second_run.snapshot().cycle, 1);
    }

    #[tokio::test]
    async fn test_pending_snapshot_has_no_deliverable() {
        let h = harness(
            SimulatedInfra::new(),
            SimulatedDeploy::default().with_delay(Duration::from_millis(50)),
        );

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();

        let details = handle.details();
        assert!(details.application_url.is_none());
        assert!(details.artifact.is_none());
        assert!(details.healthy.is_none());
    }

    #[tokio::test]
    async fn test_first_cycle_deploys_and_parks() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();
        parked(&handle).await;

        let details = handle.details();
        assert_eq!(details.status, DeployStatus::Completed);
        assert_eq!(details.application_url.as_deref(), Some("http://1.2.3.4:8080"));
        assert_eq!(details.healthy, Some(true));

        let artifact = details.artifact.unwrap();
        assert!(artifact.starts_with("app-") && artifact.ends_with(".tar.gz"));
        assert_eq!(
            h.deploy.notifications(),
            vec![format!("deployed {} to 1.2.3.4", artifact)]
        );
        assert_eq!(handle.outcome(), SagaOutcome::Pending);
    }

    #[tokio::test]
    async fn test_missing_target_fails_without_actions() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());

        h.runtime
            .start_pipeline(None, DeployInput::new(REPO).with_target_host(" "))
            .await
            .unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();

        let SagaOutcome::Failed { failure } = handle.result().await else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::Precondition);
        assert_eq!(handle.status(), DeployStatus::Failed);
        assert!(h.deploy.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failing_tests_roll_back_and_end_instance() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default().failing_tests());

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();

        let SagaOutcome::Failed { failure } = handle.result().await else {
            panic!("expected failure");
        };
        assert_eq!(failure.step, "test");
        assert_eq!(failure.kind, FailureKind::Business);
        assert_eq!(h.deploy.call_count("test"), 1);
        assert_eq!(h.deploy.call_count("deploy"), 0);
        assert_eq!(h.deploy.call_count("rollback"), 1);
        assert_eq!(handle.status(), DeployStatus::RolledBack);
        assert_eq!(
            h.deploy.notifications(),
            vec![format!("deploy failed: {}", failure.message)]
        );
        assert!(matches!(
            handle.request_redeploy(test_input()),
            Err(RuntimeError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_failure_is_attached() {
        let h = harness(
            SimulatedInfra::new(),
            SimulatedDeploy::default().failing_deploy().failing_rollback(),
        );

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();

        let SagaOutcome::Failed { failure } = handle.result().await else {
            panic!("expected failure");
        };
        assert_eq!(failure.step, "deploy");
        assert!(failure.needs_manual_intervention());
        assert_eq!(handle.status(), DeployStatus::Failed);
        assert_eq!(h.deploy.call_count("deploy"), 3);
        assert_eq!(h.deploy.call_count("rollback"), 3);
    }

    #[tokio::test]
    async fn test_success_notification_failure_triggers_rollback() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default().failing_notify());

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();

        let SagaOutcome::Failed { failure } = handle.result().await else {
            panic!("expected failure");
        };
        assert_eq!(failure.step, "notify");
        assert_eq!(h.deploy.call_count("rollback"), 1);
        assert_eq!(handle.status(), DeployStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_redeploy_reuses_original_target() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();
        parked(&handle).await;
        let first = handle.details().artifact;

        let accepted = h
            .runtime
            .request_redeploy("cicd-myapp", DeployInput::new(REPO).with_branch("hotfix"))
            .await
            .unwrap();
        assert_eq!(accepted.pending, 1);

        wait_until(&handle, |h| {
            h.snapshot().cycle == 2 && h.lifecycle() == SagaLifecycle::AwaitingSignal
        })
        .await;

        let details = handle.details();
        assert_eq!(details.status, DeployStatus::Completed);
        assert_eq!(details.application_url.as_deref(), Some("http://1.2.3.4:8080"));
        assert_ne!(details.artifact, first);
        assert_eq!(h.deploy.call_count("build"), 2);
    }

    #[tokio::test]
    async fn test_failed_redeploy_keeps_instance_alive() {
        let h = harness(
            SimulatedInfra::new(),
            SimulatedDeploy::default().failing_tests_on_branch("broken"),
        );

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();
        parked(&handle).await;
        let deployed = handle.details().artifact;

        handle
            .request_redeploy(DeployInput::new(REPO).with_branch("broken"))
            .unwrap();
        wait_until(&handle, |h| {
            h.snapshot().cycle == 2 && h.lifecycle() == SagaLifecycle::AwaitingSignal
        })
        .await;

        assert_eq!(handle.status(), DeployStatus::RolledBack);
        assert_eq!(handle.details().artifact, deployed);
        assert_eq!(
            handle.snapshot().failure.map(|f| f.step),
            Some("test".to_string())
        );

        handle.request_redeploy(DeployInput::new(REPO)).unwrap();
        wait_until(&handle, |h| {
            h.snapshot().cycle == 3 && h.lifecycle() == SagaLifecycle::AwaitingSignal
        })
        .await;
        assert_eq!(handle.status(), DeployStatus::Completed);
        assert!(handle.snapshot().failure.is_none());
    }

    #[tokio::test]
    async fn test_failed_tests_keep_live_release() {
        let h = harness(
            SimulatedInfra::new(),
            SimulatedDeploy::default().failing_tests_on_branch("broken"),
        );

        h.runtime
            .start_pipeline(None, test_input().with_commit("aaaa0001"))
            .await
            .unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();
        parked(&handle).await;

        handle
            .request_redeploy(DeployInput::new(REPO).with_commit("bbbb0002"))
            .unwrap();
        wait_until(&handle, |h| {
            h.snapshot().cycle == 2 && h.lifecycle() == SagaLifecycle::AwaitingSignal
        })
        .await;

        handle
            .request_redeploy(
                DeployInput::new(REPO)
                    .with_branch("broken")
                    .with_commit("cccc0003"),
            )
            .unwrap();
        wait_until(&handle, |h| {
            h.snapshot().cycle == 3 && h.lifecycle() == SagaLifecycle::AwaitingSignal
        })
        .await;

        let details = handle.details();
        assert_eq!(details.status, DeployStatus::RolledBack);
        assert_eq!(details.artifact.as_deref(), Some("app-bbbb0002.tar.gz"));
        assert_eq!(h.deploy.live_release("1.2.3.4"), details.artifact);
        assert_eq!(h.deploy.call_count("deploy"), 2);
        assert_eq!(h.deploy.call_count("rollback"), 1);
    }

    #[tokio::test]
    async fn test_rolled_back_redeploy_reports_restored_release() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());

        h.runtime
            .start_pipeline(None, test_input().with_commit("aaaa0001"))
            .await
            .unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();
        parked(&handle).await;

        h.deploy.inject_failures("notify", 3);
        handle
            .request_redeploy(DeployInput::new(REPO).with_commit("bbbb0002"))
            .unwrap();
        wait_until(&handle, |h| {
            h.snapshot().cycle == 2 && h.lifecycle() == SagaLifecycle::AwaitingSignal
        })
        .await;

        let details = handle.details();
        assert_eq!(details.status, DeployStatus::RolledBack);
        assert_eq!(details.artifact.as_deref(), Some("app-aaaa0001.tar.gz"));
        assert_eq!(h.deploy.live_release("1.2.3.4"), details.artifact);
        assert_eq!(
            handle.snapshot().failure.map(|f| f.step),
            Some("notify".to_string())
        );
    }

    #[tokio::test]
    async fn test_cancel_parked_pipeline() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();
        parked(&handle).await;

        h.runtime.cancel("cicd-myapp").await.unwrap();

        let SagaOutcome::Cancelled { failure } = handle.result().await else {
            panic!("expected cancellation");
        };
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.step, "await_redeploy");
        assert_eq!(handle.lifecycle(), SagaLifecycle::Cancelled);
        assert_eq!(h.deploy.call_count("rollback"), 0);
    }

    #[tokio::test]
    async fn test_latest_wins_drops_earlier_request() {
        let h = harness(
            SimulatedInfra::new(),
            SimulatedDeploy::default().with_delay(Duration::from_millis(30)),
        );

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();

        handle
            .request_redeploy(DeployInput::new(REPO).with_commit("aaaa1111"))
            .unwrap();
        handle
            .request_redeploy(DeployInput::new(REPO).with_commit("bbbb2222"))
            .unwrap();

        wait_until(&handle, |h| {
            h.snapshot().cycle == 2 && h.lifecycle() == SagaLifecycle::AwaitingSignal
        })
        .await;

        assert_eq!(handle.details().artifact.as_deref(), Some("app-bbbb2222.tar.gz"));
        assert_eq!(h.deploy.call_count("build"), 2);
    }

    #[tokio::test]
    async fn test_queue_policy_runs_requests_in_order() {
        let h = harness_with_policy(
            SimulatedInfra::new(),
            SimulatedDeploy::default().with_delay(Duration::from_millis(30)),
            crate::runtime::RedeployPolicy::Queue { capacity: 4 },
        );

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();

        handle
            .request_redeploy(DeployInput::new(REPO).with_commit("aaaa1111"))
            .unwrap();
        handle
            .request_redeploy(DeployInput::new(REPO).with_commit("bbbb2222"))
            .unwrap();

        wait_until(&handle, |h| {
            h.snapshot().cycle == 3 && h.lifecycle() == SagaLifecycle::AwaitingSignal
        })
        .await;

        assert_eq!(handle.details().artifact.as_deref(), Some("app-bbbb2222.tar.gz"));
        let notifications = h.deploy.notifications();
        assert!(notifications[1].contains("app-aaaa1111.tar.gz"));
        assert!(notifications[2].contains("app-bbbb2222.tar.gz"));
    }

    #[tokio::test]
    async fn test_shutdown_completes_with_latest_deploy() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());

        h.runtime.start_pipeline(None, test_input()).await.unwrap();
        let handle = h.runtime.pipeline("cicd-myapp").await.unwrap();
        parked(&handle).await;

        h.runtime.shutdown().await;

        let SagaOutcome::Completed { output } = handle.result().await else {
            panic!("expected completion");
        };
        assert_eq!(output["application_url"], "http://1.2.3.4:8080");
        assert_eq!(handle.lifecycle(), SagaLifecycle::Completed);
    }
}
