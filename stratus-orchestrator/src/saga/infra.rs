//! Infrastructure Provisioning Saga
//!
//! PENDING -> INITIALIZING -> PLANNING -> PROVISIONING -> VALIDATING -> READY
//!
//! Any failure settles in FAILED. Once apply has been invoked the saga passes
//! through DESTROYING first and tears the stack down, since apply may have
//! created resources even when it reported failure.

use std::sync::Arc;
use std::time::Duration;

use stratus_actions::InfraActions;
use stratus_core::domain::infra::{InfraInput, InfraOutput, InfraStatus};
use stratus_core::error::{ActionError, SagaFailure};
use stratus_core::retry::{RetryPolicy, StepOptions};
use tracing::{error, info};

use crate::runtime::InfraContext;

/// Per-step timeouts and retry policies
#[derive(Debug, Clone)]
pub struct InfraStepOptions {
    pub init: StepOptions,
    pub plan: StepOptions,
    pub apply: StepOptions,
    pub validate: StepOptions,
    /// Teardown during compensation
    pub destroy: StepOptions,
}

impl Default for InfraStepOptions {
    fn default() -> Self {
        let retry = RetryPolicy::backoff(
            Duration::from_secs(5),
            2.0,
            Duration::from_secs(60),
            3,
        );

        Self {
            init: StepOptions::new(Duration::from_secs(120), retry),
            plan: StepOptions::new(Duration::from_secs(300), retry),
            apply: StepOptions::new(Duration::from_secs(600), retry),
            validate: StepOptions::new(Duration::from_secs(120), retry),
            destroy: StepOptions::new(Duration::from_secs(600), RetryPolicy::fixed_attempts(3)),
        }
    }
}

impl InfraStepOptions {
    /// Short timeouts and retries without delay
    pub fn immediate() -> Self {
        let options = StepOptions::new(Duration::from_secs(5), RetryPolicy::immediate(3));
        Self {
            init: options,
            plan: options,
            apply: options,
            validate: options,
            destroy: options,
        }
    }
}

pub struct InfraSaga {
    actions: Arc<dyn InfraActions>,
    options: InfraStepOptions,
}

impl InfraSaga {
    pub fn new(actions: Arc<dyn InfraActions>, options: InfraStepOptions) -> Self {
        Self { actions, options }
    }

    /// Provisions the stack described by `input`
    pub async fn run(
        &self,
        ctx: &InfraContext,
        input: InfraInput,
    ) -> Result<InfraOutput, SagaFailure> {
        ctx.begin_cycle().await;
        let mut apply_invoked = false;

        match self.provision(ctx, &input, &mut apply_invoked).await {
            Ok(output) => Ok(output),
            Err(failure) => Err(self.fail(ctx, &input, failure, apply_invoked).await),
        }
    }

    async fn provision(
        &self,
        ctx: &InfraContext,
        input: &InfraInput,
        apply_invoked: &mut bool,
    ) -> Result<InfraOutput, SagaFailure> {
        let actions = &self.actions;

        ctx.transition(InfraStatus::Initializing).await?;
        let working_dir = ctx
            .step("init", self.options.init, || actions.init(input))
            .await?;
        info!("{}: terraform initialized in {}", ctx.id(), working_dir);

        ctx.transition(InfraStatus::Planning).await?;
        let plan = ctx
            .step("plan", self.options.plan, || actions.plan(input))
            .await?;
        info!(
            "{}: plan has {} resource(s) to add (changes: {})",
            ctx.id(),
            plan.resources_to_add,
            plan.has_changes
        );

        ctx.transition(InfraStatus::Provisioning).await?;
        *apply_invoked = true;
        let output = ctx
            .step("apply", self.options.apply, || {
                actions.apply(input, &plan.plan_file)
            })
            .await?;

        ctx.transition(InfraStatus::Validating).await?;
        let healthy = ctx
            .step("validate", self.options.validate, || actions.validate(&output))
            .await?;
        if !healthy {
            return Err(SagaFailure::from_step(
                "validate",
                ActionError::business(format!("{} failed health check", output.vm_name)),
            ));
        }

        ctx.transition_with_output(InfraStatus::Ready, output.clone())
            .await?;
        info!("{}: {} ready at {}", ctx.id(), output.vm_name, output.vm_public_ip);

        Ok(output)
    }

    /// Compensates if needed and settles in FAILED; returns the original cause
    async fn fail(
        &self,
        ctx: &InfraContext,
        input: &InfraInput,
        failure: SagaFailure,
        apply_invoked: bool,
    ) -> SagaFailure {
        error!("{}: provisioning failed: {}", ctx.id(), failure);
        let mut failure = failure;

        if apply_invoked {
            if let Err(e) = ctx.transition(InfraStatus::Destroying).await {
                error!("{}: {}", ctx.id(), e);
            }

            let actions = &self.actions;
            match ctx
                .compensate("destroy", self.options.destroy, || actions.destroy(input))
                .await
            {
                Ok(()) => info!("{}: partial stack destroyed", ctx.id()),
                Err(e) => {
                    error!(
                        "{}: destroy failed, manual cleanup required: {}",
                        ctx.id(),
                        e
                    );
                    failure = failure.with_compensation("destroy", e);
                }
            }
        }

        if let Err(e) = ctx.transition(InfraStatus::Failed).await {
            error!("{}: {}", ctx.id(), e);
        }

        failure
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stratus_actions::simulated::{SimulatedDeploy, SimulatedInfra};
    use stratus_core::domain::infra::{InfraInput, InfraStatus};
    use stratus_core::domain::saga::SagaLifecycle;
    use stratus_core::dto::saga::SagaOutcome;
    use stratus_core::error::FailureKind;

    use crate::repository::SnapshotStore;
    use crate::saga::test_support::harness;

    fn test_input() -> InfraInput {
        InfraInput::new("test").with_environment("test")
    }

    fn failure_of(outcome: SagaOutcome) -> stratus_core::error::SagaFailure {
        match outcome {
            SagaOutcome::Failed { failure } | SagaOutcome::Cancelled { failure } => failure,
            other => panic!("expected a failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provisions_and_reports_ready() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());

        let started = h.runtime.start_infra(None, test_input()).await.unwrap();
        assert_eq!(started.id, "infra-test-test");

        let handle = h.runtime.infra("infra-test-test").await.unwrap();
        let outcome = handle.result().await;

        let SagaOutcome::Completed { output } = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(output["vm_name"], "vm-test-test");

        let details = handle.details();
        assert_eq!(details.status, InfraStatus::Ready);
        assert!(details.ready);
        assert_eq!(details.vm_name.as_deref(), Some("vm-test-test"));
        assert_eq!(
            h.infra.calls(),
            vec!["init", "plan", "apply", "validate"]
        );
    }

    #[tokio::test]
    async fn test_unhealthy_vm_is_destroyed() {
        let h = harness(SimulatedInfra::new().unhealthy(), SimulatedDeploy::default());

        h.runtime.start_infra(None, test_input()).await.unwrap();
        let handle = h.runtime.infra("infra-test-test").await.unwrap();
        let failure = failure_of(handle.result().await);

        assert_eq!(failure.step, "validate");
        assert_eq!(failure.kind, FailureKind::Business);
        assert_eq!(failure.message, "vm-test-test failed health check");
        assert!(!failure.needs_manual_intervention());

        assert_eq!(handle.status(), InfraStatus::Failed);
        assert!(!handle.details().ready);
        assert!(handle.details().vm_public_ip.is_none());
        assert_eq!(h.infra.call_count("validate"), 1);
        assert_eq!(h.infra.call_count("destroy"), 1);
        assert!(h.infra.resources().is_empty());
    }

    #[tokio::test]
    async fn test_failed_apply_still_tears_down() {
        let h = harness(SimulatedInfra::new().failing_apply(), SimulatedDeploy::default());

        h.runtime.start_infra(None, test_input()).await.unwrap();
        let handle = h.runtime.infra("infra-test-test").await.unwrap();
        let failure = failure_of(handle.result().await);

        assert_eq!(failure.step, "apply");
        assert_eq!(failure.kind, FailureKind::Transient);
        assert_eq!(h.infra.call_count("apply"), 3);
        assert_eq!(h.infra.call_count("destroy"), 1);
        assert!(h.infra.resources().is_empty());
    }

    #[tokio::test]
    async fn test_failure_before_apply_skips_teardown() {
        let h = harness(
            SimulatedInfra::new().flaky("plan", 10),
            SimulatedDeploy::default(),
        );

        h.runtime.start_infra(None, test_input()).await.unwrap();
        let handle = h.runtime.infra("infra-test-test").await.unwrap();
        let failure = failure_of(handle.result().await);

        assert_eq!(failure.step, "plan");
        assert_eq!(h.infra.call_count("plan"), 3);
        assert_eq!(h.infra.call_count("apply"), 0);
        assert_eq!(h.infra.call_count("destroy"), 0);
        assert_eq!(handle.status(), InfraStatus::Failed);
    }

    #[tokio::test]
    async fn test_transient_init_failures_are_absorbed() {
        let h = harness(
            SimulatedInfra::new().flaky("init", 2),
            SimulatedDeploy::default(),
        );

        h.runtime.start_infra(None, test_input()).await.unwrap();
        let handle = h.runtime.infra("infra-test-test").await.unwrap();

        assert!(matches!(handle.result().await, SagaOutcome::Completed { .. }));
        assert_eq!(h.infra.call_count("init"), 3);
    }

    #[tokio::test]
    async fn test_destroy_failure_keeps_original_cause() {
        let h = harness(
            SimulatedInfra::new().unhealthy().failing_destroy(),
            SimulatedDeploy::default(),
        );

        h.runtime.start_infra(None, test_input()).await.unwrap();
        let handle = h.runtime.infra("infra-test-test").await.unwrap();
        let failure = failure_of(handle.result().await);

        assert_eq!(failure.step, "validate");
        assert!(failure.needs_manual_intervention());
        assert_eq!(
            failure.compensation.as_ref().map(|c| c.action.as_str()),
            Some("destroy")
        );
        assert_eq!(h.infra.call_count("destroy"), 3);
        assert_eq!(handle.status(), InfraStatus::Failed);
        assert_eq!(h.infra.resources().len(), 7);
    }

    #[tokio::test]
    async fn test_cancel_during_apply_compensates() {
        let h = harness(
            SimulatedInfra::new().with_delay(Duration::from_millis(100)),
            SimulatedDeploy::default(),
        );

        h.runtime.start_infra(None, test_input()).await.unwrap();
        let handle = h.runtime.infra("infra-test-test").await.unwrap();

        while handle.status() != InfraStatus::Provisioning {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.cancel().unwrap();

        let outcome = handle.result().await;
        let SagaOutcome::Cancelled { failure } = outcome else {
            panic!("expected cancellation, got {:?}", outcome);
        };
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.step, "apply");
        assert_eq!(h.infra.call_count("destroy"), 1);
        assert_eq!(handle.status(), InfraStatus::Failed);
        assert_eq!(handle.lifecycle(), SagaLifecycle::Cancelled);
    }

    #[tokio::test]
    async fn test_snapshots_are_persisted() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());

        h.runtime.start_infra(None, test_input()).await.unwrap();
        h.runtime
            .infra("infra-test-test")
            .await
            .unwrap()
            .result()
            .await;

        let stored = h.store.find("infra-test-test").await.unwrap().unwrap();
        assert_eq!(stored.status, "READY");
        assert_eq!(stored.lifecycle, SagaLifecycle::Completed);
        assert_eq!(stored.output.unwrap()["vm_public_ip"], "20.185.72.14");
    }

    #[tokio::test]
    async fn test_running_instance_cannot_be_started_twice() {
        let h = harness(
            SimulatedInfra::new().with_delay(Duration::from_millis(50)),
            SimulatedDeploy::default(),
        );

        h.runtime.start_infra(None, test_input()).await.unwrap();
        let second = h.runtime.start_infra(None, test_input()).await;
        assert!(matches!(
            second,
            Err(crate::runtime::RuntimeError::AlreadyExists(_))
        ));
    }
}
