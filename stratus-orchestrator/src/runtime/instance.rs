//! Saga instances
//!
//! An instance is split in two halves sharing watch channels:
//! - [`SagaContext`]: owned by the saga task, the only writer of the snapshot
//! - [`InstanceHandle`]: cloned into the registry, answers queries, delivers
//!   signals and cancellation, and awaits the outcome

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use stratus_core::domain::deploy::{DeployInput, DeployResult, DeployStatus};
use stratus_core::domain::infra::{InfraOutput, InfraStatus};
use stratus_core::domain::saga::{SagaInstance, SagaKind, SagaLifecycle};
use stratus_core::dto::infra::InfraDetails;
use stratus_core::dto::pipeline::DeployDetails;
use stratus_core::dto::saga::SagaOutcome;
use stratus_core::error::{ActionError, FailureKind, IllegalTransition, SagaFailure};
use stratus_core::retry::StepOptions;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::RuntimeError;
use super::mailbox::RedeployMailbox;
use super::step::StepExecutor;
use crate::repository::SnapshotStore;

// ============================================================================
// Status machines
// ============================================================================

/// A saga's closed status enum
pub trait SagaStatus:
    Copy + Display + Serialize + DeserializeOwned + std::str::FromStr + Send + Sync + 'static
{
    const KIND: SagaKind;
    const INITIAL: Self;

    fn transition_to(self, next: Self) -> Result<Self, IllegalTransition>;
}

impl SagaStatus for InfraStatus {
    const KIND: SagaKind = SagaKind::Infra;
    const INITIAL: Self = InfraStatus::Pending;

    fn transition_to(self, next: Self) -> Result<Self, IllegalTransition> {
        InfraStatus::transition_to(self, next)
    }
}

impl SagaStatus for DeployStatus {
    const KIND: SagaKind = SagaKind::Pipeline;
    const INITIAL: Self = DeployStatus::Pending;

    fn transition_to(self, next: Self) -> Result<Self, IllegalTransition> {
        DeployStatus::transition_to(self, next)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Query view of an instance, replaced as a whole on every change
#[derive(Debug, Clone)]
pub struct Snapshot<S, O> {
    pub status: S,
    pub lifecycle: SagaLifecycle,
    pub output: Option<O>,
    pub failure: Option<SagaFailure>,
    pub cycle: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<S: SagaStatus, O: Serialize + DeserializeOwned> Snapshot<S, O> {
    fn new(status: S) -> Self {
        let now = Utc::now();
        Self {
            status,
            lifecycle: SagaLifecycle::Running,
            output: None,
            failure: None,
            cycle: 0,
            started_at: now,
            updated_at: now,
        }
    }

    fn to_instance(&self, id: &str, input: &serde_json::Value) -> SagaInstance {
        SagaInstance {
            id: id.to_string(),
            kind: S::KIND,
            lifecycle: self.lifecycle,
            status: self.status.to_string(),
            input: input.clone(),
            output: self
                .output
                .as_ref()
                .and_then(|output| serde_json::to_value(output).ok()),
            failure: self.failure.clone(),
            cycle: self.cycle,
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }

    /// Rebuilds a snapshot from a persisted record
    pub fn from_instance(instance: &SagaInstance) -> Result<Self, RuntimeError> {
        if instance.kind != S::KIND {
            return Err(RuntimeError::WrongKind {
                id: instance.id.clone(),
                expected: S::KIND,
                actual: instance.kind,
            });
        }

        let status = instance.status.parse::<S>().map_err(|_| {
            RuntimeError::Internal(format!(
                "instance '{}' has unknown status '{}'",
                instance.id, instance.status
            ))
        })?;
        let output = instance
            .output
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                RuntimeError::Internal(format!(
                    "instance '{}' has unreadable output: {}",
                    instance.id, e
                ))
            })?;

        Ok(Self {
            status,
            lifecycle: instance.lifecycle,
            output,
            failure: instance.failure.clone(),
            cycle: instance.cycle,
            started_at: instance.started_at,
            updated_at: instance.updated_at,
        })
    }
}

/// Outcome implied by a persisted record
pub fn stored_outcome(instance: &SagaInstance) -> SagaOutcome {
    let failure = || {
        instance.failure.clone().unwrap_or_else(|| SagaFailure {
            step: "unknown".to_string(),
            kind: FailureKind::Internal,
            message: "no failure recorded".to_string(),
            compensation: None,
        })
    };

    match instance.lifecycle {
        SagaLifecycle::Running | SagaLifecycle::AwaitingSignal => SagaOutcome::Pending,
        SagaLifecycle::Completed => SagaOutcome::Completed {
            output: instance.output.clone().unwrap_or(serde_json::Value::Null),
        },
        SagaLifecycle::Cancelled => SagaOutcome::Cancelled { failure: failure() },
        SagaLifecycle::Failed | SagaLifecycle::Orphaned => SagaOutcome::Failed { failure: failure() },
    }
}

// ============================================================================
// Context (writer side)
// ============================================================================

/// Everything a running saga needs from the runtime
pub struct SagaContext<S, O> {
    id: String,
    /// Fresh for every start, so a reused id never repeats a run
    run_id: Uuid,
    input: Arc<serde_json::Value>,
    snapshot: watch::Sender<Snapshot<S, O>>,
    outcome: watch::Sender<Option<SagaOutcome>>,
    steps: StepExecutor,
    store: Arc<dyn SnapshotStore>,
}

pub type InfraContext = SagaContext<InfraStatus, InfraOutput>;
pub type PipelineContext = SagaContext<DeployStatus, DeployResult>;

impl<S, O> SagaContext<S, O>
where
    S: SagaStatus,
    O: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn status(&self) -> S {
        self.snapshot.borrow().status
    }

    pub fn output(&self) -> Option<O> {
        self.snapshot.borrow().output.clone()
    }

    pub fn cycle(&self) -> u32 {
        self.snapshot.borrow().cycle
    }

    pub fn steps(&self) -> &StepExecutor {
        &self.steps
    }

    /// Moves to `next` if the state machine allows it
    pub async fn transition(&self, next: S) -> Result<(), SagaFailure> {
        self.transition_inner(next, None).await
    }

    /// Moves to `next` and publishes `output` in the same snapshot
    pub async fn transition_with_output(&self, next: S, output: O) -> Result<(), SagaFailure> {
        self.transition_inner(next, Some(output)).await
    }

    async fn transition_inner(&self, next: S, output: Option<O>) -> Result<(), SagaFailure> {
        let current = self.status();
        let next = current.transition_to(next)?;

        info!("{} {}: {} -> {}", S::KIND, self.id, current, next);
        self.snapshot.send_modify(|snapshot| {
            snapshot.status = next;
            if output.is_some() {
                snapshot.output = output;
            }
            snapshot.updated_at = Utc::now();
        });

        self.persist().await;
        Ok(())
    }

    pub async fn set_lifecycle(&self, lifecycle: SagaLifecycle) {
        self.modify(|snapshot| snapshot.lifecycle = lifecycle).await;
    }

    /// Starts a new cycle and returns its 1-based number
    pub async fn begin_cycle(&self) -> u32 {
        self.modify(|snapshot| {
            snapshot.cycle += 1;
            snapshot.failure = None;
        })
        .await;
        self.cycle()
    }

    /// Puts back the deliverable a compensated cycle replaced
    pub async fn restore_output(&self, output: Option<O>) {
        self.modify(|snapshot| snapshot.output = output).await;
    }

    /// Records a failure that did not end the instance
    pub async fn record_failure(&self, failure: SagaFailure) {
        self.modify(|snapshot| snapshot.failure = Some(failure)).await;
    }

    async fn modify(&self, change: impl FnOnce(&mut Snapshot<S, O>)) {
        self.snapshot.send_modify(|snapshot| {
            change(snapshot);
            snapshot.updated_at = Utc::now();
        });
        self.persist().await;
    }

    /// Runs a forward step; its final error becomes the saga failure
    pub async fn step<T, F, Fut>(
        &self,
        name: &str,
        options: StepOptions,
        invoke: F,
    ) -> Result<T, SagaFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        self.steps
            .run(name, options, invoke)
            .await
            .map_err(|error| SagaFailure::from_step(name, error))
    }

    /// Runs a compensation step; cancellation does not interrupt it
    pub async fn compensate<T, F, Fut>(
        &self,
        name: &str,
        options: StepOptions,
        invoke: F,
    ) -> Result<T, ActionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        self.steps.run_to_completion(name, options, invoke).await
    }

    async fn persist(&self) {
        let instance = self.snapshot.borrow().to_instance(&self.id, &self.input);
        if let Err(e) = self.store.save(&instance).await {
            warn!("Failed to persist snapshot of {}: {}", self.id, e);
        }
    }

    /// Settles the instance with the saga's return value
    pub async fn finish(self, result: Result<O, SagaFailure>) {
        let outcome = match &result {
            Ok(output) => SagaOutcome::Completed {
                output: serde_json::to_value(output).unwrap_or(serde_json::Value::Null),
            },
            Err(failure) if failure.kind == FailureKind::Cancelled => SagaOutcome::Cancelled {
                failure: failure.clone(),
            },
            Err(failure) => SagaOutcome::Failed {
                failure: failure.clone(),
            },
        };

        let lifecycle = match &outcome {
            SagaOutcome::Completed { .. } => SagaLifecycle::Completed,
            SagaOutcome::Cancelled { .. } => SagaLifecycle::Cancelled,
            _ => SagaLifecycle::Failed,
        };

        match &result {
            Ok(_) => info!("{} {} completed", S::KIND, self.id),
            Err(failure) => warn!("{} {} ended: {}", S::KIND, self.id, failure),
        }

        self.modify(|snapshot| {
            snapshot.lifecycle = lifecycle;
            if let Err(failure) = result {
                snapshot.failure = Some(failure);
            }
        })
        .await;

        self.outcome.send_replace(Some(outcome));
    }
}

// ============================================================================
// Handle (reader side)
// ============================================================================

#[derive(Clone)]
pub struct InstanceHandle<S, O> {
    id: String,
    input: Arc<serde_json::Value>,
    snapshot: watch::Receiver<Snapshot<S, O>>,
    outcome: watch::Receiver<Option<SagaOutcome>>,
    cancel: Arc<watch::Sender<bool>>,
    mailbox: Option<Arc<RedeployMailbox>>,
}

pub type InfraHandle = InstanceHandle<InfraStatus, InfraOutput>;
pub type PipelineHandle = InstanceHandle<DeployStatus, DeployResult>;

/// Creates both halves of a new instance
pub(crate) fn new_instance<S, O>(
    id: String,
    input: serde_json::Value,
    store: Arc<dyn SnapshotStore>,
    mailbox: Option<Arc<RedeployMailbox>>,
) -> (SagaContext<S, O>, InstanceHandle<S, O>)
where
    S: SagaStatus,
    O: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let input = Arc::new(input);
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::new(S::INITIAL));
    let (outcome_tx, outcome_rx) = watch::channel(None);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let context = SagaContext {
        id: id.clone(),
        run_id: Uuid::new_v4(),
        input: input.clone(),
        snapshot: snapshot_tx,
        outcome: outcome_tx,
        steps: StepExecutor::new(cancel_rx),
        store,
    };

    let handle = InstanceHandle {
        id,
        input,
        snapshot: snapshot_rx,
        outcome: outcome_rx,
        cancel: Arc::new(cancel_tx),
        mailbox,
    };

    (context, handle)
}

impl<S, O> InstanceHandle<S, O>
where
    S: SagaStatus,
    O: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> Snapshot<S, O> {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> S {
        self.snapshot.borrow().status
    }

    pub fn lifecycle(&self) -> SagaLifecycle {
        self.snapshot.borrow().lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle().is_active()
    }

    pub fn instance(&self) -> SagaInstance {
        self.snapshot.borrow().to_instance(&self.id, &self.input)
    }

    /// Asks the saga to abort at its next suspension point
    pub fn cancel(&self) -> Result<(), RuntimeError> {
        if !self.is_active() {
            return Err(RuntimeError::NotRunning(self.id.clone()));
        }

        info!("Cancellation requested for {}", self.id);
        self.cancel.send_replace(true);
        Ok(())
    }

    /// Current outcome without waiting
    pub fn outcome(&self) -> SagaOutcome {
        self.outcome.borrow().clone().unwrap_or(SagaOutcome::Pending)
    }

    /// Waits for the saga to finish
    pub async fn result(&self) -> SagaOutcome {
        let mut outcome = self.outcome.clone();
        let settled = outcome
            .wait_for(Option::is_some)
            .await
            .map(|value| value.clone());

        match settled {
            Ok(Some(outcome)) => outcome,
            _ => SagaOutcome::Failed {
                failure: SagaFailure {
                    step: "runtime".to_string(),
                    kind: FailureKind::Internal,
                    message: format!("saga task for '{}' ended without an outcome", self.id),
                    compensation: None,
                },
            },
        }
    }

    /// Stops a parked instance from waiting for further signals
    pub fn close_mailbox(&self) {
        if let Some(mailbox) = &self.mailbox {
            mailbox.close();
        }
    }
}

impl InfraHandle {
    pub fn details(&self) -> InfraDetails {
        let snapshot = self.snapshot.borrow();
        InfraDetails::new(snapshot.status, snapshot.output.as_ref())
    }
}

impl PipelineHandle {
    pub fn details(&self) -> DeployDetails {
        let snapshot = self.snapshot.borrow();
        DeployDetails::new(snapshot.status, snapshot.output.as_ref())
    }

    /// Delivers a redeploy request; returns how many are now waiting
    pub fn request_redeploy(&self, input: DeployInput) -> Result<usize, RuntimeError> {
        if !self.is_active() {
            return Err(RuntimeError::NotRunning(self.id.clone()));
        }

        let mailbox = self
            .mailbox
            .as_ref()
            .ok_or_else(|| RuntimeError::Internal(format!("{} has no mailbox", self.id)))?;

        let pending = mailbox.push(input).map_err(|full| RuntimeError::MailboxFull {
            id: self.id.clone(),
            capacity: full.capacity,
        })?;

        info!("Redeploy requested for {} ({} pending)", self.id, pending);
        Ok(pending)
    }
}

/// A live instance of either saga
#[derive(Clone)]
pub enum SagaHandle {
    Infra(InfraHandle),
    Pipeline(PipelineHandle),
}

impl SagaHandle {
    pub fn id(&self) -> &str {
        match self {
            SagaHandle::Infra(handle) => handle.id(),
            SagaHandle::Pipeline(handle) => handle.id(),
        }
    }

    pub fn kind(&self) -> SagaKind {
        match self {
            SagaHandle::Infra(_) => SagaKind::Infra,
            SagaHandle::Pipeline(_) => SagaKind::Pipeline,
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            SagaHandle::Infra(handle) => handle.is_active(),
            SagaHandle::Pipeline(handle) => handle.is_active(),
        }
    }

    pub fn instance(&self) -> SagaInstance {
        match self {
            SagaHandle::Infra(handle) => handle.instance(),
            SagaHandle::Pipeline(handle) => handle.instance(),
        }
    }

    pub fn cancel(&self) -> Result<(), RuntimeError> {
        match self {
            SagaHandle::Infra(handle) => handle.cancel(),
            SagaHandle::Pipeline(handle) => handle.cancel(),
        }
    }

    pub fn outcome(&self) -> SagaOutcome {
        match self {
            SagaHandle::Infra(handle) => handle.outcome(),
            SagaHandle::Pipeline(handle) => handle.outcome(),
        }
    }

    pub async fn result(&self) -> SagaOutcome {
        match self {
            SagaHandle::Infra(handle) => handle.result().await,
            SagaHandle::Pipeline(handle) => handle.result().await,
        }
    }

    pub fn close_mailbox(&self) {
        if let SagaHandle::Pipeline(handle) = self {
            handle.close_mailbox();
        }
    }
}
