//! Orchestration runtime
//!
//! Registry of live saga instances. Each instance runs as one tokio task
//! executing its saga sequentially; the registry keeps a handle per instance
//! for queries, signals, cancellation and results. Instances that only exist
//! in the snapshot store (finished in an earlier process, or interrupted by a
//! restart) are still answered from their last persisted snapshot.

pub mod instance;
pub mod mailbox;
pub mod step;

pub use instance::{
    InfraContext, InfraHandle, InstanceHandle, PipelineContext, PipelineHandle, SagaContext,
    SagaHandle, SagaStatus, Snapshot,
};
pub use mailbox::{RedeployMailbox, RedeployPolicy};
pub use step::StepExecutor;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use stratus_actions::{DeployActions, InfraActions};
use stratus_core::domain::deploy::{DeployInput, DeployResult, DeployStatus};
use stratus_core::domain::infra::{InfraInput, InfraOutput, InfraStatus};
use stratus_core::domain::saga::{SagaInstance, SagaKind, SagaLifecycle};
use stratus_core::dto::infra::InfraDetails;
use stratus_core::dto::pipeline::DeployDetails;
use stratus_core::dto::saga::{Accepted, SagaOutcome};
use stratus_core::error::{FailureKind, SagaFailure};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::repository::{SnapshotStore, StoreError};
use crate::saga::infra::{InfraSaga, InfraStepOptions};
use crate::saga::pipeline::{PipelineSaga, PipelineStepOptions};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("saga instance '{0}' not found")]
    NotFound(String),

    #[error("saga instance '{0}' already exists and is still running")]
    AlreadyExists(String),

    #[error("saga instance '{0}' is not running")]
    NotRunning(String),

    #[error("saga instance '{id}' already has {capacity} redeploy requests pending")]
    MailboxFull { id: String, capacity: usize },

    #[error("saga instance '{id}' is a {actual} saga, not a {expected} saga")]
    WrongKind {
        id: String,
        expected: SagaKind,
        actual: SagaKind,
    },

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Step options and signal policy applied to every instance
#[derive(Debug, Clone, Default)]
pub struct RuntimeSettings {
    pub infra_steps: InfraStepOptions,
    pub pipeline_steps: PipelineStepOptions,
    pub redeploy_policy: RedeployPolicy,
}

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    infra_actions: Arc<dyn InfraActions>,
    deploy_actions: Arc<dyn DeployActions>,
    store: Arc<dyn SnapshotStore>,
    settings: RuntimeSettings,
    instances: RwLock<HashMap<String, SagaHandle>>,
}

impl Runtime {
    pub fn new(
        infra_actions: Arc<dyn InfraActions>,
        deploy_actions: Arc<dyn DeployActions>,
        store: Arc<dyn SnapshotStore>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                infra_actions,
                deploy_actions,
                store,
                settings,
                instances: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Marks instances left active by a previous process as orphaned
    ///
    /// Returns how many were marked.
    pub async fn restore(&self) -> Result<usize, RuntimeError> {
        let mut orphaned = 0;

        for mut instance in self.inner.store.list().await? {
            if !instance.lifecycle.is_active() {
                continue;
            }

            warn!(
                "{} {} was {} when the previous process stopped; marking orphaned",
                instance.kind, instance.id, instance.status
            );
            instance.lifecycle = SagaLifecycle::Orphaned;
            instance.failure.get_or_insert_with(|| SagaFailure {
                step: instance.status.to_lowercase(),
                kind: FailureKind::Internal,
                message: "interrupted by an orchestrator restart".to_string(),
                compensation: None,
            });
            instance.updated_at = Utc::now();
            self.inner.store.save(&instance).await?;
            orphaned += 1;
        }

        Ok(orphaned)
    }

    // ========================================================================
    // Starting instances
    // ========================================================================

    /// Starts a provisioning saga; `id` defaults to `infra-{project}-{environment}`
    pub async fn start_infra(
        &self,
        id: Option<String>,
        input: InfraInput,
    ) -> Result<SagaInstance, RuntimeError> {
        let id = resolve_id(id, || input.default_instance_id())?;
        let input_json = to_json(&input)?;

        let (context, handle) = {
            let mut instances = self.inner.instances.write().await;
            ensure_vacant(&instances, &id)?;

            let (context, handle) = instance::new_instance::<InfraStatus, InfraOutput>(
                id.clone(),
                input_json,
                self.inner.store.clone(),
                None,
            );
            instances.insert(id.clone(), SagaHandle::Infra(handle.clone()));
            (context, handle)
        };
        context.set_lifecycle(SagaLifecycle::Running).await;

        let saga = InfraSaga::new(
            self.inner.infra_actions.clone(),
            self.inner.settings.infra_steps.clone(),
        );
        tokio::spawn(async move {
            let result = saga.run(&context, input).await;
            context.finish(result).await;
        });

        info!("Started infra saga {}", id);
        Ok(handle.instance())
    }

    /// Starts a pipeline saga; `id` defaults to `cicd-{repository name}`
    pub async fn start_pipeline(
        &self,
        id: Option<String>,
        input: DeployInput,
    ) -> Result<SagaInstance, RuntimeError> {
        let id = resolve_id(id, || input.default_instance_id())?;
        let input_json = to_json(&input)?;

        let mailbox = Arc::new(RedeployMailbox::new(self.inner.settings.redeploy_policy));
        let (context, handle) = {
            let mut instances = self.inner.instances.write().await;
            ensure_vacant(&instances, &id)?;

            let (context, handle) = instance::new_instance::<DeployStatus, DeployResult>(
                id.clone(),
                input_json,
                self.inner.store.clone(),
                Some(mailbox.clone()),
            );
            instances.insert(id.clone(), SagaHandle::Pipeline(handle.clone()));
            (context, handle)
        };
        context.set_lifecycle(SagaLifecycle::Running).await;

        let saga = PipelineSaga::new(
            self.inner.deploy_actions.clone(),
            self.inner.settings.pipeline_steps.clone(),
        );
        tokio::spawn(async move {
            let result = saga.run(&context, &mailbox, input).await;
            context.finish(result).await;
        });

        info!("Started pipeline saga {}", id);
        Ok(handle.instance())
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Live handle of an instance started by this process
    pub async fn handle(&self, id: &str) -> Result<SagaHandle, RuntimeError> {
        self.inner
            .instances
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    pub async fn infra(&self, id: &str) -> Result<InfraHandle, RuntimeError> {
        match self.handle(id).await? {
            SagaHandle::Infra(handle) => Ok(handle),
            other => Err(wrong_kind(id, SagaKind::Infra, other.kind())),
        }
    }

    pub async fn pipeline(&self, id: &str) -> Result<PipelineHandle, RuntimeError> {
        match self.handle(id).await? {
            SagaHandle::Pipeline(handle) => Ok(handle),
            other => Err(wrong_kind(id, SagaKind::Pipeline, other.kind())),
        }
    }

    /// Snapshot of any known instance, live or persisted
    pub async fn instance(&self, id: &str) -> Result<SagaInstance, RuntimeError> {
        if let Ok(handle) = self.handle(id).await {
            return Ok(handle.instance());
        }

        self.inner
            .store
            .find(id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    /// Every known instance, most recently started first
    pub async fn list(&self) -> Result<Vec<SagaInstance>, RuntimeError> {
        let mut by_id: HashMap<String, SagaInstance> = self
            .inner
            .store
            .list()
            .await?
            .into_iter()
            .map(|instance| (instance.id.clone(), instance))
            .collect();

        for handle in self.inner.instances.read().await.values() {
            by_id.insert(handle.id().to_string(), handle.instance());
        }

        let mut instances: Vec<SagaInstance> = by_id.into_values().collect();
        instances.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(instances)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn infra_details(&self, id: &str) -> Result<InfraDetails, RuntimeError> {
        if let Ok(handle) = self.handle(id).await {
            return match handle {
                SagaHandle::Infra(handle) => Ok(handle.details()),
                other => Err(wrong_kind(id, SagaKind::Infra, other.kind())),
            };
        }

        let stored = self.stored_snapshot::<InfraStatus, InfraOutput>(id).await?;
        Ok(InfraDetails::new(stored.status, stored.output.as_ref()))
    }

    pub async fn pipeline_details(&self, id: &str) -> Result<DeployDetails, RuntimeError> {
        if let Ok(handle) = self.handle(id).await {
            return match handle {
                SagaHandle::Pipeline(handle) => Ok(handle.details()),
                other => Err(wrong_kind(id, SagaKind::Pipeline, other.kind())),
            };
        }

        let stored = self
            .stored_snapshot::<DeployStatus, DeployResult>(id)
            .await?;
        Ok(DeployDetails::new(stored.status, stored.output.as_ref()))
    }

    async fn stored_snapshot<S, O>(&self, id: &str) -> Result<Snapshot<S, O>, RuntimeError>
    where
        S: SagaStatus,
        O: serde::Serialize + serde::de::DeserializeOwned,
    {
        let instance = self
            .inner
            .store
            .find(id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        Snapshot::from_instance(&instance)
    }

    /// Outcome without waiting; `Pending` while the instance is active
    pub async fn outcome(&self, id: &str) -> Result<SagaOutcome, RuntimeError> {
        if let Ok(handle) = self.handle(id).await {
            return Ok(handle.outcome());
        }

        let instance = self.instance(id).await?;
        Ok(instance::stored_outcome(&instance))
    }

    /// Waits for a live instance to finish
    pub async fn wait_outcome(&self, id: &str) -> Result<SagaOutcome, RuntimeError> {
        match self.handle(id).await {
            Ok(handle) => Ok(handle.result().await),
            Err(_) => self.outcome(id).await,
        }
    }

    // ========================================================================
    // Signals
    // ========================================================================

    pub async fn request_redeploy(
        &self,
        id: &str,
        input: DeployInput,
    ) -> Result<Accepted, RuntimeError> {
        let handle = match self.pipeline(id).await {
            Ok(handle) => handle,
            Err(RuntimeError::NotFound(_)) => return Err(self.not_live(id).await),
            Err(e) => return Err(e),
        };

        let pending = handle.request_redeploy(input)?;
        Ok(Accepted {
            id: id.to_string(),
            pending,
        })
    }

    pub async fn cancel(&self, id: &str) -> Result<Accepted, RuntimeError> {
        let handle = match self.handle(id).await {
            Ok(handle) => handle,
            Err(_) => return Err(self.not_live(id).await),
        };

        handle.cancel()?;
        Ok(Accepted {
            id: id.to_string(),
            pending: 0,
        })
    }

    /// `NotRunning` for instances known only from the store, else `NotFound`
    async fn not_live(&self, id: &str) -> RuntimeError {
        match self.inner.store.find(id).await {
            Ok(Some(_)) => RuntimeError::NotRunning(id.to_string()),
            Ok(None) => RuntimeError::NotFound(id.to_string()),
            Err(e) => RuntimeError::Store(e),
        }
    }

    /// Releases parked pipelines so they finish with their last deliverable
    pub async fn shutdown(&self) {
        let instances = self.inner.instances.read().await;
        for handle in instances.values() {
            handle.close_mailbox();
        }
        info!("Runtime shutdown: {} instance(s) released", instances.len());
    }
}

fn resolve_id(id: Option<String>, default: impl FnOnce() -> String) -> Result<String, RuntimeError> {
    let id = id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(default);

    if id.contains('/') || id.chars().any(char::is_whitespace) {
        return Err(RuntimeError::InvalidInput(format!(
            "instance id '{}' may not contain '/' or whitespace",
            id
        )));
    }

    Ok(id)
}

fn ensure_vacant(instances: &HashMap<String, SagaHandle>, id: &str) -> Result<(), RuntimeError> {
    match instances.get(id) {
        Some(existing) if existing.is_active() => {
            Err(RuntimeError::AlreadyExists(id.to_string()))
        }
        _ => Ok(()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, RuntimeError> {
    serde_json::to_value(value).map_err(|e| RuntimeError::Internal(e.to_string()))
}

fn wrong_kind(id: &str, expected: SagaKind, actual: SagaKind) -> RuntimeError {
    RuntimeError::WrongKind {
        id: id.to_string(),
        expected,
        actual,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use stratus_actions::simulated::{SimulatedDeploy, SimulatedInfra};
    use tokio::sync::{Notify, Semaphore};

    use super::*;
    use crate::repository::InMemorySnapshotStore;
    use crate::saga::test_support::harness;

    /// Store whose saves wait until the test lets them through
    struct GatedStore {
        inner: InMemorySnapshotStore,
        entered: Notify,
        gate: Semaphore,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                inner: InMemorySnapshotStore::new(),
                entered: Notify::new(),
                gate: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl SnapshotStore for GatedStore {
        async fn save(&self, instance: &SagaInstance) -> Result<(), StoreError> {
            self.entered.notify_one();
            let _permit = self.gate.acquire().await.unwrap();
            self.inner.save(instance).await
        }

        async fn find(&self, id: &str) -> Result<Option<SagaInstance>, StoreError> {
            self.inner.find(id).await
        }

        async fn list(&self) -> Result<Vec<SagaInstance>, StoreError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn test_lookups_proceed_while_start_persists() {
        let store = Arc::new(GatedStore::new());
        let runtime = Runtime::new(
            Arc::new(SimulatedInfra::new()),
            Arc::new(SimulatedDeploy::default()),
            store.clone(),
            RuntimeSettings {
                infra_steps: InfraStepOptions::immediate(),
                pipeline_steps: PipelineStepOptions::immediate(),
                ..RuntimeSettings::default()
            },
        );

        let starting = tokio::spawn({
            let runtime = runtime.clone();
            async move {
                runtime
                    .start_infra(Some("infra-demo".to_string()), InfraInput::new("demo"))
                    .await
            }
        });
        store.entered.notified().await;

        let handle = tokio::time::timeout(Duration::from_secs(1), runtime.handle("infra-demo"))
            .await
            .expect("lookup blocked behind a snapshot save");
        assert!(handle.is_ok());
        let listed = tokio::time::timeout(Duration::from_secs(1), runtime.list())
            .await
            .expect("list blocked behind a snapshot save")
            .unwrap();
        assert_eq!(listed.len(), 1);

        store.gate.add_permits(1);
        starting.await.unwrap().unwrap();
        let outcome = runtime.wait_outcome("infra-demo").await.unwrap();
        assert!(matches!(outcome, SagaOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_start_does_not_inspect_input_fields() {
        let h = harness(SimulatedInfra::new(), SimulatedDeploy::default());

        let infra = h
            .runtime
            .start_infra(Some("infra-blank".to_string()), InfraInput::new(""))
            .await
            .unwrap();
        assert_eq!(infra.kind, SagaKind::Infra);

        let pipeline = h
            .runtime
            .start_pipeline(
                Some("cicd-blank".to_string()),
                DeployInput::new("").with_target_host("1.2.3.4"),
            )
            .await
            .unwrap();
        assert_eq!(pipeline.kind, SagaKind::Pipeline);
    }

    #[tokio::test]
    async fn test_reserved_id_rejects_concurrent_start() {
        let h = harness(
            SimulatedInfra::new().with_delay(Duration::from_millis(50)),
            SimulatedDeploy::default(),
        );

        let (first, second) = tokio::join!(
            h.runtime.start_infra(Some("infra-x".to_string()), InfraInput::new("x")),
            h.runtime.start_infra(Some("infra-x".to_string()), InfraInput::new("x")),
        );

        assert!(first.is_ok() != second.is_ok());
        assert!(matches!(
            first.err().or(second.err()),
            Some(RuntimeError::AlreadyExists(_))
        ));
    }
}
