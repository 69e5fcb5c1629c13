//! Saga definitions
//!
//! The two state machines the runtime executes. A saga only talks to the
//! outside world through its action trait and the context it is given.

pub mod infra;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use stratus_actions::simulated::{SimulatedDeploy, SimulatedInfra};

    use super::infra::InfraStepOptions;
    use super::pipeline::PipelineStepOptions;
    use crate::repository::InMemorySnapshotStore;
    use crate::runtime::{RedeployPolicy, Runtime, RuntimeSettings};

    pub struct Harness {
        pub runtime: Runtime,
        pub infra: Arc<SimulatedInfra>,
        pub deploy: Arc<SimulatedDeploy>,
        pub store: Arc<InMemorySnapshotStore>,
    }

    /// Runtime over simulated actions with zero-delay retries
    pub fn harness(infra: SimulatedInfra, deploy: SimulatedDeploy) -> Harness {
        harness_with_policy(infra, deploy, RedeployPolicy::LatestWins)
    }

    pub fn harness_with_policy(
        infra: SimulatedInfra,
        deploy: SimulatedDeploy,
        redeploy_policy: RedeployPolicy,
    ) -> Harness {
        let infra = Arc::new(infra);
        let deploy = Arc::new(deploy);
        let store = Arc::new(InMemorySnapshotStore::new());

        let runtime = Runtime::new(
            infra.clone(),
            deploy.clone(),
            store.clone(),
            RuntimeSettings {
                infra_steps: InfraStepOptions::immediate(),
                pipeline_steps: PipelineStepOptions::immediate(),
                redeploy_policy,
            },
        );

        Harness {
            runtime,
            infra,
            deploy,
            store,
        }
    }
}
