//! Saga-agnostic DTOs

use serde::{Deserialize, Serialize};

use crate::error::SagaFailure;

/// Response of the `status` queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport<S> {
    pub id: String,
    pub status: S,
}

/// Final result of a saga instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SagaOutcome {
    /// Still running or parked
    Pending,

    /// Finished with a deliverable (the saga's output type as JSON)
    Completed { output: serde_json::Value },

    /// Finished with the original failure cause
    Failed { failure: SagaFailure },

    /// Aborted by an operator
    Cancelled { failure: SagaFailure },
}

impl SagaOutcome {
    pub fn is_finished(&self) -> bool {
        !matches!(self, SagaOutcome::Pending)
    }
}

/// Acknowledgement of an accepted signal or cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub id: String,
    /// Redeploy requests waiting to be picked up, including this one
    #[serde(default)]
    pub pending: usize,
}
