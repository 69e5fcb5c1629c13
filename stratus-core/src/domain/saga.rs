//! Saga instance domain types
//!
//! Describes a running or finished saga instance independently of which
//! saga it is. The orchestrator persists these records; the client lists them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SagaFailure;

/// Which state machine an instance runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaKind {
    Infra,
    Pipeline,
}

impl SagaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SagaKind::Infra => "infra",
            SagaKind::Pipeline => "pipeline",
        }
    }
}

impl std::fmt::Display for SagaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SagaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "infra" => Ok(SagaKind::Infra),
            "pipeline" => Ok(SagaKind::Pipeline),
            other => Err(format!("unknown saga kind '{}'", other)),
        }
    }
}

/// Where an instance is in its life, as seen by the runtime
///
/// This is separate from the saga's own status: a pipeline can be
/// `COMPLETED` while its lifecycle is `AwaitingSignal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaLifecycle {
    /// Executing steps
    Running,

    /// Parked until a redeploy request arrives
    AwaitingSignal,

    /// Finished with a deliverable
    Completed,

    /// Finished with a failure
    Failed,

    /// Aborted by an operator
    Cancelled,

    /// Known only from a persisted record; the process that ran it is gone
    Orphaned,
}

impl SagaLifecycle {
    /// Whether the instance can still make progress or accept signals
    pub fn is_active(self) -> bool {
        matches!(self, SagaLifecycle::Running | SagaLifecycle::AwaitingSignal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SagaLifecycle::Running => "running",
            SagaLifecycle::AwaitingSignal => "awaiting_signal",
            SagaLifecycle::Completed => "completed",
            SagaLifecycle::Failed => "failed",
            SagaLifecycle::Cancelled => "cancelled",
            SagaLifecycle::Orphaned => "orphaned",
        }
    }
}

impl std::fmt::Display for SagaLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SagaLifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SagaLifecycle::Running),
            "awaiting_signal" => Ok(SagaLifecycle::AwaitingSignal),
            "completed" => Ok(SagaLifecycle::Completed),
            "failed" => Ok(SagaLifecycle::Failed),
            "cancelled" => Ok(SagaLifecycle::Cancelled),
            "orphaned" => Ok(SagaLifecycle::Orphaned),
            other => Err(format!("unknown saga lifecycle '{}'", other)),
        }
    }
}

/// Persisted view of a saga instance
///
/// `status`, `input` and `output` are the saga-specific parts, kept as the
/// JSON form of the saga's own types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub id: String,
    pub kind: SagaKind,
    pub lifecycle: SagaLifecycle,
    pub status: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub failure: Option<SagaFailure>,
    /// Cycles started so far; infra instances run exactly one
    pub cycle: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_activity() {
        assert!(SagaLifecycle::Running.is_active());
        assert!(SagaLifecycle::AwaitingSignal.is_active());
        assert!(!SagaLifecycle::Completed.is_active());
        assert!(!SagaLifecycle::Orphaned.is_active());
    }
}
