//! Failure taxonomy
//!
//! Actions and sagas never signal failure through panics or dynamic error
//! types. Every failure carries a [`FailureKind`] so retry and compensation
//! logic can branch on what went wrong rather than on where it came from.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What kind of failure an action or saga step ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A required input was missing; nothing was attempted
    Precondition,

    /// The external system misbehaved (network, cloud API, process spawn)
    Transient,

    /// The invocation did not finish within its timeout
    Timeout,

    /// The work ran correctly and reported a negative outcome
    Business,

    /// The saga was cancelled while waiting on this step
    Cancelled,

    /// A bug or broken invariant inside Stratus itself
    Internal,
}

impl FailureKind {
    /// Whether the step executor may retry an invocation that failed this way
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::Timeout)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Precondition => write!(f, "precondition"),
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Business => write!(f, "business"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Internal => write!(f, "internal"),
        }
    }
}

/// Failure of a single action invocation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} failure: {message}")]
pub struct ActionError {
    pub kind: FailureKind,
    pub message: String,
}

impl ActionError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Business, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Precondition, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// A compensation action (teardown, rollback) that itself failed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("compensation '{action}' failed: {message}")]
pub struct CompensationFailure {
    pub action: String,
    pub message: String,
}

/// Terminal failure of a saga run or pipeline cycle
///
/// `step`, `kind` and `message` always describe the original cause. A failed
/// compensation is attached alongside it, never in its place.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("step '{step}' failed ({kind}): {message}")]
pub struct SagaFailure {
    pub step: String,
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationFailure>,
}

impl SagaFailure {
    /// Wraps the final error of a step after retries were exhausted
    pub fn from_step(step: impl Into<String>, error: ActionError) -> Self {
        Self {
            step: step.into(),
            kind: error.kind,
            message: error.message,
            compensation: None,
        }
    }

    pub fn precondition(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            kind: FailureKind::Precondition,
            message: message.into(),
            compensation: None,
        }
    }

    pub fn with_compensation(mut self, action: impl Into<String>, error: ActionError) -> Self {
        self.compensation = Some(CompensationFailure {
            action: action.into(),
            message: error.message,
        });
        self
    }

    /// True when cleanup could not be completed and an operator has to step in
    pub fn needs_manual_intervention(&self) -> bool {
        self.compensation.is_some()
    }
}

/// Attempted status change that the state machine does not allow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal {machine} transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub machine: &'static str,
    pub from: String,
    pub to: String,
}

impl From<IllegalTransition> for SagaFailure {
    fn from(err: IllegalTransition) -> Self {
        SagaFailure {
            step: "transition".to_string(),
            kind: FailureKind::Internal,
            message: err.to_string(),
            compensation: None,
        }
    }
}
