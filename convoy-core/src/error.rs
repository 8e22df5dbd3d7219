//! Error taxonomy for pipeline runs
//!
//! Every stage failure is a [`PipelineError`]; its [`ErrorKind`] is what a run
//! records and what callers branch on when deciding whether to retry.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::deploy::RollbackOutcome;

/// Classification of a run failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SourceUnavailable,
    AuthFailed,
    BuildFailed,
    DeployFailed,
    ConcurrentDeployRejected,
    NotificationDeliveryFailed,
    Cancelled,
}

impl ErrorKind {
    /// Whether re-triggering the run later may succeed without a human fix
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::SourceUnavailable
                | ErrorKind::AuthFailed
                | ErrorKind::ConcurrentDeployRejected
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Failure of a pipeline stage
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("registry authentication failed: {0}")]
    AuthFailed(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("deploy failed: {reason} (rollback {rollback})")]
    DeployFailed {
        reason: String,
        rollback: RollbackOutcome,
    },

    #[error("'{0}' rejected: another build or rollout to it is in progress")]
    ConcurrentDeployRejected(String),

    #[error("run cancelled: {0}")]
    Cancelled(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            PipelineError::AuthFailed(_) => ErrorKind::AuthFailed,
            PipelineError::BuildFailed(_) => ErrorKind::BuildFailed,
            PipelineError::DeployFailed { .. } => ErrorKind::DeployFailed,
            PipelineError::ConcurrentDeployRejected(_) => ErrorKind::ConcurrentDeployRejected,
            PipelineError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Rollback outcome carried by a deploy failure
    pub fn rollback(&self) -> Option<&RollbackOutcome> {
        match self {
            PipelineError::DeployFailed { rollback, .. } => Some(rollback),
            _ => None,
        }
    }
}

/// Attempted state change a run does not allow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move run from {from} to {to}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
}
