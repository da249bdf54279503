//! Orchestrator error types.

use std::time::Duration;

use thiserror::Error;

use crate::platform::PlatformError;

/// Errors surfaced by deployment operations.
///
/// Benign remote conditions (not-found on delete, already-exists on replay)
/// are absorbed where they occur and never reach this type.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Pre-flight check failed. Nothing was mutated.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("remote call failed: {0}")]
    Remote(#[from] PlatformError),

    /// A convergence poll ran out of time. Remote state may be mid-change.
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout { operation: String, timeout: Duration },

    /// A convergence poll reached a failed terminal state.
    #[error("{operation} failed: {reason}")]
    OperationFailed { operation: String, reason: String },

    #[error("artifact retrieval failed: {0}")]
    Artifact(String),

    #[error("state store error: {0}")]
    State(#[from] cfdeploy_state::StateError),

    #[error("resource {0} is not in state")]
    UnknownResource(String),
}

impl DeployError {
    pub fn is_validation(&self) -> bool {
        matches!(self, DeployError::Validation(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DeployError::Timeout { .. })
    }
}

pub type DeployResult<T> = Result<T, DeployError>;
