//! Canonical error type for switch operations.
//!
//! Adapters map this to their own surfaces (HTTP status codes, CLI exit
//! codes). The variant decides both the status code and whether a failure
//! past the disruptive boundary triggers rollback.

use thiserror::Error;

use crate::ports::{GatewayError, OrchestratorError};
use crate::state::StateStoreError;

/// Semantic error for everything the switch engine does.
#[derive(Debug, Error)]
pub enum SwitchError {
    /// Request validation failed before any state was touched.
    #[error("{0}")]
    BadRequest(String),

    /// A preflight check failed (target container not created).
    #[error("{0}")]
    Precondition(String),

    /// The switch lock is held by another pipeline.
    #[error("switch_in_progress")]
    Conflict,

    /// Orchestration or gateway I/O failed.
    #[error("{0}")]
    Transport(String),

    /// A deadline elapsed while waiting on a container or the gateway.
    #[error("{0}")]
    Timeout(String),

    /// A probed container reported a terminal-bad state.
    #[error("{0}")]
    Unhealthy(String),

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl SwitchError {
    /// Errors that terminate a pipeline without rollback and without
    /// touching state, even once a job exists.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::BadRequest(_) | Self::Precondition(_))
    }
}

impl From<OrchestratorError> for SwitchError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Timeout(msg) => Self::Timeout(msg),
            OrchestratorError::Unhealthy(msg) => Self::Unhealthy(msg),
            OrchestratorError::NotFound(msg) | OrchestratorError::Transport(msg) => {
                Self::Transport(msg)
            }
        }
    }
}

impl From<GatewayError> for SwitchError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Auth(msg) => Self::Internal(msg),
            GatewayError::Timeout(msg) => Self::Timeout(msg),
            GatewayError::Transport(msg) => Self::Transport(msg),
        }
    }
}

impl From<StateStoreError> for SwitchError {
    fn from(err: StateStoreError) -> Self {
        Self::Internal(err.to_string())
    }
}
