//! Composite status payloads served by the HTTP surface.
//!
//! The composite view is assembled lock-free from the orchestrator plus
//! short-lived reads of the engine's small locked slots, so callers must
//! tolerate a marginally stale picture.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::Mode;
use crate::job::SwitchJob;
use crate::ports::{ContainerHealth, ContainerSnapshot, ContainerStatus, OrchestratorError};

/// Per-container view, with the inspect error when the orchestrator
/// could not be reached.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerEntry {
    pub exists: bool,
    pub status: Option<ContainerStatus>,
    pub health: Option<ContainerHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ContainerSnapshot> for ContainerEntry {
    fn from(snap: ContainerSnapshot) -> Self {
        Self {
            exists: snap.exists,
            status: snap.status,
            health: snap.health,
            error: None,
        }
    }
}

impl From<&OrchestratorError> for ContainerEntry {
    fn from(err: &OrchestratorError) -> Self {
        Self {
            exists: false,
            status: None,
            health: None,
            error: Some(err.to_string()),
        }
    }
}

/// Lease view derived from the persisted deadline.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseBlock {
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: i64,
    pub expired: bool,
}

impl LeaseBlock {
    #[must_use]
    pub fn at(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining = (expires_at - now).num_seconds();
        Self {
            expires_at,
            remaining_seconds: remaining.max(0),
            expired: remaining <= 0,
        }
    }
}

/// Mode summary nested in the status payload.
#[derive(Debug, Clone, Serialize)]
pub struct ModeBlock {
    pub active: Mode,
    pub default: Mode,
    pub lease: Option<LeaseBlock>,
}

/// Full `GET /status` payload.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub running_models: Vec<String>,
    pub active_model: Option<String>,
    pub active_mode: Mode,
    pub mode: ModeBlock,
    pub containers: BTreeMap<String, ContainerEntry>,
    pub comfyui: ContainerEntry,
    pub litellm: ContainerEntry,
    pub switch_in_progress: bool,
    pub last_error: Option<String>,
    pub last_switch_at: Option<DateTime<Utc>>,
    pub switch: Option<SwitchJob>,
}

/// Mode-scoped subset served by `GET /mode`.
#[derive(Debug, Clone, Serialize)]
pub struct ModePayload {
    pub mode: ModeBlock,
    pub active_mode: Mode,
    pub active_model: Option<String>,
    pub running_models: Vec<String>,
    pub containers: BTreeMap<String, ContainerEntry>,
    pub comfyui: ContainerEntry,
    pub switch_in_progress: bool,
    pub switch: Option<SwitchJob>,
}

impl From<StatusPayload> for ModePayload {
    fn from(status: StatusPayload) -> Self {
        Self {
            mode: status.mode,
            active_mode: status.active_mode,
            active_model: status.active_model,
            running_models: status.running_models,
            containers: status.containers,
            comfyui: status.comfyui,
            switch_in_progress: status.switch_in_progress,
            switch: status.switch,
        }
    }
}

/// `GET /healthz/ready` success payload.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyPayload {
    pub status: &'static str,
    pub active_model: String,
}
