//! Container orchestration port.
//!
//! This port is the engine's only view of the host orchestration surface.
//! Implementations handle transport; the readiness poll is shared logic and
//! lives here as a provided method over `inspect`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Lifecycle state an orchestrator reports for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Restarting,
    Paused,
    Removing,
    Exited,
    Dead,
}

impl ContainerStatus {
    /// Parse an orchestrator status string. Unknown states map to `None`
    /// and are treated as "keep polling".
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "restarting" => Some(Self::Restarting),
            "paused" => Some(Self::Paused),
            "removing" => Some(Self::Removing),
            "exited" => Some(Self::Exited),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    /// States a waited-on container can never leave on its own.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exited | Self::Dead)
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Paused => "paused",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
        }
    }
}

/// Health-probe state, when the container defines a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerHealth {
    Starting,
    Healthy,
    Unhealthy,
}

impl ContainerHealth {
    /// Parse an orchestrator health string; unknown values map to `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "starting" => Some(Self::Starting),
            "healthy" => Some(Self::Healthy),
            "unhealthy" => Some(Self::Unhealthy),
            _ => None,
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Point-in-time view of one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContainerSnapshot {
    pub exists: bool,
    pub status: Option<ContainerStatus>,
    pub health: Option<ContainerHealth>,
}

impl ContainerSnapshot {
    /// Snapshot of a container the orchestrator does not know about.
    #[must_use]
    pub const fn absent() -> Self {
        Self {
            exists: false,
            status: None,
            health: None,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == Some(ContainerStatus::Running)
    }
}

/// Errors surfaced by the orchestration port.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The container does not exist (start only; stop treats 404 as ok).
    #[error("container not found: {0}")]
    NotFound(String),

    /// The transport or the orchestration daemon failed.
    #[error("{0}")]
    Transport(String),

    /// A waited-on container reported a terminal-bad state.
    #[error("{0}")]
    Unhealthy(String),

    /// The readiness deadline elapsed.
    #[error("{0}")]
    Timeout(String),
}

/// Capability set the engine requires from the orchestration surface.
#[async_trait]
pub trait ContainerOrchestrator: Send + Sync {
    /// Inspect a container. A missing container is `Ok(absent)`, not an
    /// error; only transport failures are errors.
    async fn inspect(&self, name: &str) -> Result<ContainerSnapshot, OrchestratorError>;

    /// Start a container. Starting an already-running container is ok.
    async fn start(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Stop a container. Idempotent: already stopped or missing is ok.
    async fn stop(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Poll `inspect` until the container is ready.
    ///
    /// Ready means `health == healthy`, or `status == running` when no
    /// health probe is configured. Fails immediately on `unhealthy`, a
    /// terminal status, or container disappearance; fails with the last
    /// observed status/health when the deadline elapses.
    async fn wait_ready(
        &self,
        name: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Result<(), OrchestratorError> {
        let deadline = Instant::now() + timeout;
        let mut last_status = "unknown";
        let mut last_health = "unknown";

        loop {
            let snap = self.inspect(name).await?;
            if !snap.exists {
                return Err(OrchestratorError::NotFound(format!(
                    "container disappeared while waiting: {name}"
                )));
            }

            if let Some(status) = snap.status {
                last_status = status.as_str();
            }
            if let Some(health) = snap.health {
                last_health = health.as_str();
            }

            match snap.health {
                Some(ContainerHealth::Healthy) => return Ok(()),
                Some(ContainerHealth::Unhealthy) => {
                    return Err(OrchestratorError::Unhealthy(format!(
                        "container unhealthy: {name}"
                    )));
                }
                Some(ContainerHealth::Starting) => {}
                None => {
                    if snap.is_running() {
                        return Ok(());
                    }
                }
            }

            if let Some(status) = snap.status {
                if status.is_terminal() {
                    return Err(OrchestratorError::Unhealthy(format!(
                        "container not running: {name} ({})",
                        status.as_str()
                    )));
                }
            }

            if Instant::now() + poll > deadline {
                return Err(OrchestratorError::Timeout(format!(
                    "timeout waiting healthy for {name} (status={last_status}, health={last_health})"
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }
}
