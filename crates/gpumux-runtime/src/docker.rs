//! Docker Engine API adapter for the orchestration port.
//!
//! Talks to a docker-socket-proxy over plain HTTP. Only three endpoints
//! are used: container inspect, start and stop. Stop treats 404 and 304 as
//! success so teardown sweeps stay idempotent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use gpumux_core::{
    ContainerHealth, ContainerOrchestrator, ContainerSnapshot, ContainerStatus, OrchestratorError,
};

/// Orchestrator adapter over the Docker Engine REST API.
#[derive(Debug, Clone)]
pub struct DockerOrchestrator {
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl DockerOrchestrator {
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            timeout,
        }
    }

    async fn request(&self, method: Method, path: &str) -> Result<Response, OrchestratorError> {
        let url = format!("{}{path}", self.base_url);
        self.client
            .request(method, &url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| OrchestratorError::Transport(err.to_string()))
    }
}

/// Subset of the inspect payload the engine cares about.
#[derive(Debug, Default, Deserialize)]
struct InspectBody {
    #[serde(rename = "State", default)]
    state: StateBody,
}

#[derive(Debug, Default, Deserialize)]
struct StateBody {
    #[serde(rename = "Status")]
    status: Option<String>,
    #[serde(rename = "Health")]
    health: Option<HealthBody>,
}

#[derive(Debug, Default, Deserialize)]
struct HealthBody {
    #[serde(rename = "Status")]
    status: Option<String>,
}

fn snapshot_from(body: &InspectBody) -> ContainerSnapshot {
    ContainerSnapshot {
        exists: true,
        status: body
            .state
            .status
            .as_deref()
            .and_then(ContainerStatus::parse),
        health: body
            .state
            .health
            .as_ref()
            .and_then(|h| h.status.as_deref())
            .and_then(ContainerHealth::parse),
    }
}

#[async_trait]
impl ContainerOrchestrator for DockerOrchestrator {
    async fn inspect(&self, name: &str) -> Result<ContainerSnapshot, OrchestratorError> {
        let resp = self
            .request(Method::GET, &format!("/containers/{name}/json"))
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(ContainerSnapshot::absent());
        }
        if resp.status().is_client_error() || resp.status().is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OrchestratorError::Transport(format!("docker error: {text}")));
        }

        let body: InspectBody = resp
            .json()
            .await
            .map_err(|err| OrchestratorError::Transport(err.to_string()))?;
        Ok(snapshot_from(&body))
    }

    async fn start(&self, name: &str) -> Result<(), OrchestratorError> {
        debug!(container = name, "starting container");
        let resp = self
            .request(Method::POST, &format!("/containers/{name}/start"))
            .await?;

        let status = resp.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            return Err(OrchestratorError::NotFound(format!(
                "container not found: {name}"
            )));
        }
        let text = resp.text().await.unwrap_or_default();
        Err(OrchestratorError::Transport(format!("docker error: {text}")))
    }

    async fn stop(&self, name: &str) -> Result<(), OrchestratorError> {
        debug!(container = name, "stopping container");
        let resp = self
            .request(Method::POST, &format!("/containers/{name}/stop"))
            .await?;

        // Already stopped or already gone both count as stopped.
        let status = resp.status();
        if status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
            || status == StatusCode::NOT_FOUND
        {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(OrchestratorError::Transport(format!("docker error: {text}")))
    }
}
