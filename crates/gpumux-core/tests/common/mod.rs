//! In-memory fakes for the engine's ports, plus a ready-to-go harness.
//!
//! The fake orchestrator models just enough of a container host: a set of
//! named containers with status/health, scriptable start failures, slow
//! health transitions and an operation log. The fake gateway succeeds for
//! any model unless told otherwise.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use gpumux_core::{
    ActiveStateStore, Config, ContainerHealth, ContainerOrchestrator, ContainerSnapshot,
    ContainerStatus, GatewayError, GatewayProbe, OrchestratorError, SwitchEngine, catalog,
};

#[derive(Debug, Clone)]
struct FakeContainer {
    status: ContainerStatus,
    health: Option<ContainerHealth>,
    has_health_probe: bool,
}

/// Scriptable in-memory container host.
#[derive(Default)]
pub struct FakeDocker {
    containers: Mutex<HashMap<String, FakeContainer>>,
    fail_start: Mutex<HashSet<String>>,
    unhealthy_on_start: Mutex<HashSet<String>>,
    healthy_after: Mutex<HashMap<String, u32>>,
    ops: Mutex<Vec<(String, String)>>,
}

impl FakeDocker {
    /// Host with every catalogue backend, comfyui and litellm created but
    /// stopped.
    pub fn with_catalog(comfy_container: &str) -> Self {
        let docker = Self::default();
        for model in catalog::models() {
            docker.add(model.container, true);
        }
        docker.add(comfy_container, true);
        docker.add(gpumux_core::LITELLM_CONTAINER, false);
        docker
    }

    pub fn add(&self, name: &str, has_health_probe: bool) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            FakeContainer {
                status: ContainerStatus::Exited,
                health: None,
                has_health_probe,
            },
        );
    }

    pub fn remove(&self, name: &str) {
        self.containers.lock().unwrap().remove(name);
    }

    /// Make `start` fail with a transport error for this container.
    pub fn fail_start(&self, name: &str) {
        self.fail_start.lock().unwrap().insert(name.to_string());
    }

    /// Make the container come up unhealthy after the next start.
    pub fn unhealthy_on_start(&self, name: &str) {
        self.unhealthy_on_start
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    /// Make the container report `starting` for the next `polls` inspects
    /// after a start, then flip healthy.
    pub fn healthy_after(&self, name: &str, polls: u32) {
        self.healthy_after
            .lock()
            .unwrap()
            .insert(name.to_string(), polls);
    }

    pub fn running(&self) -> Vec<String> {
        let containers = self.containers.lock().unwrap();
        let mut names: Vec<String> = containers
            .iter()
            .filter(|(_, c)| c.status == ContainerStatus::Running)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn ops(&self) -> Vec<(String, String)> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    fn record(&self, op: &str, name: &str) {
        self.ops
            .lock()
            .unwrap()
            .push((op.to_string(), name.to_string()));
    }
}

#[async_trait]
impl ContainerOrchestrator for FakeDocker {
    async fn inspect(&self, name: &str) -> Result<ContainerSnapshot, OrchestratorError> {
        let mut containers = self.containers.lock().unwrap();
        let Some(container) = containers.get_mut(name) else {
            return Ok(ContainerSnapshot::absent());
        };

        // Tick scripted slow health transitions on observation.
        if container.health == Some(ContainerHealth::Starting) {
            let mut counters = self.healthy_after.lock().unwrap();
            if let Some(left) = counters.get_mut(name) {
                if *left > 0 {
                    *left -= 1;
                } else {
                    counters.remove(name);
                    container.health = Some(ContainerHealth::Healthy);
                }
            } else {
                container.health = Some(ContainerHealth::Healthy);
            }
        }

        Ok(ContainerSnapshot {
            exists: true,
            status: Some(container.status),
            health: container.health,
        })
    }

    async fn start(&self, name: &str) -> Result<(), OrchestratorError> {
        self.record("start", name);
        if self.fail_start.lock().unwrap().contains(name) {
            return Err(OrchestratorError::Transport(format!(
                "injected start failure: {name}"
            )));
        }

        let mut containers = self.containers.lock().unwrap();
        let Some(container) = containers.get_mut(name) else {
            return Err(OrchestratorError::NotFound(format!(
                "container not found: {name}"
            )));
        };
        container.status = ContainerStatus::Running;
        container.health = if !container.has_health_probe {
            None
        } else if self.unhealthy_on_start.lock().unwrap().contains(name) {
            Some(ContainerHealth::Unhealthy)
        } else if self.healthy_after.lock().unwrap().contains_key(name) {
            Some(ContainerHealth::Starting)
        } else {
            Some(ContainerHealth::Healthy)
        };
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), OrchestratorError> {
        self.record("stop", name);
        let mut containers = self.containers.lock().unwrap();
        if let Some(container) = containers.get_mut(name) {
            container.status = ContainerStatus::Exited;
            container.health = None;
        }
        Ok(())
    }
}

/// Gateway probe that accepts every model unless scripted to fail.
#[derive(Default)]
pub struct FakeGateway {
    fail_models: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn fail_for(&self, model: &str) {
        self.fail_models.lock().unwrap().insert(model.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayProbe for FakeGateway {
    async fn wait_model(&self, model: &str, _timeout: Duration) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(model.to_string());
        if self.fail_models.lock().unwrap().contains(model) {
            return Err(GatewayError::Timeout(format!(
                "litellm did not expose model '{model}' in time"
            )));
        }
        Ok(())
    }
}

/// A fresh engine over fake ports and temp directories.
pub struct Harness {
    pub docker: Arc<FakeDocker>,
    pub gateway: Arc<FakeGateway>,
    pub engine: Arc<SwitchEngine>,
    pub store: ActiveStateStore,
    _dirs: (TempDir, TempDir),
}

pub fn fast_config(config_dir: &TempDir, template_dir: &TempDir) -> Config {
    Config {
        config_dir: config_dir.path().to_path_buf(),
        template_dir: template_dir.path().to_path_buf(),
        health_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        litellm_verify_timeout: Duration::from_millis(500),
        litellm_poll_interval: Duration::from_millis(10),
        monitor_poll: Duration::from_millis(50),
        ..Config::default()
    }
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with(tweak: impl FnOnce(&mut Config)) -> Harness {
    let config_dir = TempDir::new().unwrap();
    let template_dir = TempDir::new().unwrap();
    for model in catalog::models() {
        std::fs::write(
            template_dir.path().join(model.template),
            format!("model_list:\n  - model_name: {}\n", model.litellm_model),
        )
        .unwrap();
    }

    let mut config = fast_config(&config_dir, &template_dir);
    tweak(&mut config);

    let docker = Arc::new(FakeDocker::with_catalog(&config.comfy_container));
    let gateway = Arc::new(FakeGateway::default());
    let store = ActiveStateStore::new(config.config_dir.clone(), config.template_dir.clone());
    let engine = SwitchEngine::new(
        config,
        docker.clone() as Arc<dyn ContainerOrchestrator>,
        gateway.clone() as Arc<dyn GatewayProbe>,
    );

    Harness {
        docker,
        gateway,
        engine,
        store,
        _dirs: (config_dir, template_dir),
    }
}
