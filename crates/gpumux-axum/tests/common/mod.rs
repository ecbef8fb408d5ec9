//! Test wiring: the router over an in-memory container host and a
//! permissive gateway probe, plus request helpers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use gpumux_axum::AxumContext;
use gpumux_axum::create_router;
use gpumux_core::{
    Config, ContainerHealth, ContainerOrchestrator, ContainerSnapshot, ContainerStatus,
    GatewayError, GatewayProbe, OrchestratorError, SwitchEngine, catalog,
};

pub const TOKEN: &str = "test-admin-token";

/// Minimal scriptable container host.
#[derive(Default)]
pub struct FakeHost {
    containers: Mutex<HashMap<String, (ContainerStatus, Option<ContainerHealth>)>>,
    fail_start: Mutex<HashSet<String>>,
    slow_polls: Mutex<HashMap<String, u32>>,
}

impl FakeHost {
    pub fn with_catalog(comfy_container: &str) -> Self {
        let host = Self::default();
        {
            let mut containers = host.containers.lock().unwrap();
            for model in catalog::models() {
                containers.insert(model.container.to_string(), (ContainerStatus::Exited, None));
            }
            containers.insert(comfy_container.to_string(), (ContainerStatus::Exited, None));
            containers.insert(
                gpumux_core::LITELLM_CONTAINER.to_string(),
                (ContainerStatus::Exited, None),
            );
        }
        host
    }

    pub fn fail_start(&self, name: &str) {
        self.fail_start.lock().unwrap().insert(name.to_string());
    }

    /// Keep the container in `starting` for the next `polls` inspects.
    pub fn slow_start(&self, name: &str, polls: u32) {
        self.slow_polls.lock().unwrap().insert(name.to_string(), polls);
    }

    /// Forget a container entirely, as if it was never created.
    pub fn remove_container(&self, name: &str) {
        self.containers.lock().unwrap().remove(name);
    }

    pub fn running(&self) -> Vec<String> {
        let containers = self.containers.lock().unwrap();
        let mut names: Vec<String> = containers
            .iter()
            .filter(|(_, (status, _))| *status == ContainerStatus::Running)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ContainerOrchestrator for FakeHost {
    async fn inspect(&self, name: &str) -> Result<ContainerSnapshot, OrchestratorError> {
        let mut containers = self.containers.lock().unwrap();
        let Some((status, health)) = containers.get_mut(name) else {
            return Ok(ContainerSnapshot::absent());
        };
        if *health == Some(ContainerHealth::Starting) {
            let mut slow = self.slow_polls.lock().unwrap();
            match slow.get_mut(name) {
                Some(left) if *left > 0 => *left -= 1,
                _ => {
                    slow.remove(name);
                    *health = Some(ContainerHealth::Healthy);
                }
            }
        }
        Ok(ContainerSnapshot {
            exists: true,
            status: Some(*status),
            health: *health,
        })
    }

    async fn start(&self, name: &str) -> Result<(), OrchestratorError> {
        if self.fail_start.lock().unwrap().contains(name) {
            return Err(OrchestratorError::Transport(format!(
                "injected start failure: {name}"
            )));
        }
        let mut containers = self.containers.lock().unwrap();
        let Some(entry) = containers.get_mut(name) else {
            return Err(OrchestratorError::NotFound(format!(
                "container not found: {name}"
            )));
        };
        let slow = self.slow_polls.lock().unwrap().contains_key(name);
        *entry = (
            ContainerStatus::Running,
            Some(if slow {
                ContainerHealth::Starting
            } else {
                ContainerHealth::Healthy
            }),
        );
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), OrchestratorError> {
        if let Some(entry) = self.containers.lock().unwrap().get_mut(name) {
            *entry = (ContainerStatus::Exited, None);
        }
        Ok(())
    }
}

/// Gateway probe that reports every model as wired in.
pub struct AlwaysWired;

#[async_trait]
impl GatewayProbe for AlwaysWired {
    async fn wait_model(&self, _model: &str, _timeout: Duration) -> Result<(), GatewayError> {
        Ok(())
    }
}

pub struct TestApp {
    pub app: Router,
    pub host: Arc<FakeHost>,
    pub engine: Arc<SwitchEngine>,
    _dirs: (TempDir, TempDir),
}

pub fn test_app() -> TestApp {
    test_app_with(|_| {})
}

pub fn test_app_with(tweak: impl FnOnce(&mut Config)) -> TestApp {
    let config_dir = TempDir::new().unwrap();
    let template_dir = TempDir::new().unwrap();
    for model in catalog::models() {
        std::fs::write(
            template_dir.path().join(model.template),
            format!("model_list:\n  - model_name: {}\n", model.litellm_model),
        )
        .unwrap();
    }

    let mut config = Config {
        admin_token: TOKEN.to_string(),
        config_dir: config_dir.path().to_path_buf(),
        template_dir: template_dir.path().to_path_buf(),
        health_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        litellm_verify_timeout: Duration::from_millis(500),
        litellm_poll_interval: Duration::from_millis(10),
        rate_limit_per_minute: 0,
        ..Config::default()
    };
    tweak(&mut config);

    let host = Arc::new(FakeHost::with_catalog(&config.comfy_container));
    let ctx = AxumContext::new(
        config,
        host.clone() as Arc<dyn ContainerOrchestrator>,
        Arc::new(AlwaysWired) as Arc<dyn GatewayProbe>,
    );
    let engine = ctx.engine.clone();
    let app = create_router(ctx);

    TestApp {
        app,
        host,
        engine,
        _dirs: (config_dir, template_dir),
    }
}

/// Fire one request and return (status, parsed JSON body).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}
