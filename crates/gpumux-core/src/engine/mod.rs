//! The switch engine: mutually-exclusive mode/model transitions with a
//! live progress view.
//!
//! One engine object owns all shared state (no process globals):
//!
//! - the switch gate, a one-permit semaphore serialising pipelines;
//!   acquisition is always non-blocking and the permit travels into the
//!   pipeline task, so it is released on every exit path;
//! - the current-job slot, read only as deep-copy snapshots;
//! - the `last_error` / `last_switch_at` slots;
//! - the active-state store, which only pipeline code mutates, and only
//!   while holding a gate permit.
//!
//! The in-memory locks are plain mutexes, taken only to touch small fields
//! and released before any I/O.

mod pipeline;
mod status;

pub use status::{ContainerEntry, LeaseBlock, ModeBlock, ModePayload, ReadyPayload, StatusPayload};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::audit::{AuditLog, AuditRecord};
use crate::catalog::{self, LITELLM_CONTAINER, Mode, ModelSpec};
use crate::config::Config;
use crate::error::SwitchError;
use crate::job::{JobState, StepRecord, SwitchJob};
use crate::monitor::{self, MonitorHandle};
use crate::ports::{ContainerOrchestrator, GatewayProbe};
use crate::state::ActiveStateStore;
use pipeline::{COMFY_PIPELINE, LLM_PIPELINE, Step, StepFlow};

/// A switch request, as received from the HTTP surface.
///
/// `mode` stays a string here so an unknown enumerator is a validation
/// failure (400) rather than a deserialization error.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchRequest {
    pub mode: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub ttl_minutes: Option<i64>,
    #[serde(default)]
    pub wait_for_ready: bool,
}

impl SwitchRequest {
    /// Request for an LLM switch (the legacy `/switch` endpoint).
    #[must_use]
    pub fn llm(model: impl Into<String>, wait_for_ready: bool) -> Self {
        Self {
            mode: Mode::Llm.as_str().to_string(),
            model: Some(model.into()),
            ttl_minutes: None,
            wait_for_ready,
        }
    }
}

/// Terminal result of a pipeline that ran on the caller's task.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchReport {
    pub status: JobState,
    pub switch_id: u64,
    pub from_model: Option<String>,
    pub to_model: String,
    pub steps: Vec<StepRecord>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// 202-style acceptance for asynchronous switches.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchAccepted {
    pub status: &'static str,
    pub switch_id: u64,
    pub to_model: String,
    pub state_text: String,
    pub poll_endpoint: &'static str,
}

/// What a `switch` call produced.
#[derive(Debug, Clone)]
pub enum SwitchOutcome {
    /// The pipeline ran to a terminal state on this task.
    Completed(SwitchReport),
    /// The pipeline runs (or was already running) in the background.
    Accepted(SwitchAccepted),
}

/// Validated switch target.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target {
    Llm(&'static ModelSpec),
    Comfy { ttl: Duration },
}

impl Target {
    fn to_model(self) -> String {
        match self {
            Self::Llm(spec) => spec.id.to_string(),
            Self::Comfy { .. } => "mode:comfy".to_string(),
        }
    }
}

/// `last_error` / `last_switch_at` slots.
#[derive(Debug, Default)]
struct RuntimeState {
    last_error: Option<String>,
    last_switch_at: Option<DateTime<Utc>>,
}

/// Everything a pipeline run needs: the target, the state observed before
/// any mutation (for noop/renewal detection and rollback), and whether the
/// disruptive boundary has been crossed.
struct PipelineCx {
    job_id: u64,
    target: Target,
    prior_mode: Mode,
    from_model: Option<String>,
    running_before: Vec<String>,
    comfy_running: bool,
    previous_config: Option<String>,
    previous_model: Option<String>,
    lease_until: Option<DateTime<Utc>>,
    disruptive: bool,
}

impl PipelineCx {
    fn llm_spec(&self) -> Result<&'static ModelSpec, SwitchError> {
        match self.target {
            Target::Llm(spec) => Ok(spec),
            Target::Comfy { .. } => Err(SwitchError::Internal(
                "pipeline step requires an llm target".to_string(),
            )),
        }
    }
}

/// The mode-and-model switch engine.
pub struct SwitchEngine {
    // Handle to ourselves for background pipeline tasks and the monitor.
    self_ref: Weak<Self>,
    config: Config,
    orchestrator: Arc<dyn ContainerOrchestrator>,
    gateway: Arc<dyn GatewayProbe>,
    store: ActiveStateStore,
    audit: Option<AuditLog>,
    switch_gate: Arc<Semaphore>,
    runtime: Mutex<RuntimeState>,
    job: Mutex<Option<SwitchJob>>,
    next_switch_id: AtomicU64,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl SwitchEngine {
    #[must_use]
    pub fn new(
        config: Config,
        orchestrator: Arc<dyn ContainerOrchestrator>,
        gateway: Arc<dyn GatewayProbe>,
    ) -> Arc<Self> {
        let store = ActiveStateStore::new(&config.config_dir, &config.template_dir);
        let audit = config.audit_file.clone().map(AuditLog::new);
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            config,
            orchestrator,
            gateway,
            store,
            audit,
            switch_gate: Arc::new(Semaphore::new(1)),
            runtime: Mutex::new(RuntimeState::default()),
            job: Mutex::new(None),
            next_switch_id: AtomicU64::new(0),
            monitor: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether a pipeline currently holds the switch gate.
    #[must_use]
    pub fn switch_in_progress(&self) -> bool {
        self.switch_gate.available_permits() == 0
    }

    /// Snapshot of the ongoing or most recent job.
    #[must_use]
    pub fn current_switch(&self) -> Option<SwitchJob> {
        self.job
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(SwitchJob::snapshot)
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Drive a mode/model switch.
    ///
    /// Validation happens before the gate is taken; a busy gate yields
    /// `Conflict` on the synchronous path and an `in_progress` acceptance
    /// on the asynchronous one.
    pub async fn switch(&self, req: SwitchRequest) -> Result<SwitchOutcome, SwitchError> {
        let target = self.plan(&req).await?;
        self.dispatch(target, req.wait_for_ready, None).await
    }

    /// Force-return to the default LLM, preempting a comfy lease. Always
    /// synchronous.
    pub async fn release(&self) -> Result<SwitchReport, SwitchError> {
        let spec = catalog::find_model(&self.config.default_model).ok_or_else(|| {
            SwitchError::Internal(format!(
                "default model is not in the catalogue: {}",
                self.config.default_model
            ))
        })?;
        match self.dispatch(Target::Llm(spec), true, Some("release")).await? {
            SwitchOutcome::Completed(report) => Ok(report),
            SwitchOutcome::Accepted(_) => Err(SwitchError::Internal(
                "synchronous switch returned an acceptance".to_string(),
            )),
        }
    }

    /// Stop every backend and ComfyUI, settle on `mode=llm`, clear the
    /// lease. Serialised with pipelines by the same gate.
    pub async fn stop_all(&self) -> Result<(), SwitchError> {
        let _permit = self
            .switch_gate
            .clone()
            .try_acquire_owned()
            .map_err(|_| SwitchError::Conflict)?;

        for model in catalog::models() {
            self.orchestrator.stop(model.container).await?;
        }
        self.orchestrator.stop(&self.config.comfy_container).await?;
        self.store.write_mode(Mode::Llm).await?;
        Ok(())
    }

    /// Readiness evaluation for `GET /healthz/ready`.
    ///
    /// Ready iff mode is `llm`, exactly one backend is running, a model is
    /// selected, and the two agree.
    pub async fn ready(&self) -> Result<ReadyPayload, String> {
        let mode = self.store.read_mode().await;
        if mode != Mode::Llm {
            return Err(format!("mode is {mode}, not llm"));
        }

        let mut running = Vec::new();
        for model in catalog::models() {
            if let Ok(snap) = self.orchestrator.inspect(model.container).await {
                if snap.is_running() {
                    running.push(model.id);
                }
            }
        }
        if running.len() != 1 {
            return Err("expected exactly one running model".to_string());
        }
        let Some(active) = self.store.read_active_model().await else {
            return Err("no active model configured".to_string());
        };
        if running[0] != active.id {
            return Err("active model does not match running model".to_string());
        }
        Ok(ReadyPayload {
            status: "ready",
            active_model: active.id.to_string(),
        })
    }

    /// Assemble the full composite status payload.
    pub async fn status(&self) -> StatusPayload {
        let mut running_models = Vec::new();
        let mut containers = BTreeMap::new();
        for model in catalog::models() {
            let entry = match self.orchestrator.inspect(model.container).await {
                Ok(snap) => {
                    if snap.is_running() {
                        running_models.push(model.id.to_string());
                    }
                    ContainerEntry::from(snap)
                }
                Err(err) => ContainerEntry::from(&err),
            };
            containers.insert(model.id.to_string(), entry);
        }
        let comfyui = self.container_entry(&self.config.comfy_container).await;
        let litellm = self.container_entry(LITELLM_CONTAINER).await;

        let active_mode = self.store.read_mode().await;
        let active_model = self
            .store
            .read_active_model()
            .await
            .map(|m| m.id.to_string());
        let lease = self
            .store
            .read_lease()
            .await
            .map(|until| LeaseBlock::at(until, Utc::now()));

        let (last_error, last_switch_at) = {
            let runtime = self
                .runtime
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            (runtime.last_error.clone(), runtime.last_switch_at)
        };

        StatusPayload {
            running_models,
            active_model,
            active_mode,
            mode: ModeBlock {
                active: active_mode,
                default: Mode::Llm,
                lease,
            },
            containers,
            comfyui,
            litellm,
            switch_in_progress: self.switch_in_progress(),
            last_error,
            last_switch_at,
            switch: self.current_switch(),
        }
    }

    /// The mode-scoped subset of the status payload.
    pub async fn mode_status(&self) -> ModePayload {
        ModePayload::from(self.status().await)
    }

    /// Start the lease monitor. Only the first call spawns a task.
    pub fn start_lease_monitor(&self) {
        let Some(engine) = self.self_ref.upgrade() else {
            return;
        };
        let mut slot = self
            .monitor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        *slot = Some(monitor::spawn(engine, self.config.monitor_poll));
    }

    /// Cancel and join the lease monitor.
    pub async fn shutdown(&self) {
        let handle = self
            .monitor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    // ------------------------------------------------------------------
    // Validation and dispatch
    // ------------------------------------------------------------------

    async fn plan(&self, req: &SwitchRequest) -> Result<Target, SwitchError> {
        let mode: Mode = req
            .mode
            .parse()
            .map_err(|()| SwitchError::BadRequest(format!("unknown mode: {}", req.mode)))?;

        match mode {
            Mode::Llm => {
                if req.ttl_minutes.is_some() {
                    return Err(SwitchError::BadRequest(
                        "ttl_minutes is only valid for comfy mode".to_string(),
                    ));
                }
                let id = match &req.model {
                    Some(id) => id.trim().to_string(),
                    None => match self.store.read_active_model().await {
                        Some(active) => active.id.to_string(),
                        None => self.config.default_model.clone(),
                    },
                };
                let spec = catalog::find_model(&id)
                    .ok_or_else(|| SwitchError::BadRequest(format!("unknown model: {id}")))?;
                Ok(Target::Llm(spec))
            }
            Mode::Comfy => {
                if req.model.is_some() {
                    return Err(SwitchError::BadRequest(
                        "model is not valid for comfy mode".to_string(),
                    ));
                }
                let max = self.config.comfy_max_ttl_minutes();
                let minutes = req
                    .ttl_minutes
                    .unwrap_or_else(|| (self.config.comfy_default_ttl.as_secs() / 60) as i64);
                if minutes <= 0 || minutes > max {
                    return Err(SwitchError::BadRequest(format!(
                        "ttl_minutes must be in 1..={max}"
                    )));
                }
                Ok(Target::Comfy {
                    ttl: Duration::from_secs(minutes as u64 * 60),
                })
            }
        }
    }

    pub(crate) async fn dispatch(
        &self,
        target: Target,
        wait_for_ready: bool,
        source: Option<&str>,
    ) -> Result<SwitchOutcome, SwitchError> {
        let permit = match self.switch_gate.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                if wait_for_ready {
                    return Err(SwitchError::Conflict);
                }
                // Point the caller at the pipeline that beat them to it.
                let (switch_id, to_model, state_text) = {
                    let guard = self
                        .job
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    match guard.as_ref() {
                        Some(job) => (job.id, job.to_model.clone(), job.state_text.clone()),
                        None => (0, target.to_model(), "switch in progress".to_string()),
                    }
                };
                return Ok(SwitchOutcome::Accepted(SwitchAccepted {
                    status: "in_progress",
                    switch_id,
                    to_model,
                    state_text,
                    poll_endpoint: "/status",
                }));
            }
        };

        let job_id = self.register_job(target, source);

        if wait_for_ready {
            let report = self.run_locked(permit, target, job_id).await?;
            return Ok(SwitchOutcome::Completed(report));
        }

        let state_text = self
            .current_switch()
            .map_or_else(|| "queued".to_string(), |job| job.state_text);
        let Some(engine) = self.self_ref.upgrade() else {
            return Err(SwitchError::Internal(
                "engine is shutting down".to_string(),
            ));
        };
        tokio::spawn(async move {
            if let Err(err) = engine.run_locked(permit, target, job_id).await {
                warn!(switch_id = job_id, %err, "switch rejected before the disruptive boundary");
            }
        });

        Ok(SwitchOutcome::Accepted(SwitchAccepted {
            status: "accepted",
            switch_id: job_id,
            to_model: target.to_model(),
            state_text,
            poll_endpoint: "/status",
        }))
    }

    fn register_job(&self, target: Target, source: Option<&str>) -> u64 {
        let id = self.next_switch_id.fetch_add(1, Ordering::SeqCst) + 1;
        let job = SwitchJob::new(id, target.to_model(), source.map(str::to_string));
        *self
            .job
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(job);
        id
    }

    // ------------------------------------------------------------------
    // Pipeline execution (gate permit held throughout, incl. rollback)
    // ------------------------------------------------------------------

    async fn run_locked(
        &self,
        permit: OwnedSemaphorePermit,
        target: Target,
        job_id: u64,
    ) -> Result<SwitchReport, SwitchError> {
        // Dropping the permit on any exit path below releases the gate.
        let _permit = permit;

        let mut cx = self.capture_prior(target, job_id).await;
        match self.drive(&mut cx).await {
            Ok(()) => Ok(self.conclude_success(&cx).await),
            Err(err) => self.conclude_failure(&cx, err).await,
        }
    }

    /// Observe the world before mutating anything: the persisted pair is
    /// captured for rollback, the running set for noop/renewal detection.
    async fn capture_prior(&self, target: Target, job_id: u64) -> PipelineCx {
        let previous_config = self.store.read_staged_config().await;
        let previous_model = self.store.read_raw_model().await;
        let prior_mode = self.store.read_mode().await;

        let mut running_before = Vec::new();
        for model in catalog::models() {
            if let Ok(snap) = self.orchestrator.inspect(model.container).await {
                if snap.is_running() {
                    running_before.push(model.id.to_string());
                }
            }
        }
        let comfy_running = match self.orchestrator.inspect(&self.config.comfy_container).await {
            Ok(snap) => snap.is_running(),
            Err(_) => false,
        };

        let from_model = match running_before.first() {
            Some(id) => Some(id.clone()),
            None => self
                .store
                .read_active_model()
                .await
                .map(|m| m.id.to_string()),
        };

        self.with_job(job_id, |job| {
            job.from_model = from_model.clone();
            job.state = JobState::Running;
            job.set_text("running");
        });

        PipelineCx {
            job_id,
            target,
            prior_mode,
            from_model,
            running_before,
            comfy_running,
            previous_config,
            previous_model,
            lease_until: None,
            disruptive: false,
        }
    }

    async fn drive(&self, cx: &mut PipelineCx) -> Result<(), SwitchError> {
        let steps = match cx.target {
            Target::Llm(_) => LLM_PIPELINE,
            Target::Comfy { .. } => COMFY_PIPELINE,
        };

        for spec in steps {
            if spec.disruptive {
                cx.disruptive = true;
            }
            match self.run_step(spec.step, cx).await? {
                StepFlow::Continue => {}
                StepFlow::Done => return Ok(()),
            }
        }
        self.commit_state(cx).await
    }

    async fn run_step(&self, step: Step, cx: &mut PipelineCx) -> Result<StepFlow, SwitchError> {
        match step {
            Step::Preflight => {
                let container = match cx.target {
                    Target::Llm(spec) => spec.container,
                    Target::Comfy { .. } => self.config.comfy_container.as_str(),
                };
                let snap = self.orchestrator.inspect(container).await?;
                if !snap.exists {
                    return Err(SwitchError::Precondition(format!(
                        "target container is not created: {container}"
                    )));
                }
                self.record_step(cx, step, format!("target container exists: {container}"));
            }
            Step::StopComfy => {
                self.orchestrator.stop(&self.config.comfy_container).await?;
                self.record_step(cx, step, "comfyui stopped");
            }
            Step::NoopCheck => {
                let spec = cx.llm_spec()?;
                let sole_tenant = cx.prior_mode == Mode::Llm
                    && cx.from_model.as_deref() == Some(spec.id)
                    && cx.running_before.len() == 1
                    && cx.running_before[0] == spec.id;
                if !sole_tenant {
                    return Ok(StepFlow::Continue);
                }
                // Confirm the persisted pair, healing a torn write from an
                // earlier crash.
                let staged = self.store.read_active_model().await.map(|m| m.id);
                if staged != Some(spec.id) {
                    self.store.stage_config(spec).await?;
                }
                self.store.write_mode(Mode::Llm).await?;
                self.record_step(cx, step, format!("model '{}' is already active", spec.id));
                return Ok(StepFlow::Done);
            }
            Step::RenewalCheck => {
                let Target::Comfy { ttl } = cx.target else {
                    return Ok(StepFlow::Continue);
                };
                let renewal = cx.prior_mode == Mode::Comfy
                    && cx.comfy_running
                    && cx.running_before.is_empty();
                if !renewal {
                    return Ok(StepFlow::Continue);
                }
                let until = self.store.set_lease(ttl).await?;
                cx.lease_until = Some(until);
                self.record_step(cx, step, format!("lease renewed until {}", until.to_rfc3339()));
                return Ok(StepFlow::Done);
            }
            Step::StopLitellm => {
                self.orchestrator.stop(LITELLM_CONTAINER).await?;
                self.record_step(cx, step, "litellm stopped");
            }
            Step::StopModels => {
                for model in catalog::models() {
                    self.orchestrator.stop(model.container).await?;
                }
                self.record_step(cx, step, "all backend containers stopped");
            }
            Step::StartTarget => {
                let spec = cx.llm_spec()?;
                self.orchestrator.start(spec.container).await?;
                self.record_step(cx, step, format!("started {}", spec.container));
            }
            Step::WaitTarget => {
                let spec = cx.llm_spec()?;
                self.orchestrator
                    .wait_ready(
                        spec.container,
                        self.config.health_timeout,
                        self.config.poll_interval,
                    )
                    .await?;
                self.record_step(cx, step, format!("{} is ready", spec.container));
            }
            Step::ActivateConfig => {
                let spec = cx.llm_spec()?;
                self.store.stage_config(spec).await?;
                self.record_step(cx, step, format!("active config set to {}", spec.id));
            }
            Step::StartLitellm => {
                self.orchestrator.start(LITELLM_CONTAINER).await?;
                self.record_step(cx, step, "litellm started");
            }
            Step::VerifyLitellm => {
                let spec = cx.llm_spec()?;
                self.gateway
                    .wait_model(spec.litellm_model, self.config.litellm_verify_timeout)
                    .await?;
                self.record_step(
                    cx,
                    step,
                    format!("litellm exposes model '{}'", spec.litellm_model),
                );
            }
            Step::StartComfy => {
                self.orchestrator
                    .start(&self.config.comfy_container)
                    .await?;
                self.record_step(cx, step, "comfyui started");
            }
            Step::WaitComfy => {
                self.orchestrator
                    .wait_ready(
                        &self.config.comfy_container,
                        self.config.health_timeout,
                        self.config.poll_interval,
                    )
                    .await?;
                self.record_step(cx, step, "comfyui is ready");
            }
        }
        Ok(StepFlow::Continue)
    }

    /// Persist the new tenancy once every pipeline step has passed.
    async fn commit_state(&self, cx: &mut PipelineCx) -> Result<(), SwitchError> {
        match cx.target {
            Target::Llm(_) => {
                // Config and model were staged by activate_config.
                self.store.write_mode(Mode::Llm).await?;
            }
            Target::Comfy { ttl } => {
                self.store.write_mode(Mode::Comfy).await?;
                self.store.clear_active_model().await?;
                let until = self.store.set_lease(ttl).await?;
                cx.lease_until = Some(until);
            }
        }
        Ok(())
    }

    async fn conclude_success(&self, cx: &PipelineCx) -> SwitchReport {
        {
            let mut runtime = self
                .runtime
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            runtime.last_error = None;
            runtime.last_switch_at = Some(Utc::now());
        }

        let text = match cx.target {
            Target::Llm(spec) => format!("model '{}' is active", spec.id),
            Target::Comfy { .. } => match cx.lease_until {
                Some(until) => format!("comfyui active until {}", until.to_rfc3339()),
                None => "comfyui active".to_string(),
            },
        };
        self.with_job(cx.job_id, |job| {
            job.set_text(&text);
            job.finish(JobState::Success, None, true);
        });

        info!(to_model = %cx.target.to_model(), from_model = ?cx.from_model, "switch succeeded");
        self.audit_outcome(cx, JobState::Success, None).await;
        self.report(cx.job_id, cx.target)
    }

    async fn conclude_failure(
        &self,
        cx: &PipelineCx,
        err: SwitchError,
    ) -> Result<SwitchReport, SwitchError> {
        let primary = err.to_string();
        self.with_job(cx.job_id, |job| {
            job.push_step("switch_error", false, &primary);
        });

        if !cx.disruptive {
            if err.is_validation() {
                // Clean abort: nothing was touched, nothing to roll back,
                // and the last-error slot stays as it was.
                self.with_job(cx.job_id, |job| {
                    job.set_text(&primary);
                    job.finish(JobState::Failed, Some(primary.clone()), false);
                });
                self.audit_outcome(cx, JobState::Failed, Some(primary)).await;
                return Err(err);
            }

            self.finish_failed(cx, primary.clone()).await;
            return Ok(self.report(cx.job_id, cx.target));
        }

        warn!(to_model = %cx.target.to_model(), error = %primary, "switch failed past the disruptive boundary, rolling back");
        let (state, detail) = self.rollback(cx, primary).await;
        match state {
            JobState::RolledBack => {
                {
                    let mut runtime = self
                        .runtime
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    runtime.last_error = Some(detail.clone());
                    runtime.last_switch_at = Some(Utc::now());
                }
                let text = match &cx.from_model {
                    Some(from) => format!("rolled back to '{from}'"),
                    None => "rolled back".to_string(),
                };
                self.with_job(cx.job_id, |job| {
                    job.set_text(&text);
                    job.finish(JobState::RolledBack, Some(detail.clone()), false);
                });
                self.audit_outcome(cx, JobState::RolledBack, Some(detail)).await;
            }
            _ => self.finish_failed(cx, detail).await,
        }
        Ok(self.report(cx.job_id, cx.target))
    }

    async fn finish_failed(&self, cx: &PipelineCx, detail: String) {
        {
            let mut runtime = self
                .runtime
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            runtime.last_error = Some(detail.clone());
            runtime.last_switch_at = Some(Utc::now());
        }
        self.with_job(cx.job_id, |job| {
            // Keep the tail honest: a failed job must not end on an
            // ok step left over from a partial restore.
            if job.steps.last().is_some_and(|s| s.ok) {
                job.push_step("failed", false, &detail);
            }
            job.set_text(&detail);
            job.finish(JobState::Failed, Some(detail.clone()), false);
        });
        self.audit_outcome(cx, JobState::Failed, Some(detail)).await;
    }

    // ------------------------------------------------------------------
    // Rollback
    // ------------------------------------------------------------------

    /// Returns the final job state and the (possibly composite) error.
    async fn rollback(&self, cx: &PipelineCx, primary: String) -> (JobState, String) {
        let previous = cx
            .from_model
            .as_deref()
            .and_then(catalog::find_model)
            .filter(|spec| {
                cx.prior_mode == Mode::Llm
                    && match cx.target {
                        Target::Llm(target) => target.id != spec.id,
                        Target::Comfy { .. } => true,
                    }
            });

        match previous {
            Some(spec) => match self.rollback_to_previous(cx, spec).await {
                Ok(()) => (JobState::RolledBack, primary),
                Err(sub) => {
                    let sub = sub.to_string();
                    self.with_job(cx.job_id, |job| {
                        job.push_step("rollback_error", false, &sub);
                    });
                    (JobState::Failed, format!("{primary}; rollback failed: {sub}"))
                }
            },
            None => {
                self.best_effort_restore(cx).await;
                (JobState::Failed, primary)
            }
        }
    }

    /// Full rollback: put the previous LLM back in charge and verify it
    /// end to end, exactly like a forward switch would.
    async fn rollback_to_previous(
        &self,
        cx: &PipelineCx,
        spec: &'static ModelSpec,
    ) -> Result<(), SwitchError> {
        self.store
            .restore(cx.previous_config.as_deref(), cx.previous_model.as_deref())
            .await?;
        self.with_job(cx.job_id, |job| {
            job.push_step("rollback_restore_config", true, "active config restored");
        });

        for model in catalog::models() {
            self.orchestrator.stop(model.container).await?;
        }
        // ComfyUI may have been half-started by the failed pipeline; it
        // must not share the GPU with the restored backend.
        self.orchestrator.stop(&self.config.comfy_container).await?;
        self.with_job(cx.job_id, |job| {
            job.push_step("rollback_stop_models", true, "all backend containers stopped");
        });

        let snap = self.orchestrator.inspect(spec.container).await?;
        if !snap.exists {
            return Err(SwitchError::Internal(format!(
                "rollback container missing: {}",
                spec.container
            )));
        }
        self.orchestrator.start(spec.container).await?;
        self.orchestrator
            .wait_ready(
                spec.container,
                self.config.health_timeout,
                self.config.poll_interval,
            )
            .await?;
        self.with_job(cx.job_id, |job| {
            job.push_step("rollback_start_previous", true, format!("restored {}", spec.id));
        });

        self.orchestrator.start(LITELLM_CONTAINER).await?;
        self.gateway
            .wait_model(spec.litellm_model, self.config.litellm_verify_timeout)
            .await?;
        self.with_job(cx.job_id, |job| {
            job.push_step("rollback_litellm", true, "litellm restored");
        });

        self.store.write_mode(Mode::Llm).await?;
        Ok(())
    }

    /// No safe previous state: put the staged files back, restart the
    /// gateway, settle on llm. Every substep is recorded win or lose.
    async fn best_effort_restore(&self, cx: &PipelineCx) {
        match self
            .store
            .restore(cx.previous_config.as_deref(), cx.previous_model.as_deref())
            .await
        {
            Ok(()) => self.with_job(cx.job_id, |job| {
                job.push_step("restore_config", true, "active config restored");
            }),
            Err(err) => self.with_job(cx.job_id, |job| {
                job.push_step("restore_config", false, err.to_string());
            }),
        };

        match self.orchestrator.start(LITELLM_CONTAINER).await {
            Ok(()) => self.with_job(cx.job_id, |job| {
                job.push_step("restore_litellm", true, "litellm restarted");
            }),
            Err(err) => self.with_job(cx.job_id, |job| {
                job.push_step("restore_litellm", false, err.to_string());
            }),
        };

        match self.store.write_mode(Mode::Llm).await {
            Ok(()) => self.with_job(cx.job_id, |job| {
                job.push_step("restore_mode", true, "mode reset to llm, lease cleared");
            }),
            Err(err) => self.with_job(cx.job_id, |job| {
                job.push_step("restore_mode", false, err.to_string());
            }),
        };
    }

    // ------------------------------------------------------------------
    // Small helpers
    // ------------------------------------------------------------------

    async fn container_entry(&self, name: &str) -> ContainerEntry {
        match self.orchestrator.inspect(name).await {
            Ok(snap) => ContainerEntry::from(snap),
            Err(err) => ContainerEntry::from(&err),
        }
    }

    fn record_step(&self, cx: &PipelineCx, step: Step, detail: impl Into<String>) {
        let detail = detail.into();
        self.with_job(cx.job_id, |job| {
            job.push_step(step.name(), true, &detail);
            job.set_text(&detail);
        });
    }

    fn with_job<R>(&self, job_id: u64, f: impl FnOnce(&mut SwitchJob) -> R) -> Option<R> {
        let mut guard = self
            .job
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match guard.as_mut() {
            Some(job) if job.id == job_id => Some(f(job)),
            _ => None,
        }
    }

    fn report(&self, job_id: u64, target: Target) -> SwitchReport {
        self.with_job(job_id, |job| SwitchReport {
            status: job.state,
            switch_id: job.id,
            from_model: job.from_model.clone(),
            to_model: job.to_model.clone(),
            steps: job.steps.clone(),
            duration_ms: job.duration_ms,
            error: job.error.clone(),
        })
        .unwrap_or_else(|| SwitchReport {
            status: JobState::Failed,
            switch_id: job_id,
            from_model: None,
            to_model: target.to_model(),
            steps: Vec::new(),
            duration_ms: 0,
            error: Some("job record was replaced".to_string()),
        })
    }

    async fn audit_outcome(&self, cx: &PipelineCx, state: JobState, error: Option<String>) {
        let Some(audit) = &self.audit else { return };
        let event = match state {
            JobState::Success => "switch_success",
            JobState::RolledBack => "switch_rolled_back",
            _ => "switch_failed",
        };
        audit
            .append(&AuditRecord {
                event,
                switch_id: cx.job_id,
                from_model: cx.from_model.clone(),
                to_model: cx.target.to_model(),
                status: state.as_str(),
                error,
                at: Utc::now(),
            })
            .await;
    }

    /// Record an error into the last-error slot (lease monitor failures).
    pub(crate) fn record_last_error(&self, detail: impl Into<String>) {
        let mut runtime = self
            .runtime
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        runtime.last_error = Some(detail.into());
    }

    /// One lease-monitor tick: reclaim the GPU when a comfy lease has
    /// expired. Quiet when there is nothing to do or the gate is busy.
    pub(crate) async fn reclaim_expired_lease(&self) {
        if self.store.read_mode().await != Mode::Comfy {
            return;
        }
        let Some(until) = self.store.read_lease().await else {
            return;
        };
        if until > Utc::now() {
            return;
        }

        let Some(spec) = catalog::find_model(&self.config.default_model) else {
            self.record_last_error(format!(
                "lease expired but default model is unknown: {}",
                self.config.default_model
            ));
            return;
        };

        info!(lease_until = %until.to_rfc3339(), model = spec.id, "comfy lease expired, reclaiming GPU");
        match self.dispatch(Target::Llm(spec), true, Some("lease_expired")).await {
            Ok(_) => {}
            // Another pipeline holds the gate; the next tick re-checks.
            Err(SwitchError::Conflict) => {}
            Err(err) => self.record_last_error(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ContainerSnapshot, MockGatewayProbe, OrchestratorError};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Orchestrator where nothing exists and every mutation succeeds.
    struct EmptyHost;

    #[async_trait]
    impl ContainerOrchestrator for EmptyHost {
        async fn inspect(&self, _name: &str) -> Result<ContainerSnapshot, OrchestratorError> {
            Ok(ContainerSnapshot::absent())
        }

        async fn start(&self, _name: &str) -> Result<(), OrchestratorError> {
            Ok(())
        }

        async fn stop(&self, _name: &str) -> Result<(), OrchestratorError> {
            Ok(())
        }
    }

    fn engine(dir: &TempDir) -> Arc<SwitchEngine> {
        let config = Config {
            config_dir: dir.path().join("config"),
            template_dir: dir.path().join("templates"),
            ..Config::default()
        };
        SwitchEngine::new(config, Arc::new(EmptyHost), Arc::new(MockGatewayProbe::new()))
    }

    fn req(mode: &str, model: Option<&str>, ttl: Option<i64>) -> SwitchRequest {
        SwitchRequest {
            mode: mode.to_string(),
            model: model.map(str::to_string),
            ttl_minutes: ttl,
            wait_for_ready: true,
        }
    }

    #[tokio::test]
    async fn plan_rejects_unknown_mode() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let err = engine.plan(&req("video", None, None)).await.unwrap_err();
        assert!(matches!(err, SwitchError::BadRequest(_)));
    }

    #[tokio::test]
    async fn plan_rejects_ttl_for_llm() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let err = engine
            .plan(&req("llm", Some("qwen-fast"), Some(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::BadRequest(_)));
    }

    #[tokio::test]
    async fn plan_rejects_unknown_model() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let err = engine
            .plan(&req("llm", Some("gpt-9"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::BadRequest(_)));
    }

    #[tokio::test]
    async fn plan_resolves_missing_model_to_default() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let target = engine.plan(&req("llm", None, None)).await.unwrap();
        match target {
            Target::Llm(spec) => assert_eq!(spec.id, "qwen-fast"),
            Target::Comfy { .. } => panic!("expected llm target"),
        }
    }

    #[tokio::test]
    async fn plan_rejects_model_for_comfy() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let err = engine
            .plan(&req("comfy", Some("qwen-fast"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::BadRequest(_)));
    }

    #[tokio::test]
    async fn plan_bounds_comfy_ttl() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        for bad in [0, -5, 91] {
            let err = engine.plan(&req("comfy", None, Some(bad))).await.unwrap_err();
            assert!(matches!(err, SwitchError::BadRequest(_)), "ttl {bad}");
        }
        let target = engine.plan(&req("comfy", None, None)).await.unwrap();
        match target {
            Target::Comfy { ttl } => assert_eq!(ttl, Duration::from_secs(45 * 60)),
            Target::Llm(_) => panic!("expected comfy target"),
        }
    }

    #[tokio::test]
    async fn preflight_fails_with_precondition_on_missing_container() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let err = engine
            .switch(req("llm", Some("qwen-fast"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::Precondition(_)));
        // The job records the refusal but no disruption happened.
        let job = engine.current_switch().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(!engine.switch_in_progress());
    }
}
