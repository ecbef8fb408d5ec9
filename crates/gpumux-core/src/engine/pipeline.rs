//! Pipelines as data.
//!
//! Both transitions are ordered step tables driven by one interpreter in
//! the engine. The `disruptive` flag marks where a failure stops being a
//! clean abort and starts requiring rollback: once a step that tears down
//! the gateway or a backend has begun, the previous configuration must be
//! put back on any error.

/// A named, observable phase of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Verify the target container exists.
    Preflight,
    /// Stop ComfyUI (idempotent).
    StopComfy,
    /// Short-circuit when the target model is already the sole tenant.
    NoopCheck,
    /// Short-circuit a comfy switch into a lease renewal.
    RenewalCheck,
    /// Stop the LLM gateway.
    StopLitellm,
    /// Stop every LLM backend container.
    StopModels,
    /// Start the target backend.
    StartTarget,
    /// Poll the target backend until healthy.
    WaitTarget,
    /// Stage the gateway config and record the model id.
    ActivateConfig,
    /// Start the LLM gateway.
    StartLitellm,
    /// Poll the gateway inventory until it exposes the target model.
    VerifyLitellm,
    /// Start ComfyUI.
    StartComfy,
    /// Poll ComfyUI until healthy.
    WaitComfy,
}

impl Step {
    /// Name used in step records.
    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::StopComfy => "stop_comfy",
            Self::NoopCheck => "noop",
            Self::RenewalCheck => "renewal",
            Self::StopLitellm => "stop_litellm",
            Self::StopModels => "stop_models",
            Self::StartTarget => "start_target",
            Self::WaitTarget => "wait_target",
            Self::ActivateConfig => "activate_config",
            Self::StartLitellm => "start_litellm",
            Self::VerifyLitellm => "verify_litellm",
            Self::StartComfy => "start_comfy",
            Self::WaitComfy => "wait_comfy",
        }
    }
}

/// One pipeline entry: the step plus whether entering it crosses the
/// disruptive boundary.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepSpec {
    pub step: Step,
    pub disruptive: bool,
}

const fn safe(step: Step) -> StepSpec {
    StepSpec {
        step,
        disruptive: false,
    }
}

const fn disruptive(step: Step) -> StepSpec {
    StepSpec {
        step,
        disruptive: true,
    }
}

/// Transition to `mode=llm` with a target model.
pub(crate) const LLM_PIPELINE: &[StepSpec] = &[
    safe(Step::Preflight),
    safe(Step::StopComfy),
    safe(Step::NoopCheck),
    disruptive(Step::StopLitellm),
    disruptive(Step::StopModels),
    disruptive(Step::StartTarget),
    disruptive(Step::WaitTarget),
    disruptive(Step::ActivateConfig),
    disruptive(Step::StartLitellm),
    disruptive(Step::VerifyLitellm),
];

/// Transition to `mode=comfy`.
pub(crate) const COMFY_PIPELINE: &[StepSpec] = &[
    safe(Step::Preflight),
    safe(Step::RenewalCheck),
    disruptive(Step::StopLitellm),
    disruptive(Step::StopModels),
    disruptive(Step::StartComfy),
    disruptive(Step::WaitComfy),
];

/// Outcome of one step: keep going, or the pipeline is already done
/// (noop / lease renewal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepFlow {
    Continue,
    Done,
}
