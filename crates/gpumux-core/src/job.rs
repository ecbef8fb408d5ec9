//! In-memory switch-job record.
//!
//! One job exists per pipeline run; readers only ever see deep-copy
//! snapshots taken under the engine's job lock. Jobs are transient and do
//! not survive restarts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Lifecycle state of a switch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Success,
    Failed,
    RolledBack,
}

impl JobState {
    /// Whether the job can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::RolledBack)
    }

    /// Stable snake_case name, as serialized.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

/// One observable phase of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: String,
    pub at: DateTime<Utc>,
    pub ok: bool,
    pub detail: String,
}

/// Live progress record for one switch.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchJob {
    pub id: u64,
    pub state: JobState,
    pub from_model: Option<String>,
    pub to_model: String,
    pub current_step: Option<String>,
    pub state_text: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub ready: bool,
    pub steps: Vec<StepRecord>,
    #[serde(skip)]
    started: Instant,
    #[serde(skip)]
    text_prefix: Option<String>,
}

impl SwitchJob {
    /// Create a queued job. `text_prefix` attributes the source of
    /// engine-initiated switches (e.g. `lease_expired`) in every
    /// `state_text` update.
    #[must_use]
    pub fn new(id: u64, to_model: impl Into<String>, text_prefix: Option<String>) -> Self {
        let now = Utc::now();
        let mut job = Self {
            id,
            state: JobState::Queued,
            from_model: None,
            to_model: to_model.into(),
            current_step: None,
            state_text: String::new(),
            started_at: now,
            updated_at: now,
            finished_at: None,
            duration_ms: 0,
            error: None,
            ready: false,
            steps: Vec::new(),
            started: Instant::now(),
            text_prefix,
        };
        job.set_text("queued");
        job
    }

    /// Update `state_text`, applying the source prefix if any.
    pub fn set_text(&mut self, text: impl AsRef<str>) {
        self.state_text = match &self.text_prefix {
            Some(prefix) => format!("{prefix}: {}", text.as_ref()),
            None => text.as_ref().to_string(),
        };
        self.touch();
    }

    /// Append a step record and advance `current_step`.
    pub fn push_step(&mut self, step: impl Into<String>, ok: bool, detail: impl AsRef<str>) {
        let step = step.into();
        // Clamp so step timestamps never go backwards under clock skew.
        let at = Utc::now().max(self.updated_at);
        self.steps.push(StepRecord {
            step: step.clone(),
            at,
            ok,
            detail: detail.as_ref().to_string(),
        });
        self.current_step = Some(step);
        self.touch();
    }

    /// Bump `updated_at` (monotonically) and refresh the duration.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
        self.duration_ms = self.started.elapsed().as_millis() as u64;
    }

    /// Move the job to a terminal state.
    pub fn finish(&mut self, state: JobState, error: Option<String>, ready: bool) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.error = error;
        self.ready = ready;
        self.touch();
        self.finished_at = Some(self.updated_at);
    }

    /// Deep-copy snapshot with a fresh duration for live jobs.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        let mut copy = self.clone();
        if !copy.state.is_terminal() {
            copy.duration_ms = copy.started.elapsed().as_millis() as u64;
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_ordered_and_timestamps_non_decreasing() {
        let mut job = SwitchJob::new(1, "qwen-fast", None);
        job.push_step("preflight", true, "ok");
        job.push_step("stop_comfy", true, "ok");
        job.push_step("stop_litellm", true, "ok");

        let names: Vec<_> = job.steps.iter().map(|s| s.step.as_str()).collect();
        assert_eq!(names, ["preflight", "stop_comfy", "stop_litellm"]);
        for pair in job.steps.windows(2) {
            assert!(pair[0].at <= pair[1].at);
        }
        assert_eq!(job.current_step.as_deref(), Some("stop_litellm"));
    }

    #[test]
    fn prefix_attributes_source() {
        let mut job = SwitchJob::new(7, "qwen-fast", Some("lease_expired".to_string()));
        assert!(job.state_text.starts_with("lease_expired: "));
        job.set_text("model 'qwen-fast' is active");
        assert_eq!(job.state_text, "lease_expired: model 'qwen-fast' is active");
    }

    #[test]
    fn finish_freezes_terminal_state() {
        let mut job = SwitchJob::new(2, "mode:comfy", None);
        job.finish(JobState::Success, None, true);
        assert!(job.state.is_terminal());
        assert!(job.finished_at.is_some());
        assert!(job.ready);

        let snap = job.snapshot();
        assert_eq!(snap.id, 2);
        assert_eq!(snap.state, JobState::Success);
    }
}
