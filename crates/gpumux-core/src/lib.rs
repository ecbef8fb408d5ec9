//! Core domain for gpumux: the mode-and-model switch engine for a
//! single-GPU host.
//!
//! Exactly one of {an LLM backend, ComfyUI} may hold the GPU. This crate
//! owns the switching engine and everything it needs — the static model
//! catalogue, the port traits to the orchestration surface and the LLM
//! gateway, the file-backed active-state store, the lease monitor and the
//! switch-job progress model. Adapters live in sibling crates.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
mod monitor;
pub mod ports;
pub mod state;

// Re-export the types adapters touch every day.
pub use catalog::{LITELLM_CONTAINER, Mode, ModelSpec};
pub use config::Config;
pub use engine::{
    ContainerEntry, LeaseBlock, ModeBlock, ModePayload, ReadyPayload, StatusPayload,
    SwitchAccepted, SwitchEngine, SwitchOutcome, SwitchReport, SwitchRequest,
};
pub use error::SwitchError;
pub use job::{JobState, StepRecord, SwitchJob};
pub use ports::{
    ContainerHealth, ContainerOrchestrator, ContainerSnapshot, ContainerStatus, GatewayError,
    GatewayProbe, OrchestratorError,
};
pub use state::{ActiveStateStore, StateStoreError};
