//! Production adapters for the gpumux ports.
//!
//! One adapter per port: `DockerOrchestrator` drives containers through a
//! docker-socket-proxy, `LiteLlmProbe` verifies the gateway inventory.

mod docker;
mod litellm;

pub use docker::DockerOrchestrator;
pub use litellm::LiteLlmProbe;
