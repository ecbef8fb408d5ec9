//! Static model catalogue and GPU tenancy modes.
//!
//! The catalogue maps every known LLM id to the backend container that
//! serves it, the gateway config template that fronts it, and the model
//! name the gateway advertises once it is wired in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Container name of the LLM gateway (LiteLLM).
pub const LITELLM_CONTAINER: &str = "litellm";

/// One entry of the static model catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    /// Model id used by operators and the HTTP API.
    pub id: &'static str,
    /// Backend container serving this model.
    pub container: &'static str,
    /// Gateway config template file name.
    pub template: &'static str,
    /// Model name the gateway reports once the backend is active.
    pub litellm_model: &'static str,
}

/// Every model this host can serve, one backend container each.
const MODELS: &[ModelSpec] = &[
    ModelSpec {
        id: "qwen-fast",
        container: "vllm-fast",
        template: "qwen-fast.yml",
        litellm_model: "qwen-fast",
    },
    ModelSpec {
        id: "qwen-quality",
        container: "vllm-quality",
        template: "qwen-quality.yml",
        litellm_model: "qwen-quality",
    },
    ModelSpec {
        id: "deepseek",
        container: "vllm-deepseek",
        template: "deepseek.yml",
        litellm_model: "deepseek-r1",
    },
    ModelSpec {
        id: "qwen-max",
        container: "vllm-qwen32b",
        template: "qwen-max.yml",
        litellm_model: "qwen-max",
    },
];

/// All catalogue entries, in a stable order.
#[must_use]
pub fn models() -> &'static [ModelSpec] {
    MODELS
}

/// Look up a catalogue entry by model id.
#[must_use]
pub fn find_model(id: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|m| m.id == id)
}

/// Which class of tenant currently owns the GPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// An LLM backend plus the gateway in front of it.
    #[default]
    Llm,
    /// The ComfyUI image-generation workload, under a lease.
    Comfy,
}

impl Mode {
    /// Stable lowercase name, as persisted and as used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Comfy => "comfy",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "llm" => Ok(Self::Llm),
            "comfy" => Ok(Self::Comfy),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_lookup() {
        let m = find_model("deepseek").unwrap();
        assert_eq!(m.container, "vllm-deepseek");
        assert_eq!(m.litellm_model, "deepseek-r1");
        assert!(find_model("nope").is_none());
        assert_eq!(models().len(), 4);
    }

    #[test]
    fn mode_round_trips() {
        assert_eq!("llm".parse::<Mode>().unwrap(), Mode::Llm);
        assert_eq!("comfy".parse::<Mode>().unwrap(), Mode::Comfy);
        assert!("image".parse::<Mode>().is_err());
        assert_eq!(Mode::default(), Mode::Llm);
        assert_eq!(serde_json::to_string(&Mode::Comfy).unwrap(), "\"comfy\"");
    }
}
