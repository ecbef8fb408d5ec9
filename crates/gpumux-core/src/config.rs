//! Environment-driven configuration.
//!
//! Every knob has a default that matches the deployed compose stack, so a
//! bare environment yields a working (if locked-down) instance. Invalid
//! numeric values fall back to the default with a warning rather than
//! aborting startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Runtime configuration, sourced from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token required by the HTTP API. Empty means unconfigured,
    /// which makes every authenticated endpoint fail with 500.
    pub admin_token: String,
    /// Model the engine falls back to (release, lease expiry, fresh host).
    pub default_model: String,
    /// Base URL of the docker-socket-proxy.
    pub docker_proxy_url: String,
    /// Per-call timeout for orchestration HTTP requests.
    pub docker_timeout: Duration,
    /// Deadline for a backend container to become healthy.
    pub health_timeout: Duration,
    /// Interval between container health polls.
    pub poll_interval: Duration,
    /// Gateway model-inventory endpoint.
    pub litellm_models_url: String,
    /// Bearer credential for the gateway inventory endpoint.
    pub litellm_key: String,
    /// Deadline for the gateway to expose the target model.
    pub litellm_verify_timeout: Duration,
    /// Interval between gateway inventory polls.
    pub litellm_poll_interval: Duration,
    /// Lease length used when a comfy switch omits `ttl_minutes`.
    pub comfy_default_ttl: Duration,
    /// Upper bound on any requested lease length.
    pub comfy_max_ttl: Duration,
    /// Interval between lease-monitor ticks.
    pub monitor_poll: Duration,
    /// Directory holding the persisted active-state files.
    pub config_dir: PathBuf,
    /// Directory holding the gateway config templates.
    pub template_dir: PathBuf,
    /// ComfyUI container name.
    pub comfy_container: String,
    /// Append-only JSONL audit log. `None` disables auditing.
    pub audit_file: Option<PathBuf>,
    /// Switch requests allowed per caller per minute.
    pub rate_limit_per_minute: u32,
}

impl Config {
    /// Build a configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let config_dir = PathBuf::from(env_or("CONFIG_DIR", "/config"));
        let audit_file = match env::var("AUDIT_FILE") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(PathBuf::from(v)),
            Err(_) => Some(config_dir.join("model-switcher-audit.log")),
        };

        Self {
            admin_token: env_or("ADMIN_TOKEN", ""),
            default_model: env_or("DEFAULT_MODEL", "qwen-fast"),
            docker_proxy_url: env_or("DOCKER_PROXY_URL", "http://docker-socket-proxy:2375"),
            docker_timeout: env_secs("DOCKER_TIMEOUT_SECONDS", 30),
            health_timeout: env_secs("HEALTH_TIMEOUT_SECONDS", 480),
            poll_interval: env_secs("POLL_INTERVAL_SECONDS", 2),
            litellm_models_url: env_or("LITELLM_MODELS_URL", "http://litellm:4000/v1/models"),
            litellm_key: env_or("LITELLM_KEY", ""),
            litellm_verify_timeout: env_secs("LITELLM_VERIFY_TIMEOUT_SECONDS", 90),
            litellm_poll_interval: env_secs("LITELLM_POLL_INTERVAL_SECONDS", 3),
            comfy_default_ttl: env_minutes("COMFY_DEFAULT_TTL_MINUTES", 45),
            comfy_max_ttl: env_minutes("COMFY_MAX_TTL_MINUTES", 90),
            monitor_poll: env_secs("MODE_MONITOR_POLL_SECONDS", 5),
            config_dir,
            template_dir: PathBuf::from(env_or("TEMPLATE_DIR", "/opt/model-configs")),
            comfy_container: env_or("COMFY_CONTAINER", "comfyui"),
            audit_file,
            rate_limit_per_minute: env_u64("RATE_LIMIT_PER_MINUTE", 5) as u32,
        }
    }

    /// Maximum lease length expressed in whole minutes.
    #[must_use]
    pub fn comfy_max_ttl_minutes(&self) -> i64 {
        (self.comfy_max_ttl.as_secs() / 60) as i64
    }
}

impl Default for Config {
    /// Defaults without consulting the environment. Used by tests, which
    /// override the directories and timeouts they care about.
    fn default() -> Self {
        Self {
            admin_token: String::new(),
            default_model: "qwen-fast".to_string(),
            docker_proxy_url: "http://docker-socket-proxy:2375".to_string(),
            docker_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(480),
            poll_interval: Duration::from_secs(2),
            litellm_models_url: "http://litellm:4000/v1/models".to_string(),
            litellm_key: String::new(),
            litellm_verify_timeout: Duration::from_secs(90),
            litellm_poll_interval: Duration::from_secs(3),
            comfy_default_ttl: Duration::from_secs(45 * 60),
            comfy_max_ttl: Duration::from_secs(90 * 60),
            monitor_poll: Duration::from_secs(5),
            config_dir: PathBuf::from("/config"),
            template_dir: PathBuf::from("/opt/model-configs"),
            comfy_container: "comfyui".to_string(),
            audit_file: None,
            rate_limit_per_minute: 5,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default, "invalid numeric env var, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_u64(key, default))
}

fn env_minutes(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_u64(key, default) * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let cfg = Config::default();
        assert_eq!(cfg.default_model, "qwen-fast");
        assert_eq!(cfg.docker_timeout, Duration::from_secs(30));
        assert_eq!(cfg.health_timeout, Duration::from_secs(480));
        assert_eq!(cfg.comfy_max_ttl_minutes(), 90);
        assert_eq!(cfg.comfy_container, "comfyui");
    }
}
