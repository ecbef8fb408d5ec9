//! LiteLLM gateway probe adapter.
//!
//! Polls the gateway's `/v1/models` inventory until the expected model id
//! shows up. 401/403 means the credential is wrong and retrying is
//! pointless; everything else (5xx, parse failures, connection errors) is
//! retried until the deadline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use gpumux_core::{GatewayError, GatewayProbe};

/// Gateway probe over the LiteLLM model-inventory endpoint.
#[derive(Debug, Clone)]
pub struct LiteLlmProbe {
    client: Client,
    models_url: String,
    key: String,
    poll: Duration,
    request_timeout: Duration,
}

impl LiteLlmProbe {
    #[must_use]
    pub fn new(
        models_url: impl Into<String>,
        key: impl Into<String>,
        poll: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            models_url: models_url.into(),
            key: key.into(),
            poll,
            request_timeout,
        }
    }

    /// One inventory fetch; `Ok(true)` when the model is listed.
    async fn model_listed(&self, model: &str) -> Result<bool, GatewayError> {
        let resp = self
            .client
            .get(&self.models_url)
            .bearer_auth(&self.key)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GatewayError::Auth(
                "litellm auth failed while verifying model list".to_string(),
            ));
        }
        if status == StatusCode::OK {
            let body: ModelList = resp
                .json()
                .await
                .map_err(|err| GatewayError::Transport(err.to_string()))?;
            return Ok(body.data.iter().any(|entry| entry.id == model));
        }
        Err(GatewayError::Transport(format!("litellm returned {status}")))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
}

#[async_trait]
impl GatewayProbe for LiteLlmProbe {
    async fn wait_model(&self, model: &str, timeout: Duration) -> Result<(), GatewayError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.model_listed(model).await {
                Ok(true) => return Ok(()),
                Ok(false) => debug!(model, "model not yet in litellm inventory"),
                Err(err @ GatewayError::Auth(_)) => return Err(err),
                Err(err) => debug!(model, %err, "litellm inventory poll failed, retrying"),
            }

            if Instant::now() + self.poll > deadline {
                return Err(GatewayError::Timeout(format!(
                    "litellm did not expose model '{model}' in {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_parses_model_ids() {
        let raw = r#"{"data":[{"id":"qwen-fast","object":"model"},{"id":"deepseek-r1"}],"object":"list"}"#;
        let body: ModelList = serde_json::from_str(raw).unwrap();
        let ids: Vec<_> = body.data.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["qwen-fast", "deepseek-r1"]);
    }

    #[test]
    fn empty_inventory_is_valid() {
        let body: ModelList = serde_json::from_str(r#"{"object":"list"}"#).unwrap();
        assert!(body.data.is_empty());
    }

    #[tokio::test]
    async fn unreachable_gateway_times_out_naming_the_model() {
        let probe = LiteLlmProbe::new(
            "http://127.0.0.1:59998/v1/models",
            "key",
            Duration::from_millis(50),
            Duration::from_millis(100),
        );
        let err = probe
            .wait_model("qwen-max", Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            GatewayError::Timeout(msg) => assert!(msg.contains("qwen-max"), "{msg}"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
