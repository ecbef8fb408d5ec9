//! Gateway probe port.
//!
//! After an LLM switch the engine confirms the gateway actually fronts the
//! new backend by polling its model inventory. This port abstracts that
//! probe so tests can script it.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by the gateway probe.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The inventory endpoint rejected our credential. Not retryable.
    #[error("{0}")]
    Auth(String),

    /// The deadline elapsed before the model appeared.
    #[error("{0}")]
    Timeout(String),

    /// Transport-level failure that exhausted the deadline.
    #[error("{0}")]
    Transport(String),
}

/// Poll of the downstream gateway's model inventory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayProbe: Send + Sync {
    /// Poll the inventory until it lists `model`, or `timeout` elapses.
    ///
    /// 401/403 fail immediately; any other non-200, parse failure or
    /// transport error is retried until the deadline.
    async fn wait_model(&self, model: &str, timeout: Duration) -> Result<(), GatewayError>;
}
