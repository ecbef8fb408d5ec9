//! Fixed-window rate limit for switch requests.
//!
//! One bucket per caller key, sixty-second window. A limit of zero
//! disables the check.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;

use crate::error::HttpError;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct RateLimiter {
    max_per_window: u32,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn per_minute(max_per_window: u32) -> Self {
        Self {
            max_per_window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `key`, rejecting it when the window is full.
    pub fn check(&self, key: &str) -> Result<(), HttpError> {
        if self.max_per_window == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let bucket = buckets.entry(key.to_string()).or_default();

        while bucket.front().is_some_and(|at| now - *at >= WINDOW) {
            bucket.pop_front();
        }
        if bucket.len() >= self.max_per_window as usize {
            return Err(HttpError::TooManyRequests(
                "too many switch requests".to_string(),
            ));
        }
        bucket.push_back(now);
        Ok(())
    }
}

/// Caller key for rate limiting: the first forwarded address when the
/// service sits behind a proxy, otherwise a single local bucket.
#[must_use]
pub fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "local".to_string())
}
