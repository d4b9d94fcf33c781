//! Per-client rate limiting for the gateway API
//!
//! Sliding-window limiter keyed by client (forwarded IP, falling back to
//! session id). Gateways attract scripted traffic; every route checks the
//! limiter before touching the store.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::errors::{GateError, GateResult};

pub struct RateLimiter {
    requests: RwLock<HashMap<String, Vec<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            max_requests,
            window: Duration::from_secs(window_seconds),
        }
    }

    /// Count this request against the client's window; over the limit the
    /// request is rejected and not recorded.
    pub async fn check(&self, client_key: &str) -> GateResult<()> {
        let mut requests = self.requests.write().await;
        let now = Instant::now();

        let client_requests = requests.entry(client_key.to_string()).or_default();
        client_requests.retain(|&time| now.duration_since(time) < self.window);

        if client_requests.len() >= self.max_requests {
            return Err(GateError::rate_limited(format!(
                "limit of {} requests per {}s reached",
                self.max_requests,
                self.window.as_secs()
            )));
        }

        client_requests.push(now);
        Ok(())
    }

    /// Requests counted for a client inside the current window.
    pub async fn request_count(&self, client_key: &str) -> usize {
        let requests = self.requests.read().await;
        let now = Instant::now();

        requests
            .get(client_key)
            .map(|times| {
                times
                    .iter()
                    .filter(|&&time| now.duration_since(time) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drop clients whose whole window has elapsed.
    pub async fn cleanup_expired(&self) {
        let mut requests = self.requests.write().await;
        let now = Instant::now();

        for times in requests.values_mut() {
            times.retain(|&time| now.duration_since(time) < self.window);
        }
        requests.retain(|_, times| !times.is_empty());
    }
}
