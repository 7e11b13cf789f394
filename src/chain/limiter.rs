//! Per-endpoint minimum delay between outbound indexer calls

use crate::error::{WatchtowerError, WatchtowerResult};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Serializes calls so that consecutive calls are at least `min_delay` apart
#[derive(Debug)]
pub struct RequestLimiter {
    min_delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RequestLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_call: Mutex::new(None),
        }
    }

    /// Limiter that never waits
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait for the next call slot
    pub async fn wait(&self, cancel: &CancellationToken) -> WatchtowerResult<()> {
        if self.min_delay.is_zero() {
            return Ok(());
        }

        let mut last_call = self.last_call.lock().await;

        if let Some(last) = *last_call {
            let ready_at = last + self.min_delay;
            tokio::select! {
                _ = cancel.cancelled() => return Err(WatchtowerError::Cancelled),
                _ = tokio::time::sleep_until(ready_at) => {}
            }
        }

        *last_call = Some(Instant::now());
        Ok(())
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }
}

/// One limiter per endpoint, shared by every watcher calling it
#[derive(Debug, Default)]
pub struct LimiterRegistry {
    limiters: DashMap<String, Arc<RequestLimiter>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limiter_for(&self, endpoint: &str, min_delay: Duration) -> Arc<RequestLimiter> {
        self.limiters
            .entry(endpoint.trim_end_matches('/').to_string())
            .or_insert_with(|| Arc::new(RequestLimiter::new(min_delay)))
            .clone()
    }
}
