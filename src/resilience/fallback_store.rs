use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ResilienceConfig;
use crate::error::Result;
use crate::metrics::AdmissionMetrics;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::storage::{CounterKey, CounterStore, LocalCounterBackend};

/// Counter store that prefers the shared backend and degrades to local counters.
///
/// ```plaintext
///              ┌──────────────────────┐
///  check ────► │ FallbackCounterStore │
///              └──────────────────────┘
///                 │ breaker closed      │ error / timeout / breaker open
///                 ▼                     ▼
///         ┌──────────────┐      ┌─────────────────────┐
///         │ shared store │      │ LocalCounterBackend │
///         └──────────────┘      └─────────────────────┘
/// ```
///
/// A failed remote increment is retried locally inside the same call, so
/// callers only ever see a count. Every fallback is logged and counted:
/// sustained fallback means limits are being enforced per instance only.
#[derive(Debug, Clone)]
pub struct FallbackCounterStore {
    remote: Option<Arc<dyn CounterStore>>,
    local: Arc<LocalCounterBackend>,
    circuit_breaker: Arc<CircuitBreaker>,
    metrics: Arc<AdmissionMetrics>,
    remote_timeout: Duration,
}

impl FallbackCounterStore {
    pub fn new(
        remote: Option<Arc<dyn CounterStore>>,
        local: Arc<LocalCounterBackend>,
        config: &ResilienceConfig,
        metrics: Arc<AdmissionMetrics>,
    ) -> Self {
        Self {
            remote,
            local,
            circuit_breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            metrics,
            remote_timeout: config.remote_timeout,
        }
    }

    /// Store that never talks to a shared backend
    pub fn local_only(local: Arc<LocalCounterBackend>, metrics: Arc<AdmissionMetrics>) -> Self {
        Self::new(None, local, &ResilienceConfig::default(), metrics)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn local(&self) -> &Arc<LocalCounterBackend> {
        &self.local
    }

    /// One remote attempt; `None` means the caller must fall back
    async fn try_remote(
        &self,
        remote: &Arc<dyn CounterStore>,
        key: &CounterKey,
        window: Duration,
    ) -> Option<u64> {
        if !self.circuit_breaker.allow_request().await {
            debug!(key = %key, "Circuit open, skipping shared counter store");
            self.metrics.record_fallback("circuit_open");
            return None;
        }

        let started = Instant::now();
        match tokio::time::timeout(self.remote_timeout, remote.increment_and_get(key, window)).await
        {
            Ok(Ok(count)) => {
                self.circuit_breaker.record_success().await;
                self.metrics.observe_remote_latency(started.elapsed());
                Some(count)
            }
            Ok(Err(e)) => {
                self.circuit_breaker.record_failure().await;
                self.metrics.record_fallback("error");
                warn!(
                    backend = remote.name(),
                    key = %key,
                    error = %e,
                    "Shared counter store failed, falling back to local counters"
                );
                None
            }
            Err(_) => {
                self.circuit_breaker.record_failure().await;
                self.metrics.record_fallback("timeout");
                warn!(
                    backend = remote.name(),
                    key = %key,
                    timeout_ms = self.remote_timeout.as_millis() as u64,
                    "Shared counter store timed out, falling back to local counters"
                );
                None
            }
        }
    }
}

#[async_trait]
impl CounterStore for FallbackCounterStore {
    async fn increment_and_get(&self, key: &CounterKey, window: Duration) -> Result<u64> {
        if let Some(remote) = &self.remote {
            if let Some(count) = self.try_remote(remote, key, window).await {
                return Ok(count);
            }
        }

        self.local.increment_and_get(key, window).await
    }

    fn name(&self) -> &'static str {
        if self.remote.is_some() {
            "fallback"
        } else {
            "local"
        }
    }
}
