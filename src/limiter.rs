// src/limiter.rs

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::algorithms::FixedWindow;
use crate::clock::Clock;
use crate::metrics::AdmissionMetrics;
use crate::policy::Policy;
use crate::storage::CounterStore;

/// Outcome of one admission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    /// The policy's steady-state ceiling
    pub limit: u64,
    /// `limit - count`, floored at zero
    pub remaining: u64,
    /// End of the primary window, epoch milliseconds
    pub reset_at_ms: u64,
    pub used_burst: bool,
}

impl Decision {
    fn allow(limit: u64, count: u64, reset_at_ms: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at_ms,
            used_burst: false,
        }
    }

    fn burst(limit: u64, reset_at_ms: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: 0,
            reset_at_ms,
            used_burst: true,
        }
    }

    fn deny(limit: u64, reset_at_ms: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at_ms,
            used_burst: false,
        }
    }

    /// Reset instant as epoch seconds, rounded up
    pub fn reset_epoch_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }

    /// Seconds a denied caller should wait, never less than one
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
    }
}

/// Fixed-window admission check with an optional burst allowance.
///
/// The primary counter is always incremented. The burst counter, kept under
/// `"{scope}:burst"` with its own shorter window, is only touched once the
/// primary ceiling has been passed. Both counts are compared inclusively:
/// the Nth request of a window is admitted and the N+1th is not.
///
/// `check` never returns an error. A store failure that survives the store's
/// own fallback is logged, counted and admitted.
#[derive(Debug)]
pub struct RateLimiter<S>
where
    S: CounterStore,
{
    window: FixedWindow<S>,
    clock: Arc<dyn Clock>,
    metrics: Arc<AdmissionMetrics>,
}

impl<S> RateLimiter<S>
where
    S: CounterStore,
{
    pub fn new(store: S, clock: Arc<dyn Clock>, metrics: Arc<AdmissionMetrics>) -> Self {
        Self {
            window: FixedWindow::new(store),
            clock,
            metrics,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &S {
        self.window.storage()
    }

    pub fn metrics(&self) -> &Arc<AdmissionMetrics> {
        &self.metrics
    }

    pub async fn check(&self, identity: &str, policy: &Policy) -> Decision {
        let scope = policy.scope.as_str();
        let now_ms = self.clock.now_ms();

        let primary = match self
            .window
            .increment(scope, identity, policy.window, now_ms)
            .await
        {
            Ok(primary) => primary,
            Err(e) => {
                error!(
                    scope = %scope,
                    identity,
                    error = %e,
                    "Counter store failed, admitting request"
                );
                self.metrics.record_store_error(scope);
                let reset_at_ms =
                    crate::algorithms::window_start(now_ms, policy.window) + policy.window_ms();
                return Decision::allow(policy.max_requests, 0, reset_at_ms);
            }
        };

        let decision = if primary.count <= policy.max_requests {
            Decision::allow(policy.max_requests, primary.count, primary.reset_at_ms)
        } else {
            match &policy.burst {
                Some(burst) if burst.max_requests > 0 => {
                    let burst_scope = policy.burst_scope();
                    match self
                        .window
                        .increment(&burst_scope, identity, burst.window, now_ms)
                        .await
                    {
                        Ok(extra) if extra.count <= burst.max_requests => {
                            info!(
                                scope = %scope,
                                identity,
                                burst_count = extra.count,
                                burst_limit = burst.max_requests,
                                "Request admitted from burst allowance"
                            );
                            Decision::burst(policy.max_requests, primary.reset_at_ms)
                        }
                        Ok(_) => Decision::deny(policy.max_requests, primary.reset_at_ms),
                        Err(e) => {
                            error!(
                                scope = %burst_scope,
                                identity,
                                error = %e,
                                "Burst counter failed, admitting request"
                            );
                            self.metrics.record_store_error(scope);
                            return Decision::burst(policy.max_requests, primary.reset_at_ms);
                        }
                    }
                }
                _ => Decision::deny(policy.max_requests, primary.reset_at_ms),
            }
        };

        self.metrics.record_decision(scope, &decision);
        crate::admission_event!(scope, identity, decision);
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up_and_floors_at_one() {
        let decision = Decision::deny(5, 300_000);
        assert_eq!(decision.retry_after_secs(0), 300);
        assert_eq!(decision.retry_after_secs(1), 300);
        assert_eq!(decision.retry_after_secs(299_001), 1);
        assert_eq!(decision.retry_after_secs(299_999), 1);
        assert_eq!(decision.retry_after_secs(400_000), 1);
        assert_eq!(decision.reset_epoch_secs(), 300);
    }

    #[test]
    fn test_denied_decision_keeps_primary_reset() {
        let (limiter, _clock) = crate::test_utils::local_limiter();
        let policy = Policy::new("auth:register", 1, std::time::Duration::from_secs(3600))
            .with_burst(1, std::time::Duration::from_secs(60));

        let first = tokio_test::block_on(limiter.check("ip:203.0.113.1", &policy));
        let burst = tokio_test::block_on(limiter.check("ip:203.0.113.1", &policy));
        let denied = tokio_test::block_on(limiter.check("ip:203.0.113.1", &policy));

        assert!(first.allowed && !first.used_burst);
        assert!(burst.allowed && burst.used_burst);
        assert!(!denied.allowed);
        assert_eq!(denied.reset_at_ms, crate::test_utils::T0_MS + 3_600_000);
    }

    #[test]
    fn test_remaining_never_negative() {
        assert_eq!(Decision::allow(5, 7, 0).remaining, 0);
        assert_eq!(Decision::allow(5, 5, 0).remaining, 0);
        assert_eq!(Decision::allow(5, 1, 0).remaining, 4);
    }
}
