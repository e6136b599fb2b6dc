use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use crate::config::CircuitBreakerConfig;

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, checks go to the shared store
    Closed,
    /// Circuit is open, checks skip the shared store entirely
    Open,
    /// Probing: checks go to the shared store until it proves healthy or fails again
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding the shared counter store.
///
/// While open, checks fall back to local counters immediately instead of
/// paying the remote timeout on every request.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: RwLock<BreakerState>,
    /// Count of consecutive failures
    failure_count: AtomicUsize,
    /// Count of consecutive successes while half-open
    success_count: AtomicUsize,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
            }),
            failure_count: AtomicUsize::new(0),
            success_count: AtomicUsize::new(0),
            config,
        }
    }

    /// Check if the circuit breaker allows a remote call
    pub async fn allow_request(&self) -> bool {
        {
            let inner = self.inner.read().await;
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => return true,
                CircuitState::Open => {
                    let cooled_down = inner
                        .opened_at
                        .map(|at| at.elapsed() >= self.config.reset_timeout)
                        .unwrap_or(true);
                    if !cooled_down {
                        return false;
                    }
                }
            }
        }

        // Re-check under the write lock; another caller may have moved on already
        let mut inner = self.inner.write().await;
        if inner.state == CircuitState::Open {
            inner.state = CircuitState::HalfOpen;
            self.success_count.store(0, Ordering::SeqCst);
            debug!("Circuit breaker half-open, probing shared counter store");
        }
        true
    }

    /// Record a successful remote call
    pub async fn record_success(&self) {
        let current = self.inner.read().await.state;

        match current {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    let mut inner = self.inner.write().await;
                    if inner.state == CircuitState::HalfOpen {
                        inner.state = CircuitState::Closed;
                        inner.opened_at = None;
                        self.success_count.store(0, Ordering::SeqCst);
                        self.failure_count.store(0, Ordering::SeqCst);
                        info!("Circuit breaker closed, shared counter store recovered");
                    }
                }
            }
            CircuitState::Open => {
                // a call admitted before the circuit opened finished late
            }
        }
    }

    /// Record a failed remote call
    pub async fn record_failure(&self) {
        let current = self.inner.read().await.state;

        match current {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    let mut inner = self.inner.write().await;
                    if inner.state == CircuitState::Closed {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        warn!(
                            failures,
                            "Circuit breaker opened, serving checks from local counters"
                        );
                    }
                }
            }
            CircuitState::HalfOpen => {
                let mut inner = self.inner.write().await;
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                self.success_count.store(0, Ordering::SeqCst);
                warn!("Circuit breaker re-opened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state of the circuit breaker
    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }
}
