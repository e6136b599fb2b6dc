// src/test_utils.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, ManualClock};
use crate::config::InMemoryConfig;
use crate::error::{AdmissionError, Result, StorageError};
use crate::metrics::AdmissionMetrics;
use crate::policy::Policy;
use crate::resilience::FallbackCounterStore;
use crate::storage::{CounterKey, CounterStore, LocalCounterBackend};
use crate::RateLimiter;

/// 2023-11-14T22:00:00Z, on an hour boundary so every test window starts here
pub const T0_MS: u64 = 1_699_999_200_000;

/// Stand-in for a shared counter store that can be told to fail or hang
#[derive(Debug)]
pub struct MockCounterStore {
    inner: LocalCounterBackend,
    failing: AtomicBool,
    hang: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl MockCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: LocalCounterBackend::with_clock(&InMemoryConfig::default(), clock),
            failing: AtomicBool::new(false),
            hang: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every increment by `delay`, or stop delaying with `None`
    pub fn set_hang(&self, delay: Option<Duration>) {
        *self.hang.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for MockCounterStore {
    async fn increment_and_get(&self, key: &CounterKey, window: Duration) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.hang.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(AdmissionError::Storage(StorageError::RedisConnection(
                "Connection refused (simulated)".to_string(),
            )));
        }

        self.inner.increment_and_get(key, window).await
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Limiter over local counters driven by a manual clock starting at [`T0_MS`]
pub fn local_limiter() -> (RateLimiter<FallbackCounterStore>, ManualClock) {
    let clock = ManualClock::new(T0_MS);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let metrics = Arc::new(AdmissionMetrics::new().unwrap());
    let local = Arc::new(LocalCounterBackend::with_clock(
        &InMemoryConfig::default(),
        Arc::clone(&shared),
    ));
    let store = FallbackCounterStore::local_only(local, Arc::clone(&metrics));

    (RateLimiter::new(store, shared, metrics), clock)
}

/// Run `count` sequential checks and return how many were admitted
pub async fn admitted<S: CounterStore>(
    limiter: &RateLimiter<S>,
    identity: &str,
    policy: &Policy,
    count: usize,
) -> usize {
    let mut admitted = 0;
    for _ in 0..count {
        if limiter.check(identity, policy).await.allowed {
            admitted += 1;
        }
    }
    admitted
}
