// src/algorithms/fixed_window.rs

use crate::error::Result;
use crate::storage::{CounterKey, CounterStore};
use std::time::Duration;

/// Fixed Window counting
///
/// The fixed window algorithm divides time into windows aligned to multiples
/// of the window length and counts requests per window. The window start is
/// part of the counter key, so a new window starts a fresh counter without
/// any reset step.
#[derive(Debug)]
pub struct FixedWindow<S>
where
    S: CounterStore,
{
    /// Storage backend for the window counters
    storage: S,
}

/// Result of one increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    pub reset_at_ms: u64,
}

/// Start of the window containing `now_ms`
pub fn window_start(now_ms: u64, window: Duration) -> u64 {
    let window_ms = (window.as_millis() as u64).max(1);
    now_ms - (now_ms % window_ms)
}

impl<S> FixedWindow<S>
where
    S: CounterStore,
{
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Key of the counter for `identity` in the window containing `now_ms`
    pub fn key(&self, scope: &str, identity: &str, window: Duration, now_ms: u64) -> CounterKey {
        CounterKey::new(scope, identity, window_start(now_ms, window))
    }

    /// Count one request and return the window's new total.
    ///
    /// Increment-then-compare: the caller decides on the returned count, so
    /// there is no read-then-write gap for concurrent callers to race through.
    pub async fn increment(
        &self,
        scope: &str,
        identity: &str,
        window: Duration,
        now_ms: u64,
    ) -> Result<WindowCount> {
        let key = self.key(scope, identity, window, now_ms);
        let count = self.storage.increment_and_get(&key, window).await?;

        Ok(WindowCount {
            count,
            reset_at_ms: key.reset_at_ms(window),
        })
    }
}
