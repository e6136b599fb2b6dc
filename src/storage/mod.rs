// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::LocalCounterBackend;
pub use redis::RemoteCounterBackend;

use super::error::Result;
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

/// Window-scoped counter identifier.
///
/// Because the window start is part of the key, a new window automatically
/// gets a new counter; nothing ever resets an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub scope: String,
    pub identity: String,
    pub window_start_ms: u64,
}

impl CounterKey {
    pub fn new(scope: impl Into<String>, identity: impl Into<String>, window_start_ms: u64) -> Self {
        Self {
            scope: scope.into(),
            identity: identity.into(),
            window_start_ms,
        }
    }

    /// End of the window this key belongs to
    pub fn reset_at_ms(&self, window: Duration) -> u64 {
        self.window_start_ms + window.as_millis() as u64
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.scope, self.identity, self.window_start_ms)
    }
}

/// Count observed for one key together with the end of its window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    pub count: u64,
    pub reset_at_ms: u64,
}

impl CounterRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at_ms
    }
}

/// Atomically increment a window counter and learn its new value.
///
/// Implementations must create the counter if absent and must never expose a
/// read-then-write window to concurrent callers on the same key.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    async fn increment_and_get(&self, key: &CounterKey, window: Duration) -> Result<u64>;

    /// Short backend name for logs and metrics
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<T> CounterStore for Arc<T>
where
    T: CounterStore + ?Sized,
{
    async fn increment_and_get(&self, key: &CounterKey, window: Duration) -> Result<u64> {
        (**self).increment_and_get(key, window).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
