// src/storage/memory.rs

// Process-local counters, used when the shared store is disabled or unreachable.
// Limits enforced here are per instance: a fleet of N instances admits up to
// N times the configured limit while running in this mode.
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::InMemoryConfig;
use crate::error::Result;
use crate::storage::{CounterKey, CounterRecord, CounterStore};

/// In-memory counter backend.
///
/// The map is sharded, and both increments and reaping lock only the shard
/// that owns a key, so traffic for unrelated identities never serializes on
/// a single mutex.
#[derive(Debug, Clone)]
pub struct LocalCounterBackend {
    entries: Arc<DashMap<CounterKey, CounterRecord>>,
    clock: Arc<dyn Clock>,
}

impl LocalCounterBackend {
    /// Creates a new local backend with the given configuration
    pub fn new(config: &InMemoryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &InMemoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::with_capacity(config.initial_capacity)),
            clock,
        }
    }

    /// Remove every record whose window has ended. Returns how many were removed.
    pub fn reap_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        self.entries.retain(|_, record| {
            let keep = !record.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });

        removed
    }

    /// Snapshot of the record stored for a key, if any
    pub fn record(&self, key: &CounterKey) -> Option<CounterRecord> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CounterStore for LocalCounterBackend {
    async fn increment_and_get(&self, key: &CounterKey, window: Duration) -> Result<u64> {
        let now = self.clock.now_ms();
        let reset_at_ms = key.reset_at_ms(window);

        // The entry guard holds the shard write lock until it is dropped
        let mut entry = self
            .entries
            .entry(key.clone())
            .or_insert(CounterRecord {
                count: 0,
                reset_at_ms,
            });

        if entry.is_expired(now) {
            *entry = CounterRecord {
                count: 1,
                reset_at_ms,
            };
        } else {
            entry.count += 1;
        }

        Ok(entry.count)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
