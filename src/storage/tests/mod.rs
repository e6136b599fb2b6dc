// src/storage/tests/mod.rs

mod memory_tests;

// Common utilities for storage tests
pub(crate) mod common {
    use std::time::Duration;

    use crate::error::Result;
    use crate::storage::{CounterKey, CounterStore};

    // Increment semantics every backend must share
    pub async fn test_increment_sequence<S: CounterStore>(
        storage: &S,
        key: &CounterKey,
    ) -> Result<()> {
        let window = Duration::from_secs(60);

        for expected in 1..=5 {
            assert_eq!(storage.increment_and_get(key, window).await?, expected);
        }

        // A different identity in the same window has its own counter
        let other = CounterKey::new(
            key.scope.clone(),
            format!("{}-other", key.identity),
            key.window_start_ms,
        );
        assert_eq!(storage.increment_and_get(&other, window).await?, 1);

        // So does the next window for the same identity
        let next = CounterKey::new(
            key.scope.clone(),
            key.identity.clone(),
            key.window_start_ms + window.as_millis() as u64,
        );
        assert_eq!(storage.increment_and_get(&next, window).await?, 1);
        assert_eq!(storage.increment_and_get(key, window).await?, 6);

        Ok(())
    }
}
