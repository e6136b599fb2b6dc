// src/resilience/tests/mod.rs
//! Tests for degraded-mode behaviour

mod circuit_breaker_tests;
mod reaper_tests;

// Common test utilities for resilience testing
pub(crate) mod utils {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::clock::{Clock, ManualClock};
    use crate::config::{CircuitBreakerConfig, InMemoryConfig, ResilienceConfig};
    use crate::metrics::AdmissionMetrics;
    use crate::resilience::FallbackCounterStore;
    use crate::storage::{CounterStore, LocalCounterBackend};
    use crate::test_utils::{MockCounterStore, T0_MS};

    pub struct Harness {
        pub remote: Arc<MockCounterStore>,
        pub local: Arc<LocalCounterBackend>,
        pub metrics: Arc<AdmissionMetrics>,
        pub store: FallbackCounterStore,
        pub clock: ManualClock,
    }

    pub fn resilience_config(
        remote_timeout: Duration,
        failure_threshold: usize,
    ) -> ResilienceConfig {
        ResilienceConfig {
            remote_timeout,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold,
                reset_timeout: Duration::from_secs(10),
                success_threshold: 1,
            },
        }
    }

    /// Fallback store over a mock shared store, both on one manual clock
    pub fn harness(config: ResilienceConfig) -> Harness {
        let clock = ManualClock::new(T0_MS);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let remote = Arc::new(MockCounterStore::new(Arc::clone(&shared)));
        let local = Arc::new(LocalCounterBackend::with_clock(
            &InMemoryConfig::default(),
            shared,
        ));
        let metrics = Arc::new(AdmissionMetrics::new().unwrap());
        let remote_store: Arc<dyn CounterStore> = remote.clone();
        let store = FallbackCounterStore::new(
            Some(remote_store),
            Arc::clone(&local),
            &config,
            Arc::clone(&metrics),
        );

        Harness {
            remote,
            local,
            metrics,
            store,
            clock,
        }
    }
}
