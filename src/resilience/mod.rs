// src/resilience/mod.rs
//! Degraded-mode machinery for the admission core.
//!
//! 1. **Fallback** - a failed or slow shared-store increment is served by local counters in the same call
//! 2. **Circuit Breaking** - a store that keeps failing is skipped until it recovers
//! 3. **Reaping** - expired local counters are evicted periodically to bound memory

mod circuit_breaker;
mod fallback_store;
mod reaper;

#[cfg(test)]
mod tests;

// Re-export key components
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use fallback_store::FallbackCounterStore;
pub use reaper::{Reaper, ReaperHandle};
