//! Fixed-window admission control for axum services, counted in Redis with
//! a process-local fallback.

pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod policy;
pub mod resilience;
pub mod service;
pub mod storage;

#[cfg(test)]
mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AdmissionConfig;
pub use error::{AdmissionError, Result};
pub use limiter::{Decision, RateLimiter};
pub use logging::init as init_logging;
pub use middleware::{ApiKeyPrincipal, CallerIdentity, Principal, ScopedAdmission};
pub use policy::{Policy, PolicyRegistry, Scope};
pub use service::Admission;
