// src/service.rs

use axum::middleware::from_fn_with_state;
use axum::Router;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::AdmissionConfig;
use crate::error::Result;
use crate::limiter::{Decision, RateLimiter};
use crate::metrics::AdmissionMetrics;
use crate::middleware::{admit, AdmissionLimiter, ScopedAdmission};
use crate::policy::PolicyRegistry;
use crate::resilience::{FallbackCounterStore, Reaper, ReaperHandle};
use crate::storage::{CounterStore, LocalCounterBackend, RemoteCounterBackend};

/// Everything a process needs to admit requests: the policy table, the
/// limiter over its fallback store, local counters and metrics.
///
/// Cheap to clone; clones share counters.
#[derive(Debug, Clone)]
pub struct Admission {
    registry: Arc<PolicyRegistry>,
    limiter: Arc<AdmissionLimiter>,
    local: Arc<LocalCounterBackend>,
    metrics: Arc<AdmissionMetrics>,
    config: AdmissionConfig,
}

impl Admission {
    /// Assemble from configuration.
    ///
    /// Policy and configuration problems are fatal here. An unreachable Redis
    /// is not: it is logged and checks run on local counters until it returns.
    pub async fn from_config(config: AdmissionConfig) -> Result<Self> {
        config.validate()?;

        let registry = match &config.policy_file {
            Some(path) => PolicyRegistry::from_file(path)?,
            None => PolicyRegistry::with_defaults()?,
        };

        let remote: Option<Arc<dyn CounterStore>> = if config.remote_enabled {
            let backend = RemoteCounterBackend::new(config.redis.clone())?;
            match backend.ping().await {
                Ok(()) => info!(url = %config.redis.url, "Connected to shared counter store"),
                Err(e) => warn!(
                    url = %config.redis.url,
                    error = %e,
                    "Shared counter store unreachable at startup, limiting locally until it recovers"
                ),
            }
            let remote: Arc<dyn CounterStore> = Arc::new(backend);
            Some(remote)
        } else {
            info!("Shared counter store disabled, limits apply per instance");
            None
        };

        Self::assemble(registry, remote, Arc::new(SystemClock), config)
    }

    /// Single-instance admission with no shared store
    pub fn local_only(registry: PolicyRegistry, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::assemble(registry, None, clock, AdmissionConfig::default())
    }

    /// Same as [`Admission::local_only`] but over an arbitrary shared store,
    /// which is how degraded-mode behaviour is exercised without Redis
    pub fn with_remote(
        registry: PolicyRegistry,
        remote: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        config: AdmissionConfig,
    ) -> Result<Self> {
        Self::assemble(registry, Some(remote), clock, config)
    }

    fn assemble(
        registry: PolicyRegistry,
        remote: Option<Arc<dyn CounterStore>>,
        clock: Arc<dyn Clock>,
        config: AdmissionConfig,
    ) -> Result<Self> {
        let metrics = Arc::new(AdmissionMetrics::new()?);
        let local = Arc::new(LocalCounterBackend::with_clock(
            &config.memory,
            Arc::clone(&clock),
        ));
        let store = FallbackCounterStore::new(
            remote,
            Arc::clone(&local),
            &config.resilience,
            Arc::clone(&metrics),
        );
        let limiter = Arc::new(RateLimiter::new(store, clock, Arc::clone(&metrics)));

        info!(
            policies = registry.len(),
            backend = limiter.store().name(),
            "Admission control ready"
        );

        Ok(Self {
            registry: Arc::new(registry),
            limiter,
            local,
            metrics,
            config,
        })
    }

    /// Middleware state for `scope`; fails if the scope is not registered
    pub fn guard(&self, scope: &str) -> Result<ScopedAdmission> {
        let policy = self.registry.resolve(scope)?;
        Ok(ScopedAdmission::new(
            Arc::clone(&self.limiter),
            policy,
            self.config.trust_forwarded_for,
        ))
    }

    /// Put every route already on `router` behind the policy for `scope`.
    ///
    /// Routes added after this call are not limited.
    pub fn limit_router<S>(&self, router: Router<S>, scope: &str) -> Result<Router<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        let guard = self.guard(scope)?;
        Ok(router.route_layer(from_fn_with_state(guard, admit)))
    }

    /// Check one request outside of HTTP handling
    pub async fn check(&self, identity: &str, scope: &str) -> Result<Decision> {
        let policy = self.registry.resolve(scope)?;
        Ok(self.limiter.check(identity, &policy).await)
    }

    /// Start the local-counter reaper, unless disabled in configuration
    pub fn spawn_reaper(&self) -> Option<ReaperHandle> {
        if !self.config.memory.reaper_enabled {
            return None;
        }

        let reaper = Reaper::new(
            Arc::clone(&self.local),
            Arc::clone(&self.metrics),
            self.config.memory.reaper_interval,
        );
        Some(reaper.spawn())
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn limiter(&self) -> &Arc<AdmissionLimiter> {
        &self.limiter
    }

    pub fn local(&self) -> &Arc<LocalCounterBackend> {
        &self.local
    }

    pub fn metrics(&self) -> &Arc<AdmissionMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }
}
