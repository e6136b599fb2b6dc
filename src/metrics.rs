use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::fmt;
use std::time::Duration;

use crate::error::{AdmissionError, Result};
use crate::limiter::Decision;

/// Operator-facing counters for the admission core.
///
/// Each instance owns its registry, so independent limiters (and tests) never
/// share counters.
#[derive(Clone)]
pub struct AdmissionMetrics {
    registry: Registry,
    decisions: IntCounterVec,
    fallbacks: IntCounterVec,
    remote_latency: Histogram,
    reaped: IntCounter,
    local_entries: IntGauge,
}

// Registry internals are left out; only the reaper figures are shown
impl fmt::Debug for AdmissionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionMetrics")
            .field("reaped", &self.reaped.get())
            .field("local_entries", &self.local_entries.get())
            .finish_non_exhaustive()
    }
}

impl AdmissionMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let decisions = IntCounterVec::new(
            Opts::new("admission_decisions_total", "Admission decisions by outcome"),
            &["scope", "outcome"],
        )?;
        let fallbacks = IntCounterVec::new(
            Opts::new(
                "admission_backend_fallbacks_total",
                "Checks served by local counters instead of the shared store",
            ),
            &["reason"],
        )?;
        let remote_latency = Histogram::with_opts(
            HistogramOpts::new(
                "admission_remote_latency_seconds",
                "Latency of successful shared-store increments",
            )
            .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25]),
        )?;
        let reaped = IntCounter::new(
            "admission_reaped_entries_total",
            "Expired local counters removed by the reaper",
        )?;
        let local_entries = IntGauge::new(
            "admission_local_entries",
            "Local counters held after the last sweep",
        )?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(fallbacks.clone()))?;
        registry.register(Box::new(remote_latency.clone()))?;
        registry.register(Box::new(reaped.clone()))?;
        registry.register(Box::new(local_entries.clone()))?;

        Ok(Self {
            registry,
            decisions,
            fallbacks,
            remote_latency,
            reaped,
            local_entries,
        })
    }

    pub fn record_decision(&self, scope: &str, decision: &Decision) {
        let outcome = if !decision.allowed {
            "denied"
        } else if decision.used_burst {
            "burst"
        } else {
            "allowed"
        };
        self.decisions.with_label_values(&[scope, outcome]).inc();
    }

    pub fn record_store_error(&self, scope: &str) {
        self.decisions
            .with_label_values(&[scope, "store_error"])
            .inc();
    }

    pub fn record_fallback(&self, reason: &str) {
        self.fallbacks.with_label_values(&[reason]).inc();
    }

    pub fn observe_remote_latency(&self, elapsed: Duration) {
        self.remote_latency.observe(elapsed.as_secs_f64());
    }

    pub fn record_sweep(&self, removed: usize, remaining: usize) {
        self.reaped.inc_by(removed as u64);
        self.local_entries.set(remaining as i64);
    }

    pub fn decisions_total(&self, scope: &str, outcome: &str) -> u64 {
        self.decisions.with_label_values(&[scope, outcome]).get()
    }

    pub fn fallbacks_total(&self, reason: &str) -> u64 {
        self.fallbacks.with_label_values(&[reason]).get()
    }

    pub fn reaped_total(&self) -> u64 {
        self.reaped.get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format, as served on `/metrics`
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| AdmissionError::Metrics(e.to_string()))
    }
}
