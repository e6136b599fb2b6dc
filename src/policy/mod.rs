// src/policy/mod.rs
//! Static rate-limit policies keyed by scope.
//!
//! A [`PolicyRegistry`] is built once at startup, either from the compiled-in
//! table or from a JSON policy file, and is immutable afterwards. Every policy
//! is validated during the build and every lookup of an unknown scope is a
//! configuration error, so a route can never silently run without a limit.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{AdmissionError, Result};

/// Scopes known at compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    AuthLogin,
    AuthRegister,
    AuthPasswordReset,
    ApiGeneral,
    ApiTimeEntries,
    ApiExport,
    IpGlobal,
}

impl Scope {
    pub const ALL: [Scope; 7] = [
        Scope::AuthLogin,
        Scope::AuthRegister,
        Scope::AuthPasswordReset,
        Scope::ApiGeneral,
        Scope::ApiTimeEntries,
        Scope::ApiExport,
        Scope::IpGlobal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::AuthLogin => "auth:login",
            Scope::AuthRegister => "auth:register",
            Scope::AuthPasswordReset => "auth:password-reset",
            Scope::ApiGeneral => "api:general",
            Scope::ApiTimeEntries => "api:time-entries",
            Scope::ApiExport => "api:export",
            Scope::IpGlobal => "ip:global",
        }
    }

    /// The policy this scope gets when no policy file overrides it
    pub fn default_policy(&self) -> Policy {
        let minute = Duration::from_secs(60);
        match self {
            Scope::AuthLogin => {
                Policy::new(self.as_str(), 5, Duration::from_secs(300)).allow_anonymous()
            }
            Scope::AuthRegister => {
                Policy::new(self.as_str(), 3, Duration::from_secs(3_600)).allow_anonymous()
            }
            Scope::AuthPasswordReset => {
                Policy::new(self.as_str(), 3, Duration::from_secs(900)).allow_anonymous()
            }
            Scope::ApiGeneral => Policy::new(self.as_str(), 1_000, minute)
                .with_burst(100, Duration::from_secs(10)),
            Scope::ApiTimeEntries => Policy::new(self.as_str(), 300, minute)
                .with_burst(60, Duration::from_secs(5)),
            Scope::ApiExport => Policy::new(self.as_str(), 10, Duration::from_secs(3_600)),
            Scope::IpGlobal => Policy::new(self.as_str(), 600, minute).allow_anonymous(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self> {
        Scope::ALL
            .iter()
            .copied()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| AdmissionError::Config(format!("unknown scope '{}'", s)))
    }
}

/// Short-horizon allowance consulted only once the primary window is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstAllowance {
    pub max_requests: u64,
    pub window: Duration,
}

/// Limit applied to one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub scope: String,
    pub max_requests: u64,
    pub window: Duration,
    pub burst: Option<BurstAllowance>,
    /// When false, anonymous callers are limited by client address
    pub requires_principal: bool,
}

impl Policy {
    pub fn new(scope: impl Into<String>, max_requests: u64, window: Duration) -> Self {
        Self {
            scope: scope.into(),
            max_requests,
            window,
            burst: None,
            requires_principal: true,
        }
    }

    /// Adds a burst allowance; a zero count removes it
    pub fn with_burst(mut self, max_requests: u64, window: Duration) -> Self {
        self.burst = if max_requests == 0 {
            None
        } else {
            Some(BurstAllowance {
                max_requests,
                window,
            })
        };
        self
    }

    pub fn allow_anonymous(mut self) -> Self {
        self.requires_principal = false;
        self
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }

    /// Counter scope used for the burst allowance
    pub fn burst_scope(&self) -> String {
        format!("{}:burst", self.scope)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scope.trim().is_empty() {
            return Err(AdmissionError::Config(
                "policy scope must not be empty".to_string(),
            ));
        }
        if self.max_requests == 0 {
            return Err(AdmissionError::Config(format!(
                "policy '{}': max requests must be greater than zero",
                self.scope
            )));
        }
        if self.window_ms() == 0 {
            return Err(AdmissionError::Config(format!(
                "policy '{}': window must be at least one millisecond",
                self.scope
            )));
        }
        if let Some(burst) = &self.burst {
            if burst.window.as_millis() == 0 {
                return Err(AdmissionError::Config(format!(
                    "policy '{}': burst window must be at least one millisecond",
                    self.scope
                )));
            }
            if burst.window >= self.window {
                return Err(AdmissionError::Config(format!(
                    "policy '{}': burst window {:?} must be shorter than the window {:?}",
                    self.scope, burst.window, self.window
                )));
            }
        }
        Ok(())
    }
}

/// One row of a JSON policy table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PolicySpec {
    requests: u64,
    window_ms: u64,
    #[serde(default)]
    burst_requests: Option<u64>,
    #[serde(default)]
    burst_window_ms: Option<u64>,
    #[serde(default = "default_requires_principal")]
    requires_principal: bool,
}

fn default_requires_principal() -> bool {
    true
}

impl PolicySpec {
    fn into_policy(self, scope: String) -> Result<Policy> {
        let mut policy = Policy::new(scope, self.requests, Duration::from_millis(self.window_ms));
        policy.requires_principal = self.requires_principal;

        match (self.burst_requests, self.burst_window_ms) {
            (Some(0), _) | (None, None) => {}
            (Some(requests), Some(window_ms)) => {
                policy = policy.with_burst(requests, Duration::from_millis(window_ms));
            }
            (Some(_), None) => {
                return Err(AdmissionError::Config(format!(
                    "policy '{}': burstRequests requires burstWindowMs",
                    policy.scope
                )));
            }
            (None, Some(_)) => {
                return Err(AdmissionError::Config(format!(
                    "policy '{}': burstWindowMs given without burstRequests",
                    policy.scope
                )));
            }
        }

        Ok(policy)
    }
}

/// Immutable lookup from scope name to policy
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<Policy>>,
}

/// Collects policies and validates them all at once in [`build`](Self::build)
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    policies: Vec<Policy>,
}

impl PolicyRegistryBuilder {
    pub fn register(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn build(self) -> Result<PolicyRegistry> {
        if self.policies.is_empty() {
            return Err(AdmissionError::Config("policy table is empty".to_string()));
        }

        let mut policies = HashMap::with_capacity(self.policies.len());
        for policy in self.policies {
            policy.validate()?;
            if policies.contains_key(&policy.scope) {
                return Err(AdmissionError::Config(format!(
                    "scope '{}' registered twice",
                    policy.scope
                )));
            }
            policies.insert(policy.scope.clone(), Arc::new(policy));
        }

        // A scope named like another policy's burst counters would share them
        for policy in policies.values() {
            if policy.burst.is_none() {
                continue;
            }
            let burst_scope = policy.burst_scope();
            if policies.contains_key(&burst_scope) {
                return Err(AdmissionError::Config(format!(
                    "scope '{}' collides with the burst counters of '{}'",
                    burst_scope, policy.scope
                )));
            }
        }

        Ok(PolicyRegistry { policies })
    }
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// Registry holding the default policy of every compiled-in scope
    pub fn with_defaults() -> Result<Self> {
        Scope::ALL
            .iter()
            .fold(Self::builder(), |builder, scope| {
                builder.register(scope.default_policy())
            })
            .build()
    }

    /// Parse a JSON table of the form `{ "auth:login": { "requests": 5, "windowMs": 300000 } }`
    pub fn from_json(json: &str) -> Result<Self> {
        let table: BTreeMap<String, PolicySpec> = serde_json::from_str(json)?;

        let mut builder = Self::builder();
        for (scope, spec) in table {
            builder = builder.register(spec.into_policy(scope)?);
        }
        builder.build()
    }

    /// Load a JSON policy table from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path).map_err(|e| {
            AdmissionError::Config(format!(
                "cannot read policy file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&contents)
    }

    /// Look up the policy for a scope, failing closed on unknown names
    pub fn resolve(&self, scope: &str) -> Result<Arc<Policy>> {
        self.policies.get(scope).cloned().ok_or_else(|| {
            AdmissionError::Config(format!(
                "no rate limit policy registered for scope '{}'",
                scope
            ))
        })
    }

    pub fn policy(&self, scope: Scope) -> Result<Arc<Policy>> {
        self.resolve(scope.as_str())
    }

    /// Registered scope names, sorted
    pub fn scopes(&self) -> Vec<&str> {
        let mut scopes: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        scopes.sort_unstable();
        scopes
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
