// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AdmissionError, Result};

/// Top-level configuration for the admission-control core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Whether the shared Redis counter store is used at all.
    /// When false every instance limits on its own local counters.
    #[serde(default)]
    pub remote_enabled: bool,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub memory: InMemoryConfig,

    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Optional JSON policy table; the built-in table is used when absent
    #[serde(default)]
    pub policy_file: Option<PathBuf>,

    /// Whether the first `X-Forwarded-For` entry identifies anonymous callers
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Address the demo server listens on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            remote_enabled: false,
            redis: RedisConfig::default(),
            memory: InMemoryConfig::default(),
            resilience: ResilienceConfig::default(),
            policy_file: None,
            trust_forwarded_for: false,
            bind_addr: default_bind_addr(),
        }
    }
}

/// Configuration for the Redis counter backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix for every counter key written to Redis
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Extra lifetime given to remote counters past their window end, to absorb clock skew
    #[serde(default = "default_expiry_grace", with = "duration_serde")]
    pub expiry_grace: Duration,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "admission".to_string()
}

fn default_conn_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_expiry_grace() -> Duration {
    Duration::from_secs(1)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            connection_timeout: default_conn_timeout(),
            expiry_grace: default_expiry_grace(),
        }
    }
}

/// Configuration for the in-process counter backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Initial capacity of the counter map
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Whether to run the background reaper
    #[serde(default = "default_reaper_enabled")]
    pub reaper_enabled: bool,

    /// How often the reaper sweeps expired counters
    #[serde(default = "default_reaper_interval", with = "duration_serde")]
    pub reaper_interval: Duration,
}

fn default_initial_capacity() -> usize {
    1_024
}

fn default_reaper_enabled() -> bool {
    true
}

fn default_reaper_interval() -> Duration {
    Duration::from_secs(120)
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
            reaper_enabled: default_reaper_enabled(),
            reaper_interval: default_reaper_interval(),
        }
    }
}

/// Configuration for the remote-then-local fallback path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Upper bound on a single remote increment before falling back locally
    #[serde(default = "default_remote_timeout", with = "duration_serde")]
    pub remote_timeout: Duration,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_remote_timeout() -> Duration {
    Duration::from_millis(250)
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            remote_timeout: default_remote_timeout(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    /// Duration to keep the circuit open before transitioning to half-open
    #[serde(default = "default_reset_timeout", with = "duration_serde")]
    pub reset_timeout: Duration,
    /// Number of consecutive successes in half-open state to close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: usize,
}

fn default_failure_threshold() -> usize {
    5
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_success_threshold() -> usize {
    2
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl AdmissionConfig {
    /// Load configuration from the process environment.
    ///
    /// Callers that want `.env` support should call `dotenv().ok()` first.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset variables keep their defaults; set but unparseable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("ADMISSION_REMOTE_ENABLED") {
            config.remote_enabled = parse_bool("ADMISSION_REMOTE_ENABLED", &value)?;
        }
        if let Some(value) = lookup("ADMISSION_REDIS_URL") {
            config.redis.url = value;
        }
        if let Some(value) = lookup("ADMISSION_REDIS_KEY_PREFIX") {
            config.redis.key_prefix = value;
        }
        if let Some(value) = lookup("ADMISSION_REDIS_CONNECT_TIMEOUT_MS") {
            config.redis.connection_timeout =
                Duration::from_millis(parse_number("ADMISSION_REDIS_CONNECT_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("ADMISSION_REDIS_EXPIRY_GRACE_MS") {
            config.redis.expiry_grace =
                Duration::from_millis(parse_number("ADMISSION_REDIS_EXPIRY_GRACE_MS", &value)?);
        }
        if let Some(value) = lookup("ADMISSION_LOCAL_CAPACITY") {
            config.memory.initial_capacity =
                parse_number("ADMISSION_LOCAL_CAPACITY", &value)? as usize;
        }
        if let Some(value) = lookup("ADMISSION_REAPER_ENABLED") {
            config.memory.reaper_enabled = parse_bool("ADMISSION_REAPER_ENABLED", &value)?;
        }
        if let Some(value) = lookup("ADMISSION_REAPER_INTERVAL_SECS") {
            config.memory.reaper_interval =
                Duration::from_secs(parse_number("ADMISSION_REAPER_INTERVAL_SECS", &value)?);
        }
        if let Some(value) = lookup("ADMISSION_REMOTE_TIMEOUT_MS") {
            config.resilience.remote_timeout =
                Duration::from_millis(parse_number("ADMISSION_REMOTE_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("ADMISSION_BREAKER_FAILURES") {
            config.resilience.circuit_breaker.failure_threshold =
                parse_number("ADMISSION_BREAKER_FAILURES", &value)? as usize;
        }
        if let Some(value) = lookup("ADMISSION_BREAKER_RESET_SECS") {
            config.resilience.circuit_breaker.reset_timeout =
                Duration::from_secs(parse_number("ADMISSION_BREAKER_RESET_SECS", &value)?);
        }
        if let Some(value) = lookup("ADMISSION_BREAKER_SUCCESSES") {
            config.resilience.circuit_breaker.success_threshold =
                parse_number("ADMISSION_BREAKER_SUCCESSES", &value)? as usize;
        }
        if let Some(value) = lookup("ADMISSION_POLICY_FILE") {
            if !value.trim().is_empty() {
                config.policy_file = Some(PathBuf::from(value));
            }
        }
        if let Some(value) = lookup("ADMISSION_TRUST_FORWARDED_FOR") {
            config.trust_forwarded_for = parse_bool("ADMISSION_TRUST_FORWARDED_FOR", &value)?;
        }
        if let Some(value) = lookup("ADMISSION_BIND_ADDR") {
            config.bind_addr = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable limiting or make the hot path unbounded
    pub fn validate(&self) -> Result<()> {
        if self.remote_enabled && self.redis.url.trim().is_empty() {
            return Err(AdmissionError::Config(
                "remote counters are enabled but no Redis URL is configured".to_string(),
            ));
        }
        if self.redis.connection_timeout.is_zero() {
            return Err(AdmissionError::Config(
                "Redis connection timeout must be greater than zero".to_string(),
            ));
        }
        if self.resilience.remote_timeout.is_zero() {
            return Err(AdmissionError::Config(
                "remote timeout must be greater than zero".to_string(),
            ));
        }
        if self.memory.reaper_enabled && self.memory.reaper_interval.is_zero() {
            return Err(AdmissionError::Config(
                "reaper interval must be greater than zero".to_string(),
            ));
        }
        let breaker = &self.resilience.circuit_breaker;
        if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
            return Err(AdmissionError::Config(
                "circuit breaker thresholds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AdmissionError::Config(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|e| {
        AdmissionError::Config(format!("{} must be a non-negative integer: {}", name, e))
    })
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
