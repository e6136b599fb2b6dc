// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

use crate::config::RedisConfig;
use crate::error::{AdmissionError, Result, StorageError};
use crate::storage::{CounterKey, CounterStore};
use crate::storage_op;

/// Shared counter backend on Redis.
///
/// Each increment is a single `MULTI/EXEC` round trip carrying `INCR` and
/// `PEXPIRE ... NX`, so a counter can never exist without an expiry and two
/// racing first increments cannot set conflicting expirations. `PEXPIRE NX`
/// needs Redis 7.0 or newer.
pub struct RemoteCounterBackend {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    config: RedisConfig,
}

// The connection manager is left out; it carries no useful state
impl fmt::Debug for RemoteCounterBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCounterBackend")
            .field("url", &self.config.url)
            .field("key_prefix", &self.config.key_prefix)
            .field("connected", &self.connection.initialized())
            .finish()
    }
}

impl RemoteCounterBackend {
    /// Creates the backend without connecting.
    ///
    /// Only an unparseable URL fails here; the connection is established on
    /// first use, so a Redis outage at startup degrades instead of aborting.
    pub fn new(config: RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            AdmissionError::Config(format!("invalid Redis URL '{}': {}", config.url, e))
        })?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            config,
        })
    }

    /// Returns a handle to the multiplexed connection, connecting if needed.
    ///
    /// A failed attempt is not cached, so the next call tries again.
    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let connect = ConnectionManager::new(self.client.clone());
                match tokio::time::timeout(self.config.connection_timeout, connect).await {
                    Ok(result) => result.map_err(AdmissionError::from),
                    Err(_) => Err(AdmissionError::Storage(StorageError::RedisConnection(
                        format!(
                            "Connection to Redis at {} timed out after {:?}",
                            self.config.url, self.config.connection_timeout
                        ),
                    ))),
                }
            })
            .await?;

        Ok(manager.clone())
    }

    /// Full Redis key for a counter
    pub fn redis_key(&self, key: &CounterKey) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    /// Lifetime given to a counter: its window plus the configured grace
    pub fn expiry_ms(&self, window: Duration) -> u64 {
        (window + self.config.expiry_grace).as_millis() as u64
    }

    /// Ping Redis to check health with timeout
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;

        let ping = redis::cmd("PING");
        let pong = ping.query_async::<String>(&mut conn);
        let result = match tokio::time::timeout(self.config.connection_timeout, pong).await {
            Ok(inner) => inner?,
            Err(_) => {
                return Err(AdmissionError::Storage(StorageError::Timeout(format!(
                    "Redis PING timed out after {:?}",
                    self.config.connection_timeout
                ))));
            }
        };

        if result == "PONG" {
            Ok(())
        } else {
            Err(AdmissionError::Storage(StorageError::RedisCommand(format!(
                "Unexpected response from Redis PING: {}",
                result
            ))))
        }
    }
}

#[async_trait]
impl CounterStore for RemoteCounterBackend {
    async fn increment_and_get(&self, key: &CounterKey, window: Duration) -> Result<u64> {
        let started = Instant::now();
        let redis_key = self.redis_key(key);

        let result = async {
            let mut conn = self.connection().await?;
            let (count,): (u64,) = redis::pipe()
                .atomic()
                .incr(&redis_key, 1)
                .cmd("PEXPIRE")
                .arg(&redis_key)
                .arg(self.expiry_ms(window))
                .arg("NX")
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok::<u64, AdmissionError>(count)
        }
        .await;

        storage_op!(
            "incr_pexpire",
            redis_key.as_str(),
            result,
            started.elapsed().as_millis() as u64
        );
        result
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
