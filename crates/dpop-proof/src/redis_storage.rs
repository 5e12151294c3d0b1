//! Redis-backed [`Cache`] for nonces and replay records
//!
//! Lets several verifier replicas share nonce state and replay detection.
//! `add_if_absent` maps to a single `SET key value NX EX ttl`, which Redis
//! executes atomically.
//!
//! Reads and overwrites are retried. `add_if_absent` is sent once: if the
//! first `SET NX` landed but its reply was lost, a retry would find the key
//! and report a legitimate first use as a replay. A transport failure
//! surfaces as an error instead.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use tracing::{debug, error, trace, warn};

use crate::cache::{Cache, CacheResult};

/// Redis cache backend
#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
    key_prefix: String,
    max_retries: u32,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("key_prefix", &self.key_prefix)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect to Redis and check it responds
    ///
    /// # Errors
    /// Returns [`CacheError::Redis`](crate::CacheError::Redis) if the URL is
    /// invalid or the server cannot be reached.
    pub async fn new(connection_string: &str) -> CacheResult<Self> {
        let client = Client::open(connection_string)?;
        let mut connection = client.get_multiplexed_async_connection().await?;

        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        debug!("Redis connection established successfully");

        Ok(Self {
            connection,
            key_prefix: "dpop:".to_string(),
            max_retries: 3,
        })
    }

    /// Prefix every key with `prefix`
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Attempts per idempotent operation before giving up (at least one)
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Redis rejects `EX 0`; sub-second TTLs round up
    fn ttl_seconds(ttl: Duration) -> u64 {
        let seconds = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        seconds.max(1)
    }

    /// How many times an operation may be sent
    fn attempts(max_retries: u32, idempotent: bool) -> u32 {
        if idempotent { max_retries.max(1) } else { 1 }
    }

    /// Execute Redis operation with retry logic
    async fn with_retries<F, T>(&self, idempotent: bool, operation: F) -> CacheResult<T>
    where
        F: Fn(MultiplexedConnection) -> BoxFuture<'static, RedisResult<T>>,
        T: Send + 'static,
    {
        let max_attempts = Self::attempts(self.max_retries, idempotent);
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation(self.connection.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if attempts >= max_attempts => {
                    error!(attempts, error = %e, "Redis operation failed");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "Redis operation failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempts))).await;
                }
            }
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let key = self.key(key);
        let value = self
            .with_retries(true, |mut conn| {
                let key = key.clone();
                Box::pin(async move { conn.get::<_, Option<String>>(&key).await })
            })
            .await?;
        trace!(hit = value.is_some(), "redis cache lookup");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let key = self.key(key);
        let value = value.to_string();
        let seconds = Self::ttl_seconds(ttl);

        self.with_retries(true, |mut conn| {
            let key = key.clone();
            let value = value.clone();
            Box::pin(async move { conn.set_ex::<_, _, ()>(&key, &value, seconds).await })
        })
        .await
    }

    async fn add_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let key = self.key(key);
        let value = value.to_string();
        let seconds = Self::ttl_seconds(ttl);

        // Not idempotent: a lost reply followed by a resend would see our own key.
        self.with_retries(false, |mut conn| {
            let key = key.clone();
            let value = value.clone();
            Box::pin(async move {
                let reply: Option<String> = redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("NX")
                    .arg("EX")
                    .arg(seconds)
                    .query_async(&mut conn)
                    .await?;
                Ok(reply.is_some())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_seconds_rounds_up() {
        assert_eq!(RedisCache::ttl_seconds(Duration::ZERO), 1);
        assert_eq!(RedisCache::ttl_seconds(Duration::from_millis(200)), 1);
        assert_eq!(RedisCache::ttl_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(RedisCache::ttl_seconds(Duration::from_secs(65)), 65);
    }

    #[test]
    fn test_add_if_absent_is_sent_once() {
        assert_eq!(RedisCache::attempts(5, true), 5);
        assert_eq!(RedisCache::attempts(0, true), 1);
        assert_eq!(RedisCache::attempts(5, false), 1);
    }
}
