//! TTL key-value cache abstraction
//!
//! Nonce records and replay records live in a shared cache. The only
//! operation with a concurrency requirement is [`Cache::add_if_absent`],
//! which must check and insert as one atomic step.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Cache backend failure
#[derive(Debug, Error)]
pub enum CacheError {
    /// Generic backend failure
    #[error("cache backend error: {reason}")]
    Backend {
        /// What went wrong
        reason: String,
    },

    /// Redis failure
    #[cfg(feature = "redis-storage")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Cache result type
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// TTL key-value cache shared between verifier replicas
#[async_trait]
pub trait Cache: Send + Sync + fmt::Debug {
    /// Read a live entry
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Insert or overwrite an entry
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Insert only if no live entry exists
    ///
    /// Returns `true` when the entry was inserted, `false` when one was already
    /// present. Must be atomic.
    async fn add_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Inserts between two sweeps of expired entries
pub const DEFAULT_PURGE_INTERVAL: u64 = 1024;

/// In-process cache for single-instance deployments and tests
///
/// Expired entries are swept every [`DEFAULT_PURGE_INTERVAL`] inserts, so
/// one-shot keys such as replay records do not accumulate.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    inserts: Arc<AtomicU64>,
    purge_interval: u64,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            inserts: Arc::default(),
            purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }
}

impl MemoryCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep expired entries every `interval` inserts (at least one)
    #[must_use]
    pub fn with_purge_interval(mut self, interval: u64) -> Self {
        self.purge_interval = interval.max(1);
        self
    }

    /// Insert under an already held write guard, sweeping when due
    fn insert_locked(
        &self,
        entries: &mut HashMap<String, CacheEntry>,
        key: &str,
        entry: CacheEntry,
        now: Instant,
    ) {
        let count = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.purge_interval == 0 {
            let before = entries.len();
            entries.retain(|_, entry| entry.is_live(now));
            let removed = before - entries.len();
            if removed > 0 {
                debug!(removed, "purged expired memory cache entries");
            }
        }
        entries.insert(key.to_string(), entry);
    }

    /// Drop expired entries, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until cleanup
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let entries = self.entries.read().await;
        let value = entries
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone());
        trace!(hit = value.is_some(), "memory cache lookup");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        self.insert_locked(
            &mut entries,
            key,
            CacheEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
            now,
        );
        Ok(())
    }

    async fn add_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        // Single write guard covers both the check and the insert.
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        self.insert_locked(
            &mut entries,
            key,
            CacheEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
            now,
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.set("k", "v1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v1"));

        cache.set("k", "v2", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_add_if_absent() {
        let cache = MemoryCache::new();
        assert!(cache.add_if_absent("k", "1", Duration::from_secs(60)).await.unwrap());
        assert!(!cache.add_if_absent("k", "2", Duration::from_secs(60)).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.unwrap().is_none());

        // An expired entry no longer blocks add_if_absent
        assert!(cache.add_if_absent("k", "new", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let cache = MemoryCache::new();
        cache.set("short", "v", Duration::from_secs(1)).await.unwrap();
        cache.set("long", "v", Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.cleanup_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inserts_sweep_expired_entries() {
        let cache = MemoryCache::new().with_purge_interval(4);
        for jti in ["a", "b", "c"] {
            assert!(cache.add_if_absent(jti, "1", Duration::from_secs(1)).await.unwrap());
        }
        assert_eq!(cache.len().await, 3);

        tokio::time::advance(Duration::from_secs(5)).await;
        // Fourth insert triggers the sweep, leaving only itself
        assert!(cache.add_if_absent("d", "1", Duration::from_secs(60)).await.unwrap());
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("d").await.unwrap().as_deref(), Some("1"));

        // Live entries survive the next sweep
        for jti in ["e", "f", "g"] {
            cache.set(jti, "1", Duration::from_secs(60)).await.unwrap();
        }
        assert_eq!(cache.len().await, 4);
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.set("h", "1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.len().await, 5);
    }

    #[tokio::test]
    async fn test_concurrent_add_if_absent_admits_one() {
        let cache = MemoryCache::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .add_if_absent("shared", &i.to_string(), Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }
}
