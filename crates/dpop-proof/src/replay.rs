//! Replay attack detection
//!
//! A proof identified by `(thumbprint, jti)` may be accepted once. The record
//! is written with a single atomic add-if-absent so two concurrent
//! presentations of the same proof cannot both pass.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::Result;
use crate::cache::Cache;

/// Marks proofs as consumed
#[async_trait]
pub trait ReplayAttackDetector: Send + Sync + fmt::Debug {
    /// Consume `(thumbprint, jti)`
    ///
    /// Returns `true` the first time a pair is seen and `false` afterwards.
    async fn consume(&self, thumbprint: &str, jti: &str) -> Result<bool>;

    /// How long a consumed pair is remembered
    fn retention(&self) -> Duration;
}

/// Cache key for a `(thumbprint, jti)` pair
#[must_use]
pub fn replay_key(prefix: &str, thumbprint: &str, jti: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(thumbprint.as_bytes());
    hasher.update([0u8]);
    hasher.update(jti.as_bytes());
    format!("{prefix}{}", hex::encode(hasher.finalize()))
}

/// [`ReplayAttackDetector`] backed by a shared [`Cache`]
#[derive(Debug, Clone)]
pub struct CacheReplayAttackDetector {
    cache: Arc<dyn Cache>,
    ttl: Duration,
    prefix: String,
}

impl CacheReplayAttackDetector {
    /// Create a detector remembering consumed proofs for `ttl`
    ///
    /// `ttl` must cover the verifier's max proof age plus drift; the verifier
    /// builder enforces this.
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            prefix: "dpop-jti:".to_string(),
        }
    }

    /// Use a different cache key prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

#[async_trait]
impl ReplayAttackDetector for CacheReplayAttackDetector {
    async fn consume(&self, thumbprint: &str, jti: &str) -> Result<bool> {
        let key = replay_key(&self.prefix, thumbprint, jti);
        let fresh = self.cache.add_if_absent(&key, "1", self.ttl).await?;
        if !fresh {
            warn!(jti = %jti, thumbprint = %thumbprint, "DPoP proof replay detected");
        }
        Ok(fresh)
    }

    fn retention(&self) -> Duration {
        self.ttl
    }
}
