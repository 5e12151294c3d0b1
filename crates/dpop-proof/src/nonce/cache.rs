//! Stateful nonce strategy

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::{InvalidNoncePolicy, NonceChallenge, NonceScope, generate_nonce};
use crate::Result;
use crate::cache::Cache;

/// Keeps the current nonce for each scope in a shared cache
#[derive(Debug, Clone)]
pub struct CacheNonceChallenge {
    cache: Arc<dyn Cache>,
    ttl: Duration,
    prefix: String,
    policy: InvalidNoncePolicy,
}

impl CacheNonceChallenge {
    /// Create a strategy whose nonces live for `ttl`
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            prefix: "dpop-nonce".to_string(),
            policy: InvalidNoncePolicy::default(),
        }
    }

    /// Use a different cache key prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Choose what to answer when a presented nonce is wrong
    #[must_use]
    pub fn with_policy(mut self, policy: InvalidNoncePolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn mint(&self, key: &str) -> Result<String> {
        let nonce = generate_nonce();
        self.cache.set(key, &nonce, self.ttl).await?;
        debug!("Issued new DPoP nonce");
        Ok(nonce)
    }
}

#[async_trait]
impl NonceChallenge for CacheNonceChallenge {
    async fn current_or_new(&self, scope: &NonceScope) -> Result<String> {
        let key = scope.storage_key(&self.prefix);
        match self.cache.get(&key).await? {
            Some(current) => Ok(current),
            None => self.mint(&key).await,
        }
    }

    async fn new_if_invalid(&self, scope: &NonceScope, presented: &str) -> Result<Option<String>> {
        let key = scope.storage_key(&self.prefix);
        let stored = self.cache.get(&key).await?;

        match stored {
            Some(current) if bool::from(current.as_bytes().ct_eq(presented.as_bytes())) => Ok(None),
            Some(current) if self.policy == InvalidNoncePolicy::ReturnCurrent => Ok(Some(current)),
            _ => self.mint(&key).await.map(Some),
        }
    }
}
