//! Server-issued nonces (RFC 9449 section 8)
//!
//! Servers issue nonces through a [`NonceChallenge`] strategy chosen when the
//! verifier is built:
//!
//! - [`CacheNonceChallenge`] keeps the current nonce per scope in a [`Cache`]
//! - [`SignedNonceChallenge`] issues self-contained signed nonce tokens
//! - [`TotpNonceChallenge`] derives nonces from a shared secret and the time step
//!
//! Clients remember the last nonce each server handed out in a [`NonceStore`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::Result;
use crate::cache::Cache;
use crate::types::ClaimSet;
use crate::uri::endpoint_of;

mod cache;
mod signed;
mod totp;

pub use cache::CacheNonceChallenge;
pub use signed::SignedNonceChallenge;
pub use totp::TotpNonceChallenge;

/// Who a nonce was issued to: a key at a particular server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonceScope {
    thumbprint: String,
    endpoint: String,
}

impl NonceScope {
    /// Scope for a key thumbprint and the `htu` the proof targets
    ///
    /// Only the origin of `htu` is kept, so every resource on one server shares
    /// a nonce.
    pub fn new(thumbprint: impl Into<String>, htu: &str) -> Self {
        Self {
            thumbprint: thumbprint.into(),
            endpoint: endpoint_of(htu),
        }
    }

    /// JWK thumbprint of the client key
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Lowercased endpoint origin
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Cache key for this scope
    ///
    /// Hex SHA-256 over the prefix, endpoint and thumbprint, NUL-separated.
    #[must_use]
    pub fn storage_key(&self, prefix: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prefix.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.endpoint.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.thumbprint.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// What the stateful strategy answers when a presented nonce is wrong
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidNoncePolicy {
    /// Mint, store and return a new nonce
    #[default]
    IssueFresh,
    /// Return the nonce currently stored for the scope (minting one if none is)
    ReturnCurrent,
}

/// Callback run when a presented nonce validates
///
/// Receives the scope and the nonce's verified claims (`iat` and `exp` for
/// every stateless strategy). A resource server can use it to hand the
/// client its next `DPoP-Nonce` before the current one runs out
/// (RFC 9449 section 8.2).
#[derive(Clone)]
pub struct OnValidNonce(Arc<dyn Fn(&NonceScope, &ClaimSet) + Send + Sync>);

impl OnValidNonce {
    /// Wrap a callback
    pub fn new(callback: impl Fn(&NonceScope, &ClaimSet) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub(crate) fn call(&self, scope: &NonceScope, claims: &ClaimSet) {
        (self.0)(scope, claims);
    }
}

impl fmt::Debug for OnValidNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OnValidNonce(..)")
    }
}

/// Nonce challenge strategy used by the verifier
#[async_trait]
pub trait NonceChallenge: Send + Sync + fmt::Debug {
    /// The nonce a client in `scope` should use next
    ///
    /// Returns the current nonce where the strategy keeps one, otherwise mints
    /// a new one.
    async fn current_or_new(&self, scope: &NonceScope) -> Result<String>;

    /// `None` if `presented` is valid for `scope`, otherwise the nonce the
    /// client must use instead
    async fn new_if_invalid(&self, scope: &NonceScope, presented: &str) -> Result<Option<String>>;
}

/// Client-side memory of the nonce each server last issued
#[async_trait]
pub trait NonceStore: Send + Sync + fmt::Debug {
    /// Nonce to put in the next proof for `scope`, if one is known
    async fn current_nonce(&self, scope: &NonceScope) -> Result<Option<String>>;

    /// Remember a nonce received from the server
    async fn store_next_nonce(&self, scope: &NonceScope, nonce: &str) -> Result<()>;
}

/// [`NonceStore`] backed by a [`Cache`]
#[derive(Debug, Clone)]
pub struct CacheNonceStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
    prefix: String,
}

impl CacheNonceStore {
    /// Create a store keeping nonces for `ttl`
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            prefix: "dpop-client-nonce".to_string(),
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
impl NonceStore for CacheNonceStore {
    async fn current_nonce(&self, scope: &NonceScope) -> Result<Option<String>> {
        let nonce = self.cache.get(&scope.storage_key(&self.prefix)).await?;
        trace!(endpoint = %scope.endpoint(), hit = nonce.is_some(), "client nonce lookup");
        Ok(nonce)
    }

    async fn store_next_nonce(&self, scope: &NonceScope, nonce: &str) -> Result<()> {
        self.cache
            .set(&scope.storage_key(&self.prefix), nonce, self.ttl)
            .await?;
        Ok(())
    }
}

/// Hex encoding of `len` bytes from the OS random source
pub(crate) fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A new opaque nonce: 32 random bytes, hex encoded
#[must_use]
pub fn generate_nonce() -> String {
    random_hex(32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn test_scope_uses_endpoint_origin() {
        let a = NonceScope::new("jkt", "https://API.example.com/token");
        let b = NonceScope::new("jkt", "https://api.example.com/resource");
        assert_eq!(a, b);
        assert_eq!(a.endpoint(), "https://api.example.com");
        assert_eq!(a.storage_key("p"), b.storage_key("p"));

        let other_key = NonceScope::new("other", "https://api.example.com/token");
        assert_ne!(a.storage_key("p"), other_key.storage_key("p"));

        let other_host = NonceScope::new("jkt", "https://as.example.com/token");
        assert_ne!(a.storage_key("p"), other_host.storage_key("p"));

        assert_ne!(a.storage_key("p"), a.storage_key("q"));
        assert_eq!(a.storage_key("p").len(), 64);
    }

    #[test]
    fn test_generate_nonce() {
        let first = generate_nonce();
        let second = generate_nonce();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_nonce_policy_serde() {
        assert_eq!(InvalidNoncePolicy::default(), InvalidNoncePolicy::IssueFresh);
        let json = serde_json::to_string(&InvalidNoncePolicy::ReturnCurrent).unwrap();
        assert_eq!(json, "\"return_current\"");
    }

    #[tokio::test]
    async fn test_cache_nonce_store() {
        let store = CacheNonceStore::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));
        let scope = NonceScope::new("jkt", "https://rs.example.com/api");

        assert_eq!(store.current_nonce(&scope).await.unwrap(), None);
        store.store_next_nonce(&scope, "n-1").await.unwrap();
        assert_eq!(store.current_nonce(&scope).await.unwrap().as_deref(), Some("n-1"));

        // Any path on the same origin sees the nonce
        let sibling = NonceScope::new("jkt", "https://rs.example.com/other");
        assert_eq!(store.current_nonce(&sibling).await.unwrap().as_deref(), Some("n-1"));
    }
}
