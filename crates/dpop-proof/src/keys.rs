//! DPoP key storage and key selection
//!
//! Clients keep their proof-of-possession keys in a [`KeyStore`]. When a proof
//! is needed, [`DpopKeySelector`] picks the key to sign with from the server's
//! ranked algorithm list and, for bound access tokens, the required thumbprint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    Result,
    clock::{Clock, SystemClock},
    errors::{DpopError, NoSuitableKeyReason},
    types::{DpopAlgorithm, DpopKeyPair},
};

/// Storage backend for DPoP key pairs
#[async_trait]
pub trait KeyStore: Send + Sync + std::fmt::Debug {
    /// Store a key pair under its id
    async fn store_key_pair(&self, key_pair: &DpopKeyPair) -> Result<()>;

    /// Retrieve a key pair by id
    async fn get_key_pair(&self, key_id: &str) -> Result<Option<DpopKeyPair>>;

    /// Delete a key pair
    async fn delete_key_pair(&self, key_id: &str) -> Result<()>;

    /// All stored key pairs
    async fn list_key_pairs(&self) -> Result<Vec<DpopKeyPair>>;

    /// Key pairs for one algorithm still valid at `now`, oldest first
    async fn keys_for_algorithm(
        &self,
        algorithm: DpopAlgorithm,
        now: SystemTime,
    ) -> Result<Vec<DpopKeyPair>> {
        let mut keys: Vec<DpopKeyPair> = self
            .list_key_pairs()
            .await?
            .into_iter()
            .filter(|key| key.algorithm == algorithm && !key.is_expired_at(now))
            .collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(keys)
    }
}

/// In-memory key storage (development and tests)
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: Arc<RwLock<HashMap<String, DpopKeyPair>>>,
}

impl MemoryKeyStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given key pairs
    #[must_use]
    pub fn with_keys(keys: impl IntoIterator<Item = DpopKeyPair>) -> Self {
        let keys = keys.into_iter().map(|key| (key.id.clone(), key)).collect();
        Self {
            keys: Arc::new(RwLock::new(keys)),
        }
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn store_key_pair(&self, key_pair: &DpopKeyPair) -> Result<()> {
        let mut keys = self.keys.write().await;
        keys.insert(key_pair.id.clone(), key_pair.clone());
        debug!(key_id = %key_pair.id, algorithm = %key_pair.algorithm, "Stored DPoP key pair");
        Ok(())
    }

    async fn get_key_pair(&self, key_id: &str) -> Result<Option<DpopKeyPair>> {
        Ok(self.keys.read().await.get(key_id).cloned())
    }

    async fn delete_key_pair(&self, key_id: &str) -> Result<()> {
        self.keys.write().await.remove(key_id);
        Ok(())
    }

    async fn list_key_pairs(&self) -> Result<Vec<DpopKeyPair>> {
        Ok(self.keys.read().await.values().cloned().collect())
    }
}

/// Picks the signing key for a proof
#[derive(Debug, Clone)]
pub struct DpopKeySelector {
    store: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
}

impl DpopKeySelector {
    /// Create a selector over a key store, judging key expiry by the wall clock
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Judge key expiry by `clock`
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Underlying key store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    /// Select the key to sign with
    ///
    /// Algorithms are tried in `ranked` order. Without a required thumbprint
    /// the first key of the first algorithm that has one wins. With one, only
    /// a key carrying that thumbprint qualifies.
    ///
    /// # Errors
    /// [`DpopError::NoSuitableKey`] with [`NoSuitableKeyReason::NoAlgorithmOverlap`]
    /// if no requested algorithm has a key, or
    /// [`NoSuitableKeyReason::ThumbprintNotFound`] if keys exist but none has
    /// the required thumbprint.
    pub async fn select(
        &self,
        ranked: &[DpopAlgorithm],
        required_thumbprint: Option<&str>,
    ) -> Result<DpopKeyPair> {
        let now = self.clock.system_time();
        let mut any_candidate = false;

        for &algorithm in ranked {
            let candidates = self.store.keys_for_algorithm(algorithm, now).await?;
            any_candidate |= !candidates.is_empty();

            let chosen = match required_thumbprint {
                None => candidates.into_iter().next(),
                Some(required) => candidates.into_iter().find(|key| {
                    bool::from(key.thumbprint.as_bytes().ct_eq(required.as_bytes()))
                }),
            };

            if let Some(key) = chosen {
                debug!(key_id = %key.id, algorithm = %algorithm, "Selected DPoP signing key");
                return Ok(key);
            }
        }

        let reason = if any_candidate {
            NoSuitableKeyReason::ThumbprintNotFound
        } else {
            NoSuitableKeyReason::NoAlgorithmOverlap
        };
        Err(DpopError::NoSuitableKey { reason })
    }
}
