//! Self-signed nonce strategy
//!
//! Each nonce is a compact JWS of type `dpop+nonce` signed with a server key,
//! carrying `iat`, `exp`, a short random `jti` and optionally the `jkt` it was
//! issued to. Nothing is stored, so any replica holding the key can validate.
//! Public keys of retired signing keys can be kept as verification keys so
//! nonces issued before a rotation stay valid until they expire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::{NonceChallenge, NonceScope, OnValidNonce, random_hex};
use crate::clock::Clock;
use crate::engine::SigningEngine;
use crate::types::{ClaimSet, DpopAlgorithm, DpopKeyPair, DpopPublicKey, ProofHeader};
use crate::{DPOP_NONCE_TYPE, Result};

/// Issues and validates signed nonce tokens
#[derive(Debug, Clone)]
pub struct SignedNonceChallenge {
    key: Arc<DpopKeyPair>,
    verification_keys: Vec<(DpopPublicKey, DpopAlgorithm)>,
    engine: Arc<dyn SigningEngine>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    allowed_time_drift: Duration,
    bind_thumbprint: bool,
    on_valid: Option<OnValidNonce>,
}

impl SignedNonceChallenge {
    /// Create a strategy signing with `key`
    ///
    /// Defaults: 15 minute lifetime, 5 second drift, tokens bound to the
    /// client thumbprint.
    pub fn new(key: DpopKeyPair, engine: Arc<dyn SigningEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            key: Arc::new(key),
            verification_keys: Vec::new(),
            engine,
            clock,
            ttl: Duration::from_secs(crate::DEFAULT_NONCE_TTL_SECONDS),
            allowed_time_drift: Duration::from_secs(crate::DEFAULT_ALLOWED_TIME_DRIFT_SECONDS),
            bind_thumbprint: true,
            on_valid: None,
        }
    }

    /// Nonce lifetime
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Clock drift tolerated on `iat` and `exp`
    #[must_use]
    pub fn with_allowed_time_drift(mut self, drift: Duration) -> Self {
        self.allowed_time_drift = drift;
        self
    }

    /// Whether tokens carry and check the client `jkt`
    #[must_use]
    pub fn with_thumbprint_binding(mut self, bind: bool) -> Self {
        self.bind_thumbprint = bind;
        self
    }

    /// Also accept nonces signed by `key` (a retired signing key)
    ///
    /// New nonces are always signed with the key given to [`new`](Self::new).
    #[must_use]
    pub fn with_verification_key(mut self, key: DpopPublicKey, algorithm: DpopAlgorithm) -> Self {
        self.verification_keys.push((key, algorithm));
        self
    }

    /// Run `hook` whenever a presented nonce validates
    #[must_use]
    pub fn with_on_valid(mut self, hook: OnValidNonce) -> Self {
        self.on_valid = Some(hook);
        self
    }

    fn mint(&self, scope: &NonceScope) -> Result<String> {
        let now = self.clock.timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);

        let mut claims = ClaimSet::new()
            .with("iat", now)
            .with("exp", now.saturating_add(ttl))
            // Random jti keeps deterministic signature schemes from producing
            // identical nonces within one second.
            .with("jti", random_hex(4));
        if self.bind_thumbprint {
            claims.insert("jkt", scope.thumbprint());
        }

        let mut header = ProofHeader::new()
            .with("typ", DPOP_NONCE_TYPE)
            .with("kid", self.key.id.as_str());
        if let DpopPublicKey::EcdsaP256 { .. } = self.key.public_key {
            header.insert("crv", "P-256");
        }

        let nonce = self.engine.sign(&self.key, header, &claims)?;
        debug!(kid = %self.key.id, "Issued signed DPoP nonce");
        Ok(nonce)
    }

    /// Header and claims of `presented` if any known key signed it
    fn verify_signature(&self, presented: &str) -> Option<(ProofHeader, ClaimSet)> {
        std::iter::once((&self.key.public_key, self.key.algorithm))
            .chain(self.verification_keys.iter().map(|(key, alg)| (key, *alg)))
            .find_map(|(key, algorithm)| {
                self.engine
                    .verify_with_key(presented, key, &[algorithm])
                    .ok()
            })
    }

    /// Verified claims of `presented`, or `None` if it is not a valid nonce
    /// for `scope`
    fn validate(&self, scope: &NonceScope, presented: &str) -> Option<ClaimSet> {
        let (header, claims) = self.verify_signature(presented)?;

        if header.typ() != Some(DPOP_NONCE_TYPE) {
            return None;
        }

        let now = self.clock.timestamp();
        let drift = i64::try_from(self.allowed_time_drift.as_secs()).unwrap_or(i64::MAX);

        let (Ok(Some(iat)), Ok(Some(exp))) = (claims.iat(), claims.exp()) else {
            return None;
        };
        if iat > now.saturating_add(drift) || exp < now.saturating_sub(drift) {
            return None;
        }

        if self.bind_thumbprint {
            let Ok(Some(jkt)) = claims.jkt() else {
                return None;
            };
            if !bool::from(jkt.as_bytes().ct_eq(scope.thumbprint().as_bytes())) {
                return None;
            }
        }
        Some(claims)
    }
}

#[async_trait]
impl NonceChallenge for SignedNonceChallenge {
    async fn current_or_new(&self, scope: &NonceScope) -> Result<String> {
        self.mint(scope)
    }

    async fn new_if_invalid(&self, scope: &NonceScope, presented: &str) -> Result<Option<String>> {
        match self.validate(scope, presented) {
            Some(claims) => {
                if let Some(hook) = &self.on_valid {
                    hook.call(scope, &claims);
                }
                Ok(None)
            }
            None => self.mint(scope).map(Some),
        }
    }
}
