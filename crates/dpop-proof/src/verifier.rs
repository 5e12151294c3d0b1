//! DPoP proof verification
//!
//! [`DpopProofVerifier`] is the server half of the protocol. A presented proof
//! goes through a fixed sequence of checks and the first failure ends
//! verification:
//!
//! 1. non-empty token
//! 2. signature and algorithm (delegated to the [`SigningEngine`])
//! 3. `htm` matches the request method
//! 4. `htu` matches the request URI without query and fragment
//! 5. header `typ` is `dpop+jwt`
//! 6. `jti` length
//! 7. `iat` within drift of now and not older than max age plus drift
//! 8. `exp`, when present
//! 9. `nbf`, when present
//! 10. header `jwk` has no private members
//! 11. access token binding, when given
//! 12. nonce, when a nonce challenge is configured
//! 13. replay, when a replay detector is configured
//!
//! The two stateful checks come last so malformed input never touches the
//! shared caches.

use std::sync::Arc;
use std::time::Duration;

use ::http::HeaderMap;
use serde_json::Value;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::{
    DPOP_JWT_TYPE, JTI_MAX_LENGTH, JTI_MIN_LENGTH, Result,
    cache::Cache,
    clock::{Clock, SystemClock},
    config::{DpopConfig, VerifierConfig},
    engine::SigningEngine,
    errors::DpopError,
    http::{challenge_headers, extract_proof, format_algs_challenge},
    nonce::{CacheNonceChallenge, NonceChallenge, NonceScope},
    replay::{CacheReplayAttackDetector, ReplayAttackDetector},
    types::{AccessTokenBinding, ClaimSet, DecodedProof, DpopAlgorithm, PRIVATE_JWK_MEMBERS, access_token_hash},
    uri::create_htu,
};

/// Validates presented DPoP proofs
#[derive(Debug, Clone)]
pub struct DpopProofVerifier {
    engine: Arc<dyn SigningEngine>,
    clock: Arc<dyn Clock>,
    allowed_algorithms: Vec<DpopAlgorithm>,
    allowed_time_drift: i64,
    max_proof_age: i64,
    nonce_challenge: Option<Arc<dyn NonceChallenge>>,
    replay_detector: Option<Arc<dyn ReplayAttackDetector>>,
}

/// Builder for [`DpopProofVerifier`]
#[derive(Debug)]
pub struct DpopProofVerifierBuilder {
    engine: Arc<dyn SigningEngine>,
    clock: Arc<dyn Clock>,
    config: VerifierConfig,
    nonce_challenge: Option<Arc<dyn NonceChallenge>>,
    replay_detector: Option<Arc<dyn ReplayAttackDetector>>,
}

impl DpopProofVerifierBuilder {
    /// Time source (defaults to [`SystemClock`])
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace drift, max age and algorithms at once
    #[must_use]
    pub fn config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    /// Tolerated clock difference between client and server
    #[must_use]
    pub fn allowed_time_drift(mut self, drift: Duration) -> Self {
        self.config.allowed_time_drift_seconds = drift.as_secs();
        self
    }

    /// Oldest acceptable proof, drift excluded
    #[must_use]
    pub fn max_proof_age(mut self, age: Duration) -> Self {
        self.config.max_proof_age_seconds = age.as_secs();
        self
    }

    /// Algorithms a proof may be signed with
    #[must_use]
    pub fn allowed_algorithms(mut self, algorithms: impl Into<Vec<DpopAlgorithm>>) -> Self {
        self.config.allowed_algorithms = algorithms.into();
        self
    }

    /// Require server-issued nonces
    #[must_use]
    pub fn nonce_challenge(mut self, challenge: Arc<dyn NonceChallenge>) -> Self {
        self.nonce_challenge = Some(challenge);
        self
    }

    /// Reject proofs presented more than once
    #[must_use]
    pub fn replay_detector(mut self, detector: Arc<dyn ReplayAttackDetector>) -> Self {
        self.replay_detector = Some(detector);
        self
    }

    /// Build the verifier
    ///
    /// # Errors
    /// Returns [`DpopError::ConfigurationError`] if no allowed algorithm is
    /// supported by the engine, the max proof age is zero, or the replay
    /// detector forgets proofs before they stop being acceptable.
    pub fn build(self) -> Result<DpopProofVerifier> {
        let supported = self.engine.supported_algorithms();
        let allowed_algorithms: Vec<DpopAlgorithm> = self
            .config
            .allowed_algorithms
            .iter()
            .copied()
            .filter(|algorithm| supported.contains(algorithm))
            .collect();

        if allowed_algorithms.is_empty() {
            return Err(DpopError::ConfigurationError {
                reason: "none of the allowed algorithms is supported by the signing engine"
                    .to_string(),
            });
        }
        if self.config.max_proof_age_seconds == 0 {
            return Err(DpopError::ConfigurationError {
                reason: "max proof age must be positive".to_string(),
            });
        }

        let window = self.config.proof_acceptance_window();
        if let Some(detector) = &self.replay_detector {
            if detector.retention() < window {
                return Err(DpopError::ConfigurationError {
                    reason: format!(
                        "replay detector retention ({}s) is shorter than max proof age plus drift ({}s)",
                        detector.retention().as_secs(),
                        window.as_secs()
                    ),
                });
            }
        }

        Ok(DpopProofVerifier {
            engine: self.engine,
            clock: self.clock,
            allowed_algorithms,
            allowed_time_drift: seconds(self.config.allowed_time_drift_seconds),
            max_proof_age: seconds(self.config.max_proof_age_seconds),
            nonce_challenge: self.nonce_challenge,
            replay_detector: self.replay_detector,
        })
    }
}

fn seconds(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

impl DpopProofVerifier {
    /// Start building a verifier around a signing engine
    pub fn builder(engine: Arc<dyn SigningEngine>) -> DpopProofVerifierBuilder {
        DpopProofVerifierBuilder {
            engine,
            clock: Arc::new(SystemClock),
            config: VerifierConfig::default(),
            nonce_challenge: None,
            replay_detector: None,
        }
    }

    /// Build a verifier from configuration, keeping nonces and replay records
    /// in `cache`
    ///
    /// Uses [`CacheNonceChallenge`] when nonces are enabled and
    /// [`CacheReplayAttackDetector`] when replay detection is.
    ///
    /// # Errors
    /// Returns [`DpopError::ConfigurationError`] if `config` is inconsistent.
    pub fn from_config(
        config: &DpopConfig,
        engine: Arc<dyn SigningEngine>,
        clock: Arc<dyn Clock>,
        cache: Arc<dyn Cache>,
    ) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::builder(engine)
            .clock(clock)
            .config(config.verifier.clone());

        if config.nonce.enabled {
            let challenge = CacheNonceChallenge::new(cache.clone(), config.nonce.ttl())
                .with_prefix(config.nonce.storage_prefix.clone())
                .with_policy(config.nonce.invalid_nonce_policy);
            builder = builder.nonce_challenge(Arc::new(challenge));
        }

        if config.replay.enabled {
            let detector =
                CacheReplayAttackDetector::new(cache, config.replay.effective_ttl(&config.verifier))
                    .with_prefix(config.replay.storage_prefix.clone());
            builder = builder.replay_detector(Arc::new(detector));
        }

        builder.build()
    }

    /// Algorithms accepted by this verifier
    #[must_use]
    pub fn allowed_algorithms(&self) -> &[DpopAlgorithm] {
        &self.allowed_algorithms
    }

    /// `WWW-Authenticate` value advertising the accepted algorithms
    #[must_use]
    pub fn challenge_header(&self) -> String {
        format_algs_challenge(&self.allowed_algorithms)
    }

    /// Response headers for a failed verification
    ///
    /// # Errors
    /// Returns [`DpopError::ConfigurationError`] if a value is not a valid header.
    pub fn error_headers(&self, error: &DpopError) -> Result<HeaderMap> {
        challenge_headers(error, &self.allowed_algorithms)
    }

    /// Verify the `DPoP` header of a request
    ///
    /// # Errors
    /// [`DpopError::MissingProof`] or [`DpopError::MultipleProofs`] when the
    /// request does not carry exactly one proof, otherwise as [`verify`](Self::verify).
    pub async fn verify_request(
        &self,
        headers: &HeaderMap,
        htm: &str,
        htu: &str,
        binding: Option<&AccessTokenBinding>,
    ) -> Result<DecodedProof> {
        let token = extract_proof(headers)?;
        self.verify(token, htm, htu, binding).await
    }

    /// Verify a proof for the request `htm` / `htu`
    ///
    /// `htu` may carry a query and fragment; they are ignored.
    ///
    /// # Errors
    /// - malformed proofs: [`DpopError::InvalidProofStructure`],
    ///   [`DpopError::ProofSignatureInvalid`], [`DpopError::HttpBindingFailed`],
    ///   [`DpopError::ProofExpired`], [`DpopError::ProofNotYetValid`],
    ///   [`DpopError::AccessTokenBindingFailed`]
    /// - nonce challenges: [`DpopError::MissingNonce`], [`DpopError::InvalidNonce`]
    /// - [`DpopError::ReplayAttackDetected`]
    /// - collaborator failures, unmodified
    pub async fn verify(
        &self,
        token: &str,
        htm: &str,
        htu: &str,
        binding: Option<&AccessTokenBinding>,
    ) -> Result<DecodedProof> {
        if token.trim().is_empty() {
            return Err(DpopError::structure("DPoP proof is empty"));
        }

        let decoded = self.engine.verify(token, &self.allowed_algorithms)?;
        let claims = decoded.payload();
        let expected_htu = create_htu(htu);

        self.check_http_binding(claims, htm, &expected_htu)?;

        if decoded.protected_header().typ() != Some(DPOP_JWT_TYPE) {
            return Err(DpopError::structure(format!(
                "header \"typ\" must be \"{DPOP_JWT_TYPE}\""
            )));
        }

        let jti = claims
            .jti()?
            .ok_or_else(|| DpopError::structure("missing \"jti\" claim"))?;
        if !(JTI_MIN_LENGTH..=JTI_MAX_LENGTH).contains(&jti.len()) {
            return Err(DpopError::structure(format!(
                "\"jti\" must be between {JTI_MIN_LENGTH} and {JTI_MAX_LENGTH} characters"
            )));
        }

        self.check_timing(claims)?;

        let jwk = decoded.signing_key().jwk();
        if let Some(member) = PRIVATE_JWK_MEMBERS.iter().find(|m| jwk.contains_key(**m)) {
            return Err(DpopError::structure(format!(
                "header \"jwk\" contains private key member \"{member}\""
            )));
        }

        let thumbprint = decoded.thumbprint();
        if let Some(binding) = binding {
            Self::check_token_binding(claims, thumbprint, binding)?;
        }

        if let Some(challenge) = &self.nonce_challenge {
            let scope = NonceScope::new(thumbprint, &expected_htu);
            self.check_nonce(challenge.as_ref(), &scope, claims).await?;
        }

        if let Some(detector) = &self.replay_detector {
            if !detector.consume(thumbprint, jti).await? {
                return Err(DpopError::ReplayAttackDetected {
                    jti: jti.to_string(),
                });
            }
        }

        debug!(
            jti = %jti,
            htm = %htm,
            htu = %expected_htu,
            thumbprint = %thumbprint,
            algorithm = %decoded.signing_key().algorithm(),
            "Verified DPoP proof"
        );

        Ok(decoded)
    }

    fn check_http_binding(&self, claims: &ClaimSet, htm: &str, expected_htu: &str) -> Result<()> {
        let proof_htm = claims
            .htm()?
            .ok_or_else(|| DpopError::structure("missing \"htm\" claim"))?;
        if !proof_htm.eq_ignore_ascii_case(htm) {
            return Err(DpopError::HttpBindingFailed {
                reason: format!("\"htm\" is {proof_htm}, request method is {htm}"),
            });
        }

        let proof_htu = claims
            .htu()?
            .ok_or_else(|| DpopError::structure("missing \"htu\" claim"))?;
        if !proof_htu.eq_ignore_ascii_case(expected_htu) {
            return Err(DpopError::HttpBindingFailed {
                reason: format!("\"htu\" is {proof_htu}, request URI is {expected_htu}"),
            });
        }
        Ok(())
    }

    fn check_timing(&self, claims: &ClaimSet) -> Result<()> {
        let now = self.clock.timestamp();
        let drift = self.allowed_time_drift;

        let iat = claims
            .iat()?
            .ok_or_else(|| DpopError::structure("missing \"iat\" claim"))?;
        if iat > now.saturating_add(drift) {
            return Err(DpopError::ProofNotYetValid {
                reason: "\"iat\" is in the future".to_string(),
            });
        }
        if iat < now.saturating_sub(self.max_proof_age).saturating_sub(drift) {
            return Err(DpopError::ProofExpired {
                reason: "\"iat\" is older than the maximum proof age".to_string(),
            });
        }

        if let Some(exp) = claims.exp()? {
            if now > exp.saturating_add(drift) {
                return Err(DpopError::ProofExpired {
                    reason: "\"exp\" has passed".to_string(),
                });
            }
        }

        if let Some(nbf) = claims.nbf()? {
            if now < nbf.saturating_sub(drift) {
                return Err(DpopError::ProofNotYetValid {
                    reason: "\"nbf\" has not been reached".to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_token_binding(
        claims: &ClaimSet,
        thumbprint: &str,
        binding: &AccessTokenBinding,
    ) -> Result<()> {
        if let Some(access_token) = binding.access_token() {
            let ath = claims.ath()?.ok_or_else(|| DpopError::AccessTokenBindingFailed {
                reason: "missing \"ath\" claim".to_string(),
            })?;
            if !constant_time_eq(ath, &access_token_hash(access_token)) {
                return Err(DpopError::AccessTokenBindingFailed {
                    reason: "\"ath\" does not match the access token".to_string(),
                });
            }
        }

        if !constant_time_eq(thumbprint, binding.jkt()) {
            return Err(DpopError::AccessTokenBindingFailed {
                reason: "proof key is not the key the access token is bound to".to_string(),
            });
        }
        Ok(())
    }

    async fn check_nonce(
        &self,
        challenge: &dyn NonceChallenge,
        scope: &NonceScope,
        claims: &ClaimSet,
    ) -> Result<()> {
        match claims.get("nonce") {
            None => {
                let nonce = challenge.current_or_new(scope).await?;
                debug!(endpoint = %scope.endpoint(), "DPoP proof without nonce, issuing challenge");
                Err(DpopError::MissingNonce { nonce })
            }
            Some(Value::String(presented)) => {
                match challenge.new_if_invalid(scope, presented).await? {
                    None => Ok(()),
                    Some(nonce) => {
                        warn!(endpoint = %scope.endpoint(), "Rejected DPoP proof nonce");
                        Err(DpopError::InvalidNonce { nonce })
                    }
                }
            }
            Some(_) => {
                // No strategy accepts an empty nonce, so this takes the same
                // policy-aware path as a wrong string.
                let nonce = match challenge.new_if_invalid(scope, "").await? {
                    Some(nonce) => nonce,
                    None => challenge.current_or_new(scope).await?,
                };
                warn!(endpoint = %scope.endpoint(), "DPoP proof nonce is not a string");
                Err(DpopError::InvalidNonce { nonce })
            }
        }
    }
}

#[cfg(all(test, feature = "jwt-validation"))]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::engine::JwtSigningEngine;
    use crate::nonce::InvalidNoncePolicy;
    use crate::types::{DpopKeyPair, ProofHeader};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;
    const HTU: &str = "https://resource.example.org/protected";

    struct Fixture {
        engine: Arc<JwtSigningEngine>,
        clock: Arc<ManualClock>,
        key: DpopKeyPair,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                engine: Arc::new(JwtSigningEngine::new()),
                clock: Arc::new(ManualClock::new(NOW)),
                key: DpopKeyPair::generate_p256().unwrap(),
            }
        }

        fn claims(&self) -> ClaimSet {
            ClaimSet::new()
                .with("htm", "GET")
                .with("htu", HTU)
                .with("iat", NOW)
                .with("jti", "e1j3V_bKic8-LAEB")
        }

        fn sign(&self, claims: &ClaimSet) -> String {
            self.sign_with_header(ProofHeader::for_proof(&self.key.public_key.to_jwk()), claims)
        }

        fn sign_with_header(&self, header: ProofHeader, claims: &ClaimSet) -> String {
            self.engine.sign(&self.key, header, claims).unwrap()
        }

        fn verifier(&self) -> DpopProofVerifierBuilder {
            DpopProofVerifier::builder(self.engine.clone()).clock(self.clock.clone())
        }
    }

    #[tokio::test]
    async fn test_valid_proof_returns_decoded_proof() {
        let f = Fixture::new();
        let verifier = f.verifier().build().unwrap();
        let token = f.sign(&f.claims());

        let decoded = verifier.verify(&token, "get", HTU, None).await.unwrap();
        assert_eq!(decoded.payload(), &f.claims());
        assert_eq!(decoded.thumbprint(), f.key.thumbprint);
    }

    #[tokio::test]
    async fn test_empty_token() {
        let f = Fixture::new();
        let verifier = f.verifier().build().unwrap();
        for token in ["", "   "] {
            assert!(matches!(
                verifier.verify(token, "GET", HTU, None).await,
                Err(DpopError::InvalidProofStructure { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_missing_and_mistyped_claims_are_malformed() {
        let f = Fixture::new();
        let verifier = f.verifier().build().unwrap();

        for claim in ["htm", "htu", "jti", "iat"] {
            let mut claims = f.claims();
            claims.remove(claim);
            let result = verifier.verify(&f.sign(&claims), "GET", HTU, None).await;
            assert!(
                matches!(result, Err(DpopError::InvalidProofStructure { .. })),
                "missing {claim} should be malformed"
            );
        }

        let claims = f.claims().with("iat", "1700000000");
        assert!(matches!(
            verifier.verify(&f.sign(&claims), "GET", HTU, None).await,
            Err(DpopError::InvalidProofStructure { .. })
        ));

        let claims = f.claims().with("htm", json!(["GET"]));
        assert!(matches!(
            verifier.verify(&f.sign(&claims), "GET", HTU, None).await,
            Err(DpopError::InvalidProofStructure { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_typ() {
        let f = Fixture::new();
        let verifier = f.verifier().build().unwrap();
        let header = ProofHeader::for_proof(&f.key.public_key.to_jwk()).with("typ", "JWT");

        assert!(matches!(
            verifier
                .verify(&f.sign_with_header(header, &f.claims()), "GET", HTU, None)
                .await,
            Err(DpopError::InvalidProofStructure { .. })
        ));
    }

    #[tokio::test]
    async fn test_htu_compared_case_insensitively() {
        let f = Fixture::new();
        let verifier = f.verifier().build().unwrap();
        let token = f.sign(&f.claims());

        assert!(
            verifier
                .verify(&token, "GET", "HTTPS://Resource.Example.org/protected", None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_exp_and_nbf() {
        let f = Fixture::new();
        let verifier = f.verifier().build().unwrap();

        let expired = f.claims().with("exp", NOW - 6);
        assert!(matches!(
            verifier.verify(&f.sign(&expired), "GET", HTU, None).await,
            Err(DpopError::ProofExpired { .. })
        ));

        let within_drift = f.claims().with("exp", NOW - 5).with("jti", "exp-within-drift-1");
        assert!(verifier.verify(&f.sign(&within_drift), "GET", HTU, None).await.is_ok());

        let early = f.claims().with("nbf", NOW + 6);
        assert!(matches!(
            verifier.verify(&f.sign(&early), "GET", HTU, None).await,
            Err(DpopError::ProofNotYetValid { .. })
        ));

        let nbf_ok = f.claims().with("nbf", NOW + 5);
        assert!(verifier.verify(&f.sign(&nbf_ok), "GET", HTU, None).await.is_ok());

        let mistyped = f.claims().with("exp", 1.5);
        assert!(matches!(
            verifier.verify(&f.sign(&mistyped), "GET", HTU, None).await,
            Err(DpopError::InvalidProofStructure { .. })
        ));
    }

    #[tokio::test]
    async fn test_private_jwk_members_rejected() {
        let f = Fixture::new();
        let verifier = f.verifier().build().unwrap();

        let mut jwk = f.key.public_key.to_jwk().to_json();
        jwk.insert("d".to_string(), json!("c2VjcmV0"));
        let header = ProofHeader::new()
            .with("typ", DPOP_JWT_TYPE)
            .with("jwk", Value::Object(jwk));

        let result = verifier
            .verify(&f.sign_with_header(header, &f.claims()), "GET", HTU, None)
            .await;
        assert!(matches!(result, Err(DpopError::InvalidProofStructure { .. })));
    }

    #[tokio::test]
    async fn test_access_token_binding() {
        let f = Fixture::new();
        let verifier = f.verifier().build().unwrap();
        let claims = f.claims().with("ath", access_token_hash("token-abc"));
        let token = f.sign(&claims);

        let good = AccessTokenBinding::token("token-abc", f.key.thumbprint.clone());
        assert!(verifier.verify(&token, "GET", HTU, Some(&good)).await.is_ok());

        let wrong_token = AccessTokenBinding::token("token-xyz", f.key.thumbprint.clone());
        assert!(matches!(
            verifier.verify(&token, "GET", HTU, Some(&wrong_token)).await,
            Err(DpopError::AccessTokenBindingFailed { .. })
        ));

        let wrong_key = AccessTokenBinding::thumbprint("someone-else");
        assert!(matches!(
            verifier.verify(&token, "GET", HTU, Some(&wrong_key)).await,
            Err(DpopError::AccessTokenBindingFailed { .. })
        ));

        let no_ath = f.sign(&f.claims());
        assert!(matches!(
            verifier.verify(&no_ath, "GET", HTU, Some(&good)).await,
            Err(DpopError::AccessTokenBindingFailed { .. })
        ));

        let bare = AccessTokenBinding::thumbprint(f.key.thumbprint.clone());
        assert!(verifier.verify(&no_ath, "GET", HTU, Some(&bare)).await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_proof_does_not_touch_caches() {
        let f = Fixture::new();
        let cache = MemoryCache::new();
        let verifier = f
            .verifier()
            .nonce_challenge(Arc::new(CacheNonceChallenge::new(
                Arc::new(cache.clone()),
                Duration::from_secs(900),
            )))
            .replay_detector(Arc::new(CacheReplayAttackDetector::new(
                Arc::new(cache.clone()),
                Duration::from_secs(65),
            )))
            .build()
            .unwrap();

        let stale = f.claims().with("iat", NOW - 1000);
        assert!(matches!(
            verifier.verify(&f.sign(&stale), "GET", HTU, None).await,
            Err(DpopError::ProofExpired { .. })
        ));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_non_string_nonce() {
        let f = Fixture::new();
        let verifier = f
            .verifier()
            .nonce_challenge(Arc::new(CacheNonceChallenge::new(
                Arc::new(MemoryCache::new()),
                Duration::from_secs(900),
            )))
            .build()
            .unwrap();

        let current = verifier
            .verify(&f.sign(&f.claims()), "GET", HTU, None)
            .await
            .unwrap_err()
            .challenge_nonce()
            .unwrap()
            .to_string();

        let claims = f.claims().with("nonce", 12345);
        let err = verifier
            .verify(&f.sign(&claims), "GET", HTU, None)
            .await
            .unwrap_err();
        let fresh = match err {
            DpopError::InvalidNonce { nonce } => nonce,
            other => panic!("expected InvalidNonce, got {other:?}"),
        };
        assert_ne!(fresh, current);

        // The fresh nonce replaced the stored one
        let claims = f.claims().with("nonce", fresh.as_str());
        verifier.verify(&f.sign(&claims), "GET", HTU, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_string_nonce_return_current_policy() {
        let f = Fixture::new();
        let verifier = f
            .verifier()
            .nonce_challenge(Arc::new(
                CacheNonceChallenge::new(Arc::new(MemoryCache::new()), Duration::from_secs(900))
                    .with_policy(InvalidNoncePolicy::ReturnCurrent),
            ))
            .build()
            .unwrap();

        let current = verifier
            .verify(&f.sign(&f.claims()), "GET", HTU, None)
            .await
            .unwrap_err()
            .challenge_nonce()
            .unwrap()
            .to_string();

        for nonce in [json!(12345), json!(null), json!({ "n": current })] {
            let err = verifier
                .verify(&f.sign(&f.claims().with("nonce", nonce)), "GET", HTU, None)
                .await
                .unwrap_err();
            assert!(matches!(err, DpopError::InvalidNonce { .. }));
            assert_eq!(err.challenge_nonce(), Some(current.as_str()));
        }
    }

    #[tokio::test]
    async fn test_builder_validation() {
        let f = Fixture::new();

        let short_retention = f
            .verifier()
            .replay_detector(Arc::new(CacheReplayAttackDetector::new(
                Arc::new(MemoryCache::new()),
                Duration::from_secs(64),
            )))
            .build();
        assert!(matches!(short_retention, Err(DpopError::ConfigurationError { .. })));

        let no_algorithms = f.verifier().allowed_algorithms(Vec::new()).build();
        assert!(matches!(no_algorithms, Err(DpopError::ConfigurationError { .. })));

        let zero_age = f.verifier().max_proof_age(Duration::ZERO).build();
        assert!(matches!(zero_age, Err(DpopError::ConfigurationError { .. })));
    }

    #[tokio::test]
    async fn test_challenge_header() {
        let f = Fixture::new();
        let verifier = f
            .verifier()
            .allowed_algorithms(vec![DpopAlgorithm::ES256, DpopAlgorithm::PS256])
            .build()
            .unwrap();
        assert_eq!(verifier.challenge_header(), r#"DPoP algs="ES256 PS256""#);

        let headers = verifier
            .error_headers(&DpopError::MissingNonce {
                nonce: "abc".to_string(),
            })
            .unwrap();
        assert_eq!(headers.get("dpop-nonce").unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_from_config() {
        let f = Fixture::new();
        let mut config = DpopConfig::default();
        config.nonce.enabled = true;

        let verifier = DpopProofVerifier::from_config(
            &config,
            f.engine.clone(),
            f.clock.clone(),
            Arc::new(MemoryCache::new()),
        )
        .unwrap();

        let err = verifier
            .verify(&f.sign(&f.claims()), "GET", HTU, None)
            .await
            .unwrap_err();
        let nonce = err.challenge_nonce().unwrap().to_string();
        assert!(matches!(err, DpopError::MissingNonce { .. }));

        let token = f.sign(&f.claims().with("nonce", nonce));
        assert!(verifier.verify(&token, "GET", HTU, None).await.is_ok());
        assert!(matches!(
            verifier.verify(&token, "GET", HTU, None).await,
            Err(DpopError::ReplayAttackDetected { .. })
        ));

        config.replay.ttl_seconds = Some(10);
        assert!(
            DpopProofVerifier::from_config(
                &config,
                f.engine.clone(),
                f.clock.clone(),
                Arc::new(MemoryCache::new()),
            )
            .is_err()
        );
    }
}
