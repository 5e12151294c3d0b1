//! DPoP proof creation
//!
//! [`DpopProofFactory`] is the client half of the protocol: it picks a signing
//! key, builds the `dpop+jwt` claims for a request and remembers the nonces
//! servers hand out.

use std::sync::Arc;

use ::http::HeaderMap;
use tracing::debug;

use crate::{
    Result,
    clock::Clock,
    engine::SigningEngine,
    errors::DpopError,
    http::nonce_from_headers,
    keys::{DpopKeySelector, KeyStore},
    nonce::{NonceScope, NonceStore, random_hex},
    types::{
        AccessTokenBinding, ClaimSet, DpopAlgorithm, DpopKeyPair, DpopProof, ProofHeader,
        access_token_hash,
    },
    uri::{create_htu, is_valid_http_method, is_valid_http_uri},
};

/// Builds DPoP proofs for outgoing requests
#[derive(Debug, Clone)]
pub struct DpopProofFactory {
    engine: Arc<dyn SigningEngine>,
    keys: DpopKeySelector,
    clock: Arc<dyn Clock>,
    nonce_store: Option<Arc<dyn NonceStore>>,
}

impl DpopProofFactory {
    /// Create a factory over a key store
    pub fn new(
        engine: Arc<dyn SigningEngine>,
        key_store: Arc<dyn KeyStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            keys: DpopKeySelector::new(key_store).with_clock(clock.clone()),
            clock,
            nonce_store: None,
        }
    }

    /// Remember server nonces in `store` and include them in proofs
    #[must_use]
    pub fn with_nonce_store(mut self, store: Arc<dyn NonceStore>) -> Self {
        self.nonce_store = Some(store);
        self
    }

    /// Create a proof for `method` and `uri`
    ///
    /// `ranked` is the server's algorithm preference, best first. When a
    /// binding is given the proof is signed with the key the token is bound
    /// to; a full token additionally adds the `ath` claim.
    ///
    /// # Errors
    /// - [`DpopError::InvalidProofStructure`] for an invalid method or URI
    /// - [`DpopError::NoSuitableKey`] if no key fits
    /// - signing and nonce store failures
    pub async fn create_proof(
        &self,
        method: &str,
        uri: &str,
        ranked: &[DpopAlgorithm],
        binding: Option<&AccessTokenBinding>,
    ) -> Result<DpopProof> {
        if !is_valid_http_method(method) {
            return Err(DpopError::structure(format!("invalid HTTP method: {method}")));
        }
        if !is_valid_http_uri(uri) {
            return Err(DpopError::structure("URI must be an absolute http(s) URI"));
        }

        let key = self
            .select_key(ranked, binding.map(AccessTokenBinding::jkt))
            .await?;
        let htu = create_htu(uri);

        let mut claims = ClaimSet::new()
            .with("htm", method.to_ascii_uppercase())
            .with("htu", htu.as_str())
            .with("iat", self.clock.timestamp())
            .with("jti", random_hex(32));

        if let Some(access_token) = binding.and_then(AccessTokenBinding::access_token) {
            claims.insert("ath", access_token_hash(access_token));
        }

        if let Some(store) = &self.nonce_store {
            let scope = NonceScope::new(key.thumbprint.as_str(), &htu);
            if let Some(nonce) = store.current_nonce(&scope).await? {
                claims.insert("nonce", nonce);
            }
        }

        let header = ProofHeader::for_proof(&key.public_key.to_jwk());
        let token = self.engine.sign(&key, header, &claims)?;

        debug!(
            htm = %method,
            htu = %htu,
            algorithm = %key.algorithm,
            thumbprint = %key.thumbprint,
            "Created DPoP proof"
        );

        Ok(DpopProof {
            token,
            thumbprint: key.thumbprint.clone(),
            algorithm: key.algorithm,
            claims,
        })
    }

    /// Create a proof for `request` and set it as the request's `DPoP` header
    ///
    /// The method and URI come from the request, which must carry an absolute
    /// URI. An existing `DPoP` header is replaced.
    ///
    /// # Errors
    /// As [`create_proof`](Self::create_proof).
    pub async fn create_proof_for_request<B>(
        &self,
        request: &mut ::http::Request<B>,
        ranked: &[DpopAlgorithm],
        binding: Option<&AccessTokenBinding>,
    ) -> Result<DpopProof> {
        let uri = request.uri().to_string();
        let proof = self
            .create_proof(request.method().as_str(), &uri, ranked, binding)
            .await?;
        proof.insert_into(request.headers_mut())?;
        Ok(proof)
    }

    /// Key an authorization request should bind the issued token to
    ///
    /// Its thumbprint is what the client sends as `dpop_jkt`.
    ///
    /// # Errors
    /// [`DpopError::NoSuitableKey`] if no key fits `ranked`.
    pub async fn key_to_bind(&self, ranked: &[DpopAlgorithm]) -> Result<DpopKeyPair> {
        self.select_key(ranked, None).await
    }

    /// Remember a nonce the server at `htu` issued to `thumbprint`
    ///
    /// Does nothing when the factory has no nonce store.
    ///
    /// # Errors
    /// Propagates nonce store failures.
    pub async fn store_next_nonce(&self, htu: &str, thumbprint: &str, nonce: &str) -> Result<()> {
        let Some(store) = &self.nonce_store else {
            return Ok(());
        };
        let scope = NonceScope::new(thumbprint, &create_htu(htu));
        store.store_next_nonce(&scope, nonce).await?;
        debug!(endpoint = %scope.endpoint(), "Stored DPoP nonce for next proof");
        Ok(())
    }

    /// Remember the `DPoP-Nonce` of a response, if it carries one
    ///
    /// Returns whether a nonce was found.
    ///
    /// # Errors
    /// Propagates nonce store failures.
    pub async fn store_next_nonce_from_response(
        &self,
        headers: &HeaderMap,
        htu: &str,
        thumbprint: &str,
    ) -> Result<bool> {
        match nonce_from_headers(headers) {
            Some(nonce) => {
                self.store_next_nonce(htu, thumbprint, nonce).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn select_key(
        &self,
        ranked: &[DpopAlgorithm],
        required_thumbprint: Option<&str>,
    ) -> Result<DpopKeyPair> {
        let supported = self.engine.supported_algorithms();
        let usable: Vec<DpopAlgorithm> = ranked
            .iter()
            .copied()
            .filter(|algorithm| supported.contains(algorithm))
            .collect();
        self.keys.select(&usable, required_thumbprint).await
    }
}

#[cfg(all(test, feature = "jwt-validation"))]
mod tests {
    use super::*;
    use crate::DPOP_JWT_TYPE;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::engine::JwtSigningEngine;
    use crate::errors::NoSuitableKeyReason;
    use crate::keys::MemoryKeyStore;
    use crate::nonce::CacheNonceStore;
    use ::http::HeaderValue;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    fn factory(keys: Vec<DpopKeyPair>) -> DpopProofFactory {
        DpopProofFactory::new(
            Arc::new(JwtSigningEngine::new()),
            Arc::new(MemoryKeyStore::with_keys(keys)),
            Arc::new(ManualClock::new(NOW)),
        )
    }

    #[tokio::test]
    async fn test_create_proof_claims() {
        let key = DpopKeyPair::generate_p256().unwrap();
        let factory = factory(vec![key.clone()]);

        let proof = factory
            .create_proof(
                "post",
                "https://server.example.com/token?x=1#frag",
                &[DpopAlgorithm::ES256],
                None,
            )
            .await
            .unwrap();

        assert_eq!(proof.thumbprint, key.thumbprint);
        assert_eq!(proof.algorithm, DpopAlgorithm::ES256);
        assert_eq!(proof.claims.htm().unwrap(), Some("POST"));
        assert_eq!(proof.claims.htu().unwrap(), Some("https://server.example.com/token"));
        assert_eq!(proof.claims.iat().unwrap(), Some(NOW));
        assert_eq!(proof.claims.jti().unwrap().map(str::len), Some(64));
        assert!(!proof.claims.contains("ath"));
        assert!(!proof.claims.contains("nonce"));

        let decoded = JwtSigningEngine::new()
            .verify(proof.as_str(), &[DpopAlgorithm::ES256])
            .unwrap();
        assert_eq!(decoded.protected_header().typ(), Some(DPOP_JWT_TYPE));
        assert!(decoded.protected_header().jwk().is_some());
        assert_eq!(decoded.payload(), &proof.claims);
    }

    #[tokio::test]
    async fn test_jti_is_unique() {
        let factory = factory(vec![DpopKeyPair::generate_p256().unwrap()]);
        let uri = "https://server.example.com/resource";
        let a = factory.create_proof("GET", uri, &[DpopAlgorithm::ES256], None).await.unwrap();
        let b = factory.create_proof("GET", uri, &[DpopAlgorithm::ES256], None).await.unwrap();
        assert_ne!(a.claims.jti().unwrap(), b.claims.jti().unwrap());
    }

    #[tokio::test]
    async fn test_token_binding_adds_ath() {
        let key = DpopKeyPair::generate_p256().unwrap();
        let factory = factory(vec![key.clone()]);

        let binding = AccessTokenBinding::token("access-token", key.thumbprint.clone());
        let proof = factory
            .create_proof("GET", "https://rs.example.com/", &[DpopAlgorithm::ES256], Some(&binding))
            .await
            .unwrap();
        assert_eq!(
            proof.claims.ath().unwrap(),
            Some(access_token_hash("access-token").as_str())
        );

        let bare = AccessTokenBinding::thumbprint(key.thumbprint.clone());
        let proof = factory
            .create_proof("GET", "https://rs.example.com/", &[DpopAlgorithm::ES256], Some(&bare))
            .await
            .unwrap();
        assert!(!proof.claims.contains("ath"));
    }

    #[tokio::test]
    async fn test_binding_to_unknown_key() {
        let factory = factory(vec![DpopKeyPair::generate_p256().unwrap()]);
        let binding = AccessTokenBinding::thumbprint("not-one-of-ours");

        let err = factory
            .create_proof("GET", "https://rs.example.com/", &[DpopAlgorithm::ES256], Some(&binding))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DpopError::NoSuitableKey {
                reason: NoSuitableKeyReason::ThumbprintNotFound
            }
        ));

        let err = factory.key_to_bind(&[DpopAlgorithm::PS256]).await.unwrap_err();
        assert!(matches!(
            err,
            DpopError::NoSuitableKey {
                reason: NoSuitableKeyReason::NoAlgorithmOverlap
            }
        ));
    }

    #[tokio::test]
    async fn test_create_proof_for_request() {
        let key = DpopKeyPair::generate_p256().unwrap();
        let factory = factory(vec![key.clone()]);

        let mut request = ::http::Request::builder()
            .method("POST")
            .uri("https://server.example.com/token?grant=1")
            .header("dpop", "stale.proof.value")
            .body(())
            .unwrap();

        let proof = factory
            .create_proof_for_request(&mut request, &[DpopAlgorithm::ES256], None)
            .await
            .unwrap();
        assert_eq!(proof.claims.htm().unwrap(), Some("POST"));
        assert_eq!(proof.claims.htu().unwrap(), Some("https://server.example.com/token"));
        assert_eq!(crate::http::extract_proof(request.headers()).unwrap(), proof.as_str());

        let mut relative = ::http::Request::get("/token").body(()).unwrap();
        assert!(
            factory
                .create_proof_for_request(&mut relative, &[DpopAlgorithm::ES256], None)
                .await
                .is_err()
        );
        assert!(relative.headers().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let factory = factory(vec![DpopKeyPair::generate_p256().unwrap()]);
        assert!(
            factory
                .create_proof("GET POST", "https://rs.example.com/", &[DpopAlgorithm::ES256], None)
                .await
                .is_err()
        );
        assert!(
            factory
                .create_proof("GET", "/relative", &[DpopAlgorithm::ES256], None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_stored_nonce_is_included() {
        let key = DpopKeyPair::generate_p256().unwrap();
        let factory = factory(vec![key.clone()]).with_nonce_store(Arc::new(CacheNonceStore::new(
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
        )));

        let mut headers = HeaderMap::new();
        assert!(
            !factory
                .store_next_nonce_from_response(&headers, "https://rs.example.com/a", &key.thumbprint)
                .await
                .unwrap()
        );

        headers.insert("dpop-nonce", HeaderValue::from_static("server-nonce"));
        assert!(
            factory
                .store_next_nonce_from_response(&headers, "https://rs.example.com/a", &key.thumbprint)
                .await
                .unwrap()
        );

        let proof = factory
            .create_proof("GET", "https://rs.example.com/b?q", &[DpopAlgorithm::ES256], None)
            .await
            .unwrap();
        assert_eq!(proof.claims.nonce().unwrap(), Some("server-nonce"));

        // A different server has no nonce yet
        let proof = factory
            .create_proof("GET", "https://as.example.com/token", &[DpopAlgorithm::ES256], None)
            .await
            .unwrap();
        assert!(!proof.claims.contains("nonce"));
    }
}
