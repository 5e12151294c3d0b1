//! Signing engine abstraction
//!
//! The factory and verifier never touch JWS mechanics directly. They hand
//! headers and claim sets to a [`SigningEngine`], which owns serialization,
//! signing and signature verification. [`JwtSigningEngine`] is the
//! jsonwebtoken-backed implementation.

use std::fmt;

use crate::Result;
use crate::types::{ClaimSet, DecodedProof, DpopAlgorithm, DpopKeyPair, DpopPublicKey, ProofHeader};

/// JWS signing and verification
pub trait SigningEngine: Send + Sync + fmt::Debug {
    /// Algorithms this engine can verify
    fn supported_algorithms(&self) -> Vec<DpopAlgorithm>;

    /// Sign `claims` with `key`, returning a compact JWS
    ///
    /// The engine sets `alg` from the key; every other header parameter is
    /// serialized as given.
    fn sign(&self, key: &DpopKeyPair, header: ProofHeader, claims: &ClaimSet) -> Result<String>;

    /// Verify a proof against the `jwk` embedded in its own header
    ///
    /// Fails with [`InvalidProofStructure`](crate::DpopError::InvalidProofStructure)
    /// if the token cannot be parsed or its algorithm is not in `allowed`, and
    /// with [`ProofSignatureInvalid`](crate::DpopError::ProofSignatureInvalid)
    /// if the signature does not verify.
    fn verify(&self, token: &str, allowed: &[DpopAlgorithm]) -> Result<DecodedProof>;

    /// Verify a token against a known public key
    fn verify_with_key(
        &self,
        token: &str,
        key: &DpopPublicKey,
        allowed: &[DpopAlgorithm],
    ) -> Result<(ProofHeader, ClaimSet)>;
}

#[cfg(feature = "jwt-validation")]
pub use jwt::JwtSigningEngine;

#[cfg(feature = "jwt-validation")]
mod jwt {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use jsonwebtoken::{DecodingKey, crypto};
    use serde_json::{Map, Value};
    use tracing::debug;

    use super::SigningEngine;
    use crate::Result;
    use crate::errors::DpopError;
    use crate::helpers::{
        algorithm_to_jwt, jwk_to_decoding_key, private_key_to_encoding_key,
        public_key_to_decoding_key,
    };
    use crate::types::{
        ClaimSet, DecodedProof, DpopAlgorithm, DpopKeyPair, DpopPublicKey, ProofHeader, ProofKey,
        compute_jwk_thumbprint,
    };

    /// Signing engine built on jsonwebtoken
    ///
    /// Compact serialization is assembled here so that arbitrary header
    /// parameters and claims round-trip untouched; jsonwebtoken supplies the
    /// signature primitives.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct JwtSigningEngine;

    impl JwtSigningEngine {
        /// Create an engine
        #[must_use]
        pub fn new() -> Self {
            Self
        }
    }

    struct CompactJws<'a> {
        signing_input: &'a str,
        signature: &'a str,
        header: ProofHeader,
        claims: ClaimSet,
        algorithm: DpopAlgorithm,
    }

    fn decode_segment(segment: &str, what: &str) -> Result<Map<String, Value>> {
        let bytes = URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|e| DpopError::structure(format!("{what} is not valid base64url: {e}")))?;
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(DpopError::structure(format!("{what} is not a JSON object"))),
            Err(e) => Err(DpopError::structure(format!("{what} is not valid JSON: {e}"))),
        }
    }

    fn encode_segment<T: serde::Serialize>(value: &T) -> Result<String> {
        let json = serde_json::to_vec(value).map_err(|e| DpopError::CryptographicError {
            reason: format!("failed to serialize JWS segment: {e}"),
        })?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    fn parse<'a>(token: &'a str, allowed: &[DpopAlgorithm]) -> Result<CompactJws<'a>> {
        let Some((signing_input, signature)) = token.rsplit_once('.') else {
            return Err(DpopError::structure("token is not a compact JWS"));
        };
        let Some((header_b64, payload_b64)) = signing_input.split_once('.') else {
            return Err(DpopError::structure("token is not a compact JWS"));
        };
        if payload_b64.contains('.') {
            return Err(DpopError::structure("token is not a compact JWS"));
        }

        let header = ProofHeader::from(decode_segment(header_b64, "JWS header")?);
        let alg = header
            .alg()
            .ok_or_else(|| DpopError::structure("JWS header has no \"alg\""))?;
        let algorithm: DpopAlgorithm = alg.parse()?;
        if !allowed.contains(&algorithm) {
            return Err(DpopError::structure(format!(
                "algorithm {algorithm} is not allowed"
            )));
        }

        let claims = ClaimSet::from(decode_segment(payload_b64, "JWS payload")?);

        Ok(CompactJws {
            signing_input,
            signature,
            header,
            claims,
            algorithm,
        })
    }

    fn check_signature(jws: &CompactJws<'_>, key: &DecodingKey) -> Result<()> {
        let valid = crypto::verify(
            jws.signature,
            jws.signing_input.as_bytes(),
            key,
            algorithm_to_jwt(jws.algorithm),
        )
        .map_err(|e| DpopError::ProofSignatureInvalid {
            reason: e.to_string(),
        })?;

        if valid {
            Ok(())
        } else {
            Err(DpopError::ProofSignatureInvalid {
                reason: "signature does not match the key".to_string(),
            })
        }
    }

    impl SigningEngine for JwtSigningEngine {
        fn supported_algorithms(&self) -> Vec<DpopAlgorithm> {
            DpopAlgorithm::ALL.to_vec()
        }

        fn sign(&self, key: &DpopKeyPair, header: ProofHeader, claims: &ClaimSet) -> Result<String> {
            let encoding_key = private_key_to_encoding_key(&key.private_key, key.algorithm)?;
            let header = header.with("alg", key.algorithm.as_str());

            let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(claims)?);
            let signature = crypto::sign(
                signing_input.as_bytes(),
                &encoding_key,
                algorithm_to_jwt(key.algorithm),
            )
            .map_err(|e| DpopError::CryptographicError {
                reason: format!("JWT signing failed: {e}"),
            })?;

            debug!(algorithm = %key.algorithm, "Signed JWS");
            Ok(format!("{signing_input}.{signature}"))
        }

        fn verify(&self, token: &str, allowed: &[DpopAlgorithm]) -> Result<DecodedProof> {
            let jws = parse(token, allowed)?;

            let jwk = jws
                .header
                .jwk()
                .ok_or_else(|| DpopError::structure("JWS header has no \"jwk\" object"))?
                .clone();
            let decoding_key = jwk_to_decoding_key(&jwk, jws.algorithm)?;
            check_signature(&jws, &decoding_key)?;

            let thumbprint = compute_jwk_thumbprint(&jwk)?;
            debug!(algorithm = %jws.algorithm, "Verified JWS against embedded key");

            Ok(DecodedProof::new(
                ProofKey::new(jwk, thumbprint, jws.algorithm),
                jws.claims,
                jws.header,
            ))
        }

        fn verify_with_key(
            &self,
            token: &str,
            key: &DpopPublicKey,
            allowed: &[DpopAlgorithm],
        ) -> Result<(ProofHeader, ClaimSet)> {
            let jws = parse(token, allowed)?;
            let decoding_key = public_key_to_decoding_key(key, jws.algorithm)?;
            check_signature(&jws, &decoding_key)?;
            Ok((jws.header, jws.claims))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::DPOP_JWT_TYPE;
        use pretty_assertions::assert_eq;

        fn proof_header(key: &DpopKeyPair) -> ProofHeader {
            ProofHeader::for_proof(&key.public_key.to_jwk())
        }

        #[test]
        fn test_sign_and_verify_es256() {
            let engine = JwtSigningEngine::new();
            let key = DpopKeyPair::generate_p256().unwrap();
            let claims = ClaimSet::new().with("htm", "GET").with("custom", 42);

            let token = engine.sign(&key, proof_header(&key), &claims).unwrap();
            let decoded = engine.verify(&token, &[DpopAlgorithm::ES256]).unwrap();

            assert_eq!(decoded.payload(), &claims);
            assert_eq!(decoded.protected_header().typ(), Some(DPOP_JWT_TYPE));
            assert_eq!(decoded.protected_header().alg(), Some("ES256"));
            assert_eq!(decoded.thumbprint(), key.thumbprint);
            assert_eq!(decoded.signing_key().algorithm(), DpopAlgorithm::ES256);
        }

        #[test]
        fn test_sign_and_verify_rsa() {
            let engine = JwtSigningEngine::new();
            let key = DpopKeyPair::generate_rsa(DpopAlgorithm::PS256).unwrap();
            let claims = ClaimSet::new().with("htm", "POST");

            let token = engine.sign(&key, proof_header(&key), &claims).unwrap();
            let decoded = engine.verify(&token, &[DpopAlgorithm::PS256]).unwrap();
            assert_eq!(decoded.thumbprint(), key.thumbprint);

            let (_, verified) = engine
                .verify_with_key(&token, &key.public_key, &[DpopAlgorithm::PS256])
                .unwrap();
            assert_eq!(verified, claims);
        }

        #[test]
        fn test_disallowed_algorithm_is_malformed() {
            let engine = JwtSigningEngine::new();
            let key = DpopKeyPair::generate_p256().unwrap();
            let token = engine.sign(&key, proof_header(&key), &ClaimSet::new()).unwrap();

            assert!(matches!(
                engine.verify(&token, &[DpopAlgorithm::RS256]),
                Err(DpopError::InvalidProofStructure { .. })
            ));
        }

        #[test]
        fn test_tampered_payload_fails_signature() {
            let engine = JwtSigningEngine::new();
            let key = DpopKeyPair::generate_p256().unwrap();
            let token = engine
                .sign(&key, proof_header(&key), &ClaimSet::new().with("htm", "GET"))
                .unwrap();

            let parts: Vec<&str> = token.split('.').collect();
            let forged = encode_segment(&ClaimSet::new().with("htm", "POST")).unwrap();
            let tampered = format!("{}.{}.{}", parts[0], forged, parts[2]);

            assert!(matches!(
                engine.verify(&tampered, &[DpopAlgorithm::ES256]),
                Err(DpopError::ProofSignatureInvalid { .. })
            ));
        }

        #[test]
        fn test_foreign_key_fails_signature() {
            let engine = JwtSigningEngine::new();
            let signer = DpopKeyPair::generate_p256().unwrap();
            let other = DpopKeyPair::generate_p256().unwrap();

            // Signed by one key, advertising another
            let token = engine
                .sign(&signer, proof_header(&other), &ClaimSet::new())
                .unwrap();
            assert!(matches!(
                engine.verify(&token, &[DpopAlgorithm::ES256]),
                Err(DpopError::ProofSignatureInvalid { .. })
            ));
        }

        #[test]
        fn test_unparseable_tokens() {
            let engine = JwtSigningEngine::new();
            for token in ["", "abc", "a.b", "a.b.c.d", "!!!.???.sig"] {
                assert!(
                    matches!(
                        engine.verify(token, &DpopAlgorithm::ALL),
                        Err(DpopError::InvalidProofStructure { .. })
                    ),
                    "token {token:?} should be malformed"
                );
            }
        }

        #[test]
        fn test_missing_jwk_is_malformed() {
            let engine = JwtSigningEngine::new();
            let key = DpopKeyPair::generate_p256().unwrap();
            let header = ProofHeader::new().with("typ", DPOP_JWT_TYPE);
            let token = engine.sign(&key, header, &ClaimSet::new()).unwrap();

            assert!(matches!(
                engine.verify(&token, &[DpopAlgorithm::ES256]),
                Err(DpopError::InvalidProofStructure { .. })
            ));
        }
    }
}
