//! Helper functions for jsonwebtoken integration
//!
//! Conversions between the DPoP key and algorithm types and the jsonwebtoken
//! key types used by [`JwtSigningEngine`](crate::JwtSigningEngine).

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p256::SecretKey;
use p256::pkcs8::EncodePrivateKey;
use serde_json::{Map, Value};

use crate::Result;
use crate::errors::DpopError;
use crate::types::{DpopAlgorithm, DpopPrivateKey, DpopPublicKey};

/// Convert DpopAlgorithm to jsonwebtoken Algorithm
pub fn algorithm_to_jwt(algorithm: DpopAlgorithm) -> Algorithm {
    match algorithm {
        DpopAlgorithm::ES256 => Algorithm::ES256,
        DpopAlgorithm::ES384 => Algorithm::ES384,
        DpopAlgorithm::RS256 => Algorithm::RS256,
        DpopAlgorithm::RS384 => Algorithm::RS384,
        DpopAlgorithm::RS512 => Algorithm::RS512,
        DpopAlgorithm::PS256 => Algorithm::PS256,
        DpopAlgorithm::PS384 => Algorithm::PS384,
        DpopAlgorithm::PS512 => Algorithm::PS512,
        DpopAlgorithm::EdDSA => Algorithm::EdDSA,
    }
}

/// Convert private key to jsonwebtoken EncodingKey
///
/// EC keys are stored as raw scalars and re-encoded as PKCS#8 DER. RSA keys are
/// stored as PKCS#1 DER, which is what `EncodingKey::from_rsa_der` expects.
///
/// # Errors
/// Returns [`DpopError::CryptographicError`] if the key does not fit `algorithm`
/// or cannot be encoded.
pub fn private_key_to_encoding_key(
    key: &DpopPrivateKey,
    algorithm: DpopAlgorithm,
) -> Result<EncodingKey> {
    match key {
        DpopPrivateKey::EcdsaP256 { key_bytes } if algorithm == DpopAlgorithm::ES256 => {
            let secret_key = SecretKey::from_bytes(key_bytes.into()).map_err(|e| {
                DpopError::CryptographicError {
                    reason: format!("Invalid EC private key: {e}"),
                }
            })?;

            let pkcs8_der =
                secret_key
                    .to_pkcs8_der()
                    .map_err(|e| DpopError::CryptographicError {
                        reason: format!("Failed to convert EC key to PKCS#8: {e}"),
                    })?;

            Ok(EncodingKey::from_ec_der(pkcs8_der.as_bytes()))
        }
        DpopPrivateKey::Rsa { key_der } if algorithm.is_rsa() => {
            Ok(EncodingKey::from_rsa_der(key_der))
        }
        _ => Err(DpopError::CryptographicError {
            reason: format!("private key type cannot sign with {algorithm}"),
        }),
    }
}

/// Convert a known public key to a jsonwebtoken DecodingKey
///
/// # Errors
/// Returns [`DpopError::CryptographicError`] if the key does not fit `algorithm`.
pub fn public_key_to_decoding_key(
    key: &DpopPublicKey,
    algorithm: DpopAlgorithm,
) -> Result<DecodingKey> {
    match key {
        DpopPublicKey::EcdsaP256 { x, y } if algorithm == DpopAlgorithm::ES256 => {
            DecodingKey::from_ec_components(&URL_SAFE_NO_PAD.encode(x), &URL_SAFE_NO_PAD.encode(y))
                .map_err(|e| DpopError::CryptographicError {
                    reason: format!("Failed to create EC decoding key: {e}"),
                })
        }
        DpopPublicKey::Rsa { n, e } if algorithm.is_rsa() => DecodingKey::from_rsa_components(
            &URL_SAFE_NO_PAD.encode(n),
            &URL_SAFE_NO_PAD.encode(e),
        )
        .map_err(|e| DpopError::CryptographicError {
            reason: format!("Invalid RSA key components: {e}"),
        }),
        _ => Err(DpopError::CryptographicError {
            reason: format!("public key type cannot verify {algorithm}"),
        }),
    }
}

/// Convert a header JWK to a jsonwebtoken DecodingKey
///
/// The key type (and curve) must match the family of `algorithm`; a proof that
/// pairs an RSA key with `ES256`, say, is rejected here.
///
/// # Errors
/// Returns [`DpopError::InvalidProofStructure`] if the JWK is unusable for
/// `algorithm`.
pub fn jwk_to_decoding_key(jwk: &Map<String, Value>, algorithm: DpopAlgorithm) -> Result<DecodingKey> {
    let kty = jwk.get("kty").and_then(Value::as_str);
    let crv = jwk.get("crv").and_then(Value::as_str);

    let fits = match algorithm {
        DpopAlgorithm::ES256 => kty == Some("EC") && crv == Some("P-256"),
        DpopAlgorithm::ES384 => kty == Some("EC") && crv == Some("P-384"),
        DpopAlgorithm::EdDSA => kty == Some("OKP") && crv == Some("Ed25519"),
        alg if alg.is_rsa() => kty == Some("RSA"),
        _ => false,
    };
    if !fits {
        return Err(DpopError::structure(format!(
            "JWK (kty {}, crv {}) cannot verify {algorithm}",
            kty.unwrap_or("missing"),
            crv.unwrap_or("none")
        )));
    }

    let parsed: Jwk = serde_json::from_value(Value::Object(jwk.clone()))
        .map_err(|e| DpopError::structure(format!("Malformed JWK: {e}")))?;

    DecodingKey::from_jwk(&parsed)
        .map_err(|e| DpopError::structure(format!("Unusable JWK: {e}")))
}
