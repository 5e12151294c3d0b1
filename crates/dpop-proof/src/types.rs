//! Core DPoP types and data structures
//!
//! Algorithms, key material, claim sets, decoded proofs and the access token
//! binding a verification may be checked against.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::info;
use zeroize::Zeroize;

use crate::{DpopError, Result};

/// JWK members that only appear in private or symmetric keys
pub const PRIVATE_JWK_MEMBERS: &[&str] = &["d", "p", "q", "dp", "dq", "qi", "oth", "k"];

/// Asymmetric JWS algorithms a DPoP proof may be signed with
///
/// "none" and the MAC algorithms are deliberately unrepresentable, so a proof
/// naming them fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DpopAlgorithm {
    /// ECDSA with P-256 and SHA-256
    ES256,
    /// ECDSA with P-384 and SHA-384
    ES384,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RS256,
    /// RSASSA-PKCS1-v1_5 with SHA-384
    RS384,
    /// RSASSA-PKCS1-v1_5 with SHA-512
    RS512,
    /// RSASSA-PSS with SHA-256
    PS256,
    /// RSASSA-PSS with SHA-384
    PS384,
    /// RSASSA-PSS with SHA-512
    PS512,
    /// Edwards-curve signatures (Ed25519)
    EdDSA,
}

impl DpopAlgorithm {
    /// Every algorithm in the catalogue, strongest preference first
    pub const ALL: [DpopAlgorithm; 9] = [
        Self::ES256,
        Self::ES384,
        Self::EdDSA,
        Self::PS256,
        Self::PS384,
        Self::PS512,
        Self::RS256,
        Self::RS384,
        Self::RS512,
    ];

    /// Algorithm name as registered in RFC 7518
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
            Self::EdDSA => "EdDSA",
        }
    }

    /// Whether this algorithm signs with an RSA key
    #[must_use]
    pub fn is_rsa(self) -> bool {
        matches!(
            self,
            Self::RS256 | Self::RS384 | Self::RS512 | Self::PS256 | Self::PS384 | Self::PS512
        )
    }

    /// Parse a ranked list of algorithm names, dropping unknown ones
    ///
    /// Order is preserved; duplicates are removed.
    pub fn parse_ranked<S: AsRef<str>>(names: &[S]) -> Vec<Self> {
        let mut ranked = Vec::with_capacity(names.len());
        for name in names {
            if let Ok(algorithm) = name.as_ref().parse::<Self>() {
                if !ranked.contains(&algorithm) {
                    ranked.push(algorithm);
                }
            }
        }
        ranked
    }
}

impl fmt::Display for DpopAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DpopAlgorithm {
    type Err = DpopError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|algorithm| algorithm.as_str() == s)
            .ok_or_else(|| DpopError::structure(format!("algorithm '{s}' is not permitted for DPoP")))
    }
}

/// DPoP key pair with metadata
///
/// The private key is zeroized on drop.
#[derive(Debug, Clone)]
pub struct DpopKeyPair {
    /// Unique identifier for this key pair
    pub id: String,

    /// Private key material (zeroized on drop)
    pub private_key: DpopPrivateKey,

    /// Public key material
    pub public_key: DpopPublicKey,

    /// JWK thumbprint (RFC 7638)
    pub thumbprint: String,

    /// Algorithm this key signs with
    pub algorithm: DpopAlgorithm,

    /// Key creation timestamp
    pub created_at: SystemTime,

    /// Key expiration (None = never expires)
    pub expires_at: Option<SystemTime>,
}

impl DpopKeyPair {
    /// Generate a key pair for the given algorithm
    ///
    /// # Errors
    /// Returns [`DpopError::KeyManagementError`] for algorithms without local key
    /// generation (ES384, EdDSA) or if generation fails.
    pub fn generate(algorithm: DpopAlgorithm) -> Result<Self> {
        let key_pair = match algorithm {
            DpopAlgorithm::ES256 => Self::generate_p256()?,
            alg if alg.is_rsa() => Self::generate_rsa(alg)?,
            other => {
                return Err(DpopError::KeyManagementError {
                    reason: format!("key generation is not supported for {other}"),
                });
            }
        };
        info!(
            algorithm = %algorithm,
            thumbprint = %key_pair.thumbprint,
            "Generated DPoP key pair"
        );
        Ok(key_pair)
    }

    /// Generate a new P-256 (ES256) key pair
    ///
    /// # Errors
    /// Returns error if the public point cannot be encoded
    pub fn generate_p256() -> Result<Self> {
        use p256::ecdsa::{SigningKey, VerifyingKey};
        use rand::rngs::OsRng;

        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(signing_key.to_bytes().as_ref());

        let point = verifying_key.to_encoded_point(false);
        let (Some(x_bytes), Some(y_bytes)) = (point.x(), point.y()) else {
            return Err(DpopError::CryptographicError {
                reason: "failed to extract coordinates from P-256 public key".to_string(),
            });
        };

        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(x_bytes);
        y.copy_from_slice(y_bytes);

        Ok(Self::from_parts(
            DpopPrivateKey::EcdsaP256 { key_bytes },
            DpopPublicKey::EcdsaP256 { x, y },
            DpopAlgorithm::ES256,
        ))
    }

    /// Generate a new RSA-2048 key pair for an RSA algorithm
    ///
    /// # Errors
    /// Returns error if `algorithm` is not an RSA algorithm or generation fails
    pub fn generate_rsa(algorithm: DpopAlgorithm) -> Result<Self> {
        use rand::rngs::OsRng;
        use rsa::pkcs1::EncodeRsaPrivateKey;
        use rsa::{RsaPrivateKey, RsaPublicKey};

        if !algorithm.is_rsa() {
            return Err(DpopError::KeyManagementError {
                reason: format!("{algorithm} is not an RSA algorithm"),
            });
        }

        let private_key =
            RsaPrivateKey::new(&mut OsRng, 2048).map_err(|e| DpopError::KeyManagementError {
                reason: format!("failed to generate RSA key: {e}"),
            })?;
        let public_key = RsaPublicKey::from(&private_key);

        let key_der = private_key
            .to_pkcs1_der()
            .map_err(|e| DpopError::CryptographicError {
                reason: format!("failed to encode RSA private key: {e}"),
            })?;

        Ok(Self::from_parts(
            DpopPrivateKey::Rsa {
                key_der: key_der.as_bytes().to_vec(),
            },
            DpopPublicKey::Rsa {
                n: public_key.n().to_bytes_be(),
                e: public_key.e().to_bytes_be(),
            },
            algorithm,
        ))
    }

    /// Assemble a key pair from existing key material
    #[must_use]
    pub fn from_parts(
        private_key: DpopPrivateKey,
        public_key: DpopPublicKey,
        algorithm: DpopAlgorithm,
    ) -> Self {
        let thumbprint = public_key.thumbprint();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            private_key,
            public_key,
            thumbprint,
            algorithm,
            created_at: SystemTime::now(),
            expires_at: None,
        }
    }

    /// Set an expiry relative to creation
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.expires_at = Some(self.created_at + lifetime);
        self
    }

    /// Check if the key pair has expired by the wall clock
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// Check if the key pair has expired at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }
}

/// Private key material
#[derive(Clone)]
pub enum DpopPrivateKey {
    /// RSA private key
    Rsa {
        /// PKCS#1 DER encoding
        key_der: Vec<u8>,
    },
    /// ECDSA P-256 private key
    EcdsaP256 {
        /// Raw 32-byte scalar
        key_bytes: [u8; 32],
    },
}

impl fmt::Debug for DpopPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa { .. } => f.write_str("DpopPrivateKey::Rsa([REDACTED])"),
            Self::EcdsaP256 { .. } => f.write_str("DpopPrivateKey::EcdsaP256([REDACTED])"),
        }
    }
}

impl Zeroize for DpopPrivateKey {
    fn zeroize(&mut self) {
        match self {
            Self::Rsa { key_der } => key_der.zeroize(),
            Self::EcdsaP256 { key_bytes } => key_bytes.zeroize(),
        }
    }
}

impl Drop for DpopPrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Public key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DpopPublicKey {
    /// RSA public key
    Rsa {
        /// Modulus, big-endian
        n: Vec<u8>,
        /// Public exponent, big-endian
        e: Vec<u8>,
    },
    /// ECDSA P-256 public key
    EcdsaP256 {
        /// X coordinate
        x: [u8; 32],
        /// Y coordinate
        y: [u8; 32],
    },
}

impl DpopPublicKey {
    /// Public JWK for the `jwk` header parameter
    #[must_use]
    pub fn to_jwk(&self) -> DpopJwk {
        match self {
            Self::Rsa { n, e } => DpopJwk::Rsa {
                n: URL_SAFE_NO_PAD.encode(n),
                e: URL_SAFE_NO_PAD.encode(e),
            },
            Self::EcdsaP256 { x, y } => DpopJwk::Ec {
                crv: "P-256".to_string(),
                x: URL_SAFE_NO_PAD.encode(x),
                y: URL_SAFE_NO_PAD.encode(y),
            },
        }
    }

    /// RFC 7638 thumbprint of this key
    #[must_use]
    pub fn thumbprint(&self) -> String {
        self.to_jwk().thumbprint()
    }
}

/// Public JSON Web Key as embedded in proof headers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kty")]
pub enum DpopJwk {
    /// RSA public key
    #[serde(rename = "RSA")]
    Rsa {
        /// Modulus (base64url)
        n: String,
        /// Public exponent (base64url)
        e: String,
    },

    /// Elliptic curve public key
    #[serde(rename = "EC")]
    Ec {
        /// Curve name
        crv: String,
        /// X coordinate (base64url)
        x: String,
        /// Y coordinate (base64url)
        y: String,
    },
}

impl DpopJwk {
    /// JWK as a JSON object
    #[must_use]
    pub fn to_json(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// RFC 7638 thumbprint
    #[must_use]
    pub fn thumbprint(&self) -> String {
        let canonical = match self {
            Self::Rsa { n, e } => format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#),
            Self::Ec { crv, x, y } => {
                format!(r#"{{"crv":"{crv}","kty":"EC","x":"{x}","y":"{y}"}}"#)
            }
        };
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }
}

/// Compute the RFC 7638 thumbprint of a raw JWK object
///
/// Only the required members for the key type take part, in lexicographic
/// order. Supports EC, RSA and OKP keys.
///
/// # Errors
/// Returns [`DpopError::InvalidProofStructure`] if `kty` is unsupported or a
/// required member is missing or not a string.
pub fn compute_jwk_thumbprint(jwk: &Map<String, Value>) -> Result<String> {
    let member = |name: &str| -> Result<&str> {
        jwk.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| DpopError::structure(format!("JWK is missing the \"{name}\" member")))
    };

    let canonical = match member("kty")? {
        "EC" => format!(
            r#"{{"crv":{},"kty":"EC","x":{},"y":{}}}"#,
            json_string(member("crv")?),
            json_string(member("x")?),
            json_string(member("y")?)
        ),
        "RSA" => format!(
            r#"{{"e":{},"kty":"RSA","n":{}}}"#,
            json_string(member("e")?),
            json_string(member("n")?)
        ),
        "OKP" => format!(
            r#"{{"crv":{},"kty":"OKP","x":{}}}"#,
            json_string(member("crv")?),
            json_string(member("x")?)
        ),
        other => {
            return Err(DpopError::structure(format!(
                "unsupported JWK key type '{other}'"
            )));
        }
    };

    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
}

fn json_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

/// `ath` value for an access token: base64url(SHA-256(token))
#[must_use]
pub fn access_token_hash(access_token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(access_token.as_bytes()))
}

/// JWT claim set with typed accessors
///
/// Unknown claims are preserved untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(Map<String, Value>);

impl ClaimSet {
    /// Create an empty claim set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw claim value
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Whether the claim is present (with any value)
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Set a claim, replacing any previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Remove a claim
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// String claim: `Ok(None)` if absent, error if present with another type
    ///
    /// # Errors
    /// Returns [`DpopError::InvalidProofStructure`] if the claim is not a string
    pub fn get_str(&self, name: &str) -> Result<Option<&str>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(DpopError::structure(format!(
                "the \"{name}\" claim must be a string"
            ))),
        }
    }

    /// Integer claim: `Ok(None)` if absent, error if present with another type
    ///
    /// # Errors
    /// Returns [`DpopError::InvalidProofStructure`] if the claim is not an integer
    pub fn get_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) if n.as_i64().is_some() => Ok(n.as_i64()),
            Some(_) => Err(DpopError::structure(format!(
                "the \"{name}\" claim must be an integer"
            ))),
        }
    }

    /// `htm` claim
    pub fn htm(&self) -> Result<Option<&str>> {
        self.get_str("htm")
    }

    /// `htu` claim
    pub fn htu(&self) -> Result<Option<&str>> {
        self.get_str("htu")
    }

    /// `jti` claim
    pub fn jti(&self) -> Result<Option<&str>> {
        self.get_str("jti")
    }

    /// `iat` claim
    pub fn iat(&self) -> Result<Option<i64>> {
        self.get_i64("iat")
    }

    /// `exp` claim
    pub fn exp(&self) -> Result<Option<i64>> {
        self.get_i64("exp")
    }

    /// `nbf` claim
    pub fn nbf(&self) -> Result<Option<i64>> {
        self.get_i64("nbf")
    }

    /// `ath` claim
    pub fn ath(&self) -> Result<Option<&str>> {
        self.get_str("ath")
    }

    /// `nonce` claim
    pub fn nonce(&self) -> Result<Option<&str>> {
        self.get_str("nonce")
    }

    /// `jkt` claim (self-signed nonce tokens)
    pub fn jkt(&self) -> Result<Option<&str>> {
        self.get_str("jkt")
    }

    /// Underlying JSON object
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying JSON object
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ClaimSet {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// JWS protected header with typed accessors
///
/// Unknown parameters are preserved untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofHeader(Map<String, Value>);

impl ProofHeader {
    /// Create an empty header
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Header for an outgoing DPoP proof: `typ` and public `jwk`
    #[must_use]
    pub fn for_proof(jwk: &DpopJwk) -> Self {
        Self::new()
            .with("typ", crate::DPOP_JWT_TYPE)
            .with("jwk", Value::Object(jwk.to_json()))
    }

    /// Raw parameter value
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Set a parameter, replacing any previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    fn str_param(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// `typ` parameter, if present and a string
    #[must_use]
    pub fn typ(&self) -> Option<&str> {
        self.str_param("typ")
    }

    /// `alg` parameter, if present and a string
    #[must_use]
    pub fn alg(&self) -> Option<&str> {
        self.str_param("alg")
    }

    /// `kid` parameter, if present and a string
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.str_param("kid")
    }

    /// `crv` parameter, if present and a string
    #[must_use]
    pub fn crv(&self) -> Option<&str> {
        self.str_param("crv")
    }

    /// `jwk` parameter, if present and an object
    #[must_use]
    pub fn jwk(&self) -> Option<&Map<String, Value>> {
        self.0.get("jwk").and_then(Value::as_object)
    }

    /// Underlying JSON object
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for ProofHeader {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The key a presented proof was signed with
#[derive(Debug, Clone, PartialEq)]
pub struct ProofKey {
    jwk: Map<String, Value>,
    thumbprint: String,
    algorithm: DpopAlgorithm,
}

impl ProofKey {
    /// Create a proof key handle
    #[must_use]
    pub fn new(jwk: Map<String, Value>, thumbprint: String, algorithm: DpopAlgorithm) -> Self {
        Self {
            jwk,
            thumbprint,
            algorithm,
        }
    }

    /// The JWK exactly as it appeared in the header
    #[must_use]
    pub fn jwk(&self) -> &Map<String, Value> {
        &self.jwk
    }

    /// RFC 7638 thumbprint (`jkt`)
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Algorithm the proof was signed with
    #[must_use]
    pub fn algorithm(&self) -> DpopAlgorithm {
        self.algorithm
    }
}

/// A parsed and signature-verified proof
///
/// Produced by a [`SigningEngine`](crate::SigningEngine); returned unchanged by
/// the verifier on success.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedProof {
    signing_key: ProofKey,
    payload: ClaimSet,
    protected_header: ProofHeader,
}

impl DecodedProof {
    /// Create a decoded proof
    #[must_use]
    pub fn new(signing_key: ProofKey, payload: ClaimSet, protected_header: ProofHeader) -> Self {
        Self {
            signing_key,
            payload,
            protected_header,
        }
    }

    /// Key that signed the proof
    #[must_use]
    pub fn signing_key(&self) -> &ProofKey {
        &self.signing_key
    }

    /// Proof claims
    #[must_use]
    pub fn payload(&self) -> &ClaimSet {
        &self.payload
    }

    /// Protected header
    #[must_use]
    pub fn protected_header(&self) -> &ProofHeader {
        &self.protected_header
    }

    /// Shorthand for the signing key thumbprint
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        self.signing_key.thumbprint()
    }
}

/// What an access token is bound to, supplied per call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessTokenBinding {
    /// Only the `jkt` the token is bound to
    Thumbprint(String),
    /// The token itself and its `jkt`
    Token {
        /// Access token value
        access_token: String,
        /// Thumbprint the token is bound to
        thumbprint: String,
    },
}

impl AccessTokenBinding {
    /// Bind to a bare thumbprint
    pub fn thumbprint(jkt: impl Into<String>) -> Self {
        Self::Thumbprint(jkt.into())
    }

    /// Bind to an access token and its thumbprint
    pub fn token(access_token: impl Into<String>, jkt: impl Into<String>) -> Self {
        Self::Token {
            access_token: access_token.into(),
            thumbprint: jkt.into(),
        }
    }

    /// The bound thumbprint
    #[must_use]
    pub fn jkt(&self) -> &str {
        match self {
            Self::Thumbprint(jkt) | Self::Token { thumbprint: jkt, .. } => jkt,
        }
    }

    /// The access token, when the full token is known
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        match self {
            Self::Thumbprint(_) => None,
            Self::Token { access_token, .. } => Some(access_token),
        }
    }
}

/// An outgoing proof ready for the `DPoP` request header
#[derive(Debug, Clone)]
pub struct DpopProof {
    /// Compact JWS
    pub token: String,
    /// Thumbprint of the signing key
    pub thumbprint: String,
    /// Algorithm used
    pub algorithm: DpopAlgorithm,
    /// Claims that were signed
    pub claims: ClaimSet,
}

impl DpopProof {
    /// The compact JWS for the `DPoP` header
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// The proof as a `DPoP` header value
    ///
    /// # Errors
    /// Returns [`DpopError::ConfigurationError`] if the token is not a valid
    /// header value.
    pub fn header_value(&self) -> Result<::http::HeaderValue> {
        crate::http::header_value(&self.token)
    }

    /// Set the `DPoP` header, replacing any earlier proof
    ///
    /// # Errors
    /// As [`header_value`](Self::header_value).
    pub fn insert_into(&self, headers: &mut ::http::HeaderMap) -> Result<()> {
        headers.insert(crate::DPOP_HEADER, self.header_value()?);
        Ok(())
    }
}

impl fmt::Display for DpopProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}
