//! # DPoP Proof - RFC 9449 Implementation
//!
//! DPoP (Demonstrating Proof-of-Possession) lets an HTTP client prove, on every
//! request, that it holds the private half of a specific asymmetric key. Access
//! tokens bound to that key are useless to a thief who only captured the token.
//!
//! ## Core Features
//!
//! - **Proof creation** - `DpopProofFactory` builds signed `dpop+jwt` proofs
//! - **Proof verification** - `DpopProofVerifier` runs the fixed-order validation
//!   state machine (structure, signature, binding, timing, nonce, replay)
//! - **Nonce challenges** - stateful (cache), self-signed and time-based strategies
//! - **Replay detection** - atomic `(thumbprint, jti)` consumption in a shared cache
//!
//! ## Architecture
//!
//! - `errors` - DPoP error taxonomy
//! - `types` - Algorithms, key pairs, claim sets and proof values
//! - `engine` - Signing engine abstraction and the jsonwebtoken-backed engine
//! - `keys` - Key storage and key selection
//! - `clock` - Time source abstraction
//! - `cache` - TTL key-value cache abstraction and in-memory backend
//! - `nonce` - Nonce challenge strategies and the client-side nonce store
//! - `replay` - Replay attack detection
//! - `proof` - Proof factory (client side)
//! - `verifier` - Proof verifier (server side)
//! - `config` - Serde-loadable configuration
//! - `http` - `DPoP` / `DPoP-Nonce` / `WWW-Authenticate` header helpers
//! - `redis_storage` - Redis cache backend (feature-gated: `redis-storage`)
//!
//! ## Feature Flags
//!
//! - `jwt-validation` (default) - `JwtSigningEngine` built on jsonwebtoken
//! - `redis-storage` - Redis cache backend for nonces and replay records

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod http;
pub mod keys;
pub mod nonce;
pub mod proof;
pub mod replay;
pub mod types;
pub mod uri;
pub mod verifier;

#[cfg(feature = "jwt-validation")]
pub mod helpers;

#[cfg(feature = "redis-storage")]
pub mod redis_storage;

pub use cache::{Cache, CacheError, MemoryCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DpopConfig, NonceConfig, ReplayConfig, VerifierConfig};
pub use engine::SigningEngine;
pub use errors::*;
pub use keys::{DpopKeySelector, KeyStore, MemoryKeyStore};
pub use nonce::{
    CacheNonceChallenge, CacheNonceStore, InvalidNoncePolicy, NonceChallenge, NonceScope,
    NonceStore, OnValidNonce, SignedNonceChallenge, TotpNonceChallenge,
};
pub use proof::DpopProofFactory;
pub use replay::{CacheReplayAttackDetector, ReplayAttackDetector};
pub use types::*;
pub use uri::create_htu;
pub use verifier::{DpopProofVerifier, DpopProofVerifierBuilder};

#[cfg(feature = "jwt-validation")]
pub use engine::JwtSigningEngine;

#[cfg(feature = "redis-storage")]
pub use redis_storage::RedisCache;

/// DPoP result type
pub type Result<T> = std::result::Result<T, DpopError>;

/// DPoP JWT header type as defined in RFC 9449
pub const DPOP_JWT_TYPE: &str = "dpop+jwt";

/// `typ` header of self-signed nonce tokens
pub const DPOP_NONCE_TYPE: &str = "dpop+nonce";

/// Request header carrying the proof
pub const DPOP_HEADER: &str = "DPoP";

/// Response header carrying a server-issued nonce
pub const DPOP_NONCE_HEADER: &str = "DPoP-Nonce";

/// Shortest accepted `jti` claim, in bytes
pub const JTI_MIN_LENGTH: usize = 16;

/// Longest accepted `jti` claim, in bytes
pub const JTI_MAX_LENGTH: usize = 4096;

/// Default allowed clock drift between client and server (5 seconds)
pub const DEFAULT_ALLOWED_TIME_DRIFT_SECONDS: u64 = 5;

/// Default maximum proof age (60 seconds)
pub const DEFAULT_MAX_PROOF_AGE_SECONDS: u64 = 60;

/// Default lifetime of a server-issued nonce (15 minutes)
pub const DEFAULT_NONCE_TTL_SECONDS: u64 = 900;
