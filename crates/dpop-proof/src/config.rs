//! Serde-loadable configuration
//!
//! Hosts load [`DpopConfig`] from whatever format they use; every field has a
//! default, so a partial document is enough.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::nonce::InvalidNoncePolicy;
use crate::types::DpopAlgorithm;
use crate::{
    DEFAULT_ALLOWED_TIME_DRIFT_SECONDS, DEFAULT_MAX_PROOF_AGE_SECONDS, DEFAULT_NONCE_TTL_SECONDS,
    DpopError, Result,
};

/// Complete DPoP configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpopConfig {
    /// Proof verification settings
    pub verifier: VerifierConfig,
    /// Nonce challenge settings
    pub nonce: NonceConfig,
    /// Replay detection settings
    pub replay: ReplayConfig,
}

impl DpopConfig {
    /// Check the settings for consistency
    ///
    /// # Errors
    /// Returns [`DpopError::ConfigurationError`] if the algorithm list is empty,
    /// the max proof age or nonce TTL is zero, or replay records would expire
    /// before a proof stops being acceptable.
    pub fn validate(&self) -> Result<()> {
        if self.verifier.allowed_algorithms.is_empty() {
            return Err(config_error("at least one algorithm must be allowed"));
        }
        if self.verifier.max_proof_age_seconds == 0 {
            return Err(config_error("max proof age must be positive"));
        }
        if self.nonce.ttl_seconds == 0 {
            return Err(config_error("nonce TTL must be positive"));
        }

        let minimum = self.verifier.proof_acceptance_window();
        if self.replay.effective_ttl(&self.verifier) < minimum {
            return Err(config_error(format!(
                "replay TTL must be at least max proof age plus drift ({}s)",
                minimum.as_secs()
            )));
        }
        Ok(())
    }
}

fn config_error(reason: impl Into<String>) -> DpopError {
    DpopError::ConfigurationError {
        reason: reason.into(),
    }
}

/// Proof verification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Tolerated clock difference between client and server, in seconds
    pub allowed_time_drift_seconds: u64,
    /// Oldest acceptable `iat`, in seconds before now (drift added on top)
    pub max_proof_age_seconds: u64,
    /// Algorithms a proof may be signed with
    pub allowed_algorithms: Vec<DpopAlgorithm>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            allowed_time_drift_seconds: DEFAULT_ALLOWED_TIME_DRIFT_SECONDS,
            max_proof_age_seconds: DEFAULT_MAX_PROOF_AGE_SECONDS,
            allowed_algorithms: DpopAlgorithm::ALL.to_vec(),
        }
    }
}

impl VerifierConfig {
    /// Allowed drift as a duration
    #[must_use]
    pub fn allowed_time_drift(&self) -> Duration {
        Duration::from_secs(self.allowed_time_drift_seconds)
    }

    /// Max proof age as a duration
    #[must_use]
    pub fn max_proof_age(&self) -> Duration {
        Duration::from_secs(self.max_proof_age_seconds)
    }

    /// How long after issuance a proof can still be accepted (max age + drift)
    #[must_use]
    pub fn proof_acceptance_window(&self) -> Duration {
        self.max_proof_age() + self.allowed_time_drift()
    }
}

/// Nonce challenge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// Whether proofs must carry a server-issued nonce
    pub enabled: bool,
    /// Lifetime of an issued nonce, in seconds
    pub ttl_seconds: u64,
    /// Answer to a wrong nonce (stateful strategy only)
    pub invalid_nonce_policy: InvalidNoncePolicy,
    /// Cache key prefix for stored nonces
    pub storage_prefix: String,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: DEFAULT_NONCE_TTL_SECONDS,
            invalid_nonce_policy: InvalidNoncePolicy::default(),
            storage_prefix: "dpop-nonce".to_string(),
        }
    }
}

impl NonceConfig {
    /// Nonce lifetime as a duration
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Replay detection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Whether consumed proofs are tracked
    pub enabled: bool,
    /// Retention of consumed proofs in seconds; `None` means max age + drift
    pub ttl_seconds: Option<u64>,
    /// Cache key prefix for replay records
    pub storage_prefix: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: None,
            storage_prefix: "dpop-jti:".to_string(),
        }
    }
}

impl ReplayConfig {
    /// Retention to use with the given verifier settings
    #[must_use]
    pub fn effective_ttl(&self, verifier: &VerifierConfig) -> Duration {
        self.ttl_seconds
            .map_or_else(|| verifier.proof_acceptance_window(), Duration::from_secs)
    }
}
