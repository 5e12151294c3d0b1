//! DPoP error types
//!
//! Every failure the factory or verifier can report. Validation failures are
//! split into three classes that callers must treat differently:
//!
//! - malformed proofs are terminal and never retried
//! - nonce challenges carry a fresh nonce and are retryable once
//! - replay detection is terminal and a security event
//!
//! Collaborator failures (cache backends) are wrapped unmodified in
//! [`DpopError::Cache`] and are never reported as validation failures.

use std::fmt;

use thiserror::Error;

use crate::cache::CacheError;

/// Errors produced by DPoP proof creation and verification
#[derive(Debug, Error)]
pub enum DpopError {
    /// The request carried no `DPoP` header
    #[error("request does not contain a DPoP proof")]
    MissingProof,

    /// The request carried more than one `DPoP` header
    #[error("request must contain exactly one DPoP header, found {count}")]
    MultipleProofs {
        /// Number of `DPoP` headers found
        count: usize,
    },

    /// The proof is not a well-formed DPoP JWT or a claim has the wrong shape
    #[error("invalid DPoP proof structure: {reason}")]
    InvalidProofStructure {
        /// What was wrong
        reason: String,
    },

    /// The proof signature did not verify against the embedded key
    #[error("DPoP proof signature is invalid: {reason}")]
    ProofSignatureInvalid {
        /// What was wrong
        reason: String,
    },

    /// `htm` or `htu` does not match the request
    #[error("DPoP HTTP binding failed: {reason}")]
    HttpBindingFailed {
        /// What was wrong
        reason: String,
    },

    /// The proof is too old or its `exp` has passed
    #[error("DPoP proof has expired: {reason}")]
    ProofExpired {
        /// What was wrong
        reason: String,
    },

    /// The proof was issued in the future or its `nbf` lies ahead
    #[error("DPoP proof is not yet valid: {reason}")]
    ProofNotYetValid {
        /// What was wrong
        reason: String,
    },

    /// `ath` or key thumbprint does not match the access token binding
    #[error("DPoP access token binding failed: {reason}")]
    AccessTokenBindingFailed {
        /// What was wrong
        reason: String,
    },

    /// Nonce challenges are enabled and the proof carries no `nonce` claim
    #[error("DPoP proof is missing the required nonce")]
    MissingNonce {
        /// Nonce the client must use in its next proof
        nonce: String,
    },

    /// The `nonce` claim is not a string or is not currently valid
    #[error("DPoP proof nonce is invalid")]
    InvalidNonce {
        /// Nonce the client must use in its next proof
        nonce: String,
    },

    /// The `(thumbprint, jti)` pair was already consumed
    #[error("DPoP proof was already presented (jti: {jti})")]
    ReplayAttackDetected {
        /// The reused proof identifier
        jti: String,
    },

    /// No signing key fits the requested algorithms or thumbprint
    #[error("no suitable DPoP signing key: {reason}")]
    NoSuitableKey {
        /// Why no key was selected
        reason: NoSuitableKeyReason,
    },

    /// Signing, key conversion or encoding failed
    #[error("cryptographic error: {reason}")]
    CryptographicError {
        /// What was wrong
        reason: String,
    },

    /// Key generation or key storage failed
    #[error("key management error: {reason}")]
    KeyManagementError {
        /// What was wrong
        reason: String,
    },

    /// The component was assembled with inconsistent settings
    #[error("configuration error: {reason}")]
    ConfigurationError {
        /// What was wrong
        reason: String,
    },

    /// A cache backend failed
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Why [`DpopError::NoSuitableKey`] was returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoSuitableKeyReason {
    /// None of the requested algorithms has a signing key
    NoAlgorithmOverlap,
    /// Keys exist for the requested algorithms but none has the required thumbprint
    ThumbprintNotFound,
}

impl fmt::Display for NoSuitableKeyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAlgorithmOverlap => {
                write!(f, "no signing key for any of the requested algorithms")
            }
            Self::ThumbprintNotFound => {
                write!(f, "no signing key with the thumbprint the access token is bound to")
            }
        }
    }
}

/// Severity used by hosts to route errors into logs and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Expected protocol traffic (nonce challenges)
    Low,
    /// Client error (malformed or mismatched proofs)
    Medium,
    /// Infrastructure or configuration failure
    High,
    /// Security event (replayed proofs)
    Critical,
}

impl DpopError {
    /// Whether the proof itself is invalid and must not be retried as-is
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MissingProof
                | Self::MultipleProofs { .. }
                | Self::InvalidProofStructure { .. }
                | Self::ProofSignatureInvalid { .. }
                | Self::HttpBindingFailed { .. }
                | Self::ProofExpired { .. }
                | Self::ProofNotYetValid { .. }
                | Self::AccessTokenBindingFailed { .. }
        )
    }

    /// Whether this is a nonce challenge (`MissingNonce` / `InvalidNonce`)
    #[must_use]
    pub fn is_nonce_challenge(&self) -> bool {
        matches!(self, Self::MissingNonce { .. } | Self::InvalidNonce { .. })
    }

    /// The nonce the client must echo, if this is a nonce challenge
    #[must_use]
    pub fn challenge_nonce(&self) -> Option<&str> {
        match self {
            Self::MissingNonce { nonce } | Self::InvalidNonce { nonce } => Some(nonce),
            _ => None,
        }
    }

    /// Whether resending with a new proof can succeed
    ///
    /// Only nonce challenges qualify; the caller resends once using
    /// [`challenge_nonce`](Self::challenge_nonce).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_nonce_challenge()
    }

    /// Severity for logging and alerting
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::MissingNonce { .. } | Self::InvalidNonce { .. } => ErrorSeverity::Low,
            Self::ReplayAttackDetected { .. } => ErrorSeverity::Critical,
            Self::NoSuitableKey { .. }
            | Self::CryptographicError { .. }
            | Self::KeyManagementError { .. }
            | Self::ConfigurationError { .. }
            | Self::Cache(_) => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }

    /// RFC 9449 `WWW-Authenticate` error code, for verifier-side errors
    #[must_use]
    pub fn error_code(&self) -> Option<&'static str> {
        if self.is_nonce_challenge() {
            Some("use_dpop_nonce")
        } else if self.is_malformed() || matches!(self, Self::ReplayAttackDetected { .. }) {
            Some("invalid_dpop_proof")
        } else {
            None
        }
    }

    pub(crate) fn structure(reason: impl Into<String>) -> Self {
        Self::InvalidProofStructure {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let malformed = DpopError::structure("bad");
        assert!(malformed.is_malformed());
        assert!(!malformed.is_retryable());
        assert_eq!(malformed.error_code(), Some("invalid_dpop_proof"));

        let challenge = DpopError::MissingNonce {
            nonce: "n-1".to_string(),
        };
        assert!(challenge.is_nonce_challenge());
        assert!(challenge.is_retryable());
        assert_eq!(challenge.challenge_nonce(), Some("n-1"));
        assert_eq!(challenge.error_code(), Some("use_dpop_nonce"));
        assert_eq!(challenge.severity(), ErrorSeverity::Low);

        let replay = DpopError::ReplayAttackDetected {
            jti: "abc".to_string(),
        };
        assert!(!replay.is_malformed());
        assert_eq!(replay.severity(), ErrorSeverity::Critical);

        let cache = DpopError::from(CacheError::Backend {
            reason: "down".to_string(),
        });
        assert!(!cache.is_malformed());
        assert_eq!(cache.error_code(), None);
        assert_eq!(cache.severity(), ErrorSeverity::High);
    }

    #[test]
    fn test_nonce_not_in_display() {
        let err = DpopError::InvalidNonce {
            nonce: "secret-nonce-value".to_string(),
        };
        assert!(!err.to_string().contains("secret-nonce-value"));
    }

    #[test]
    fn test_no_suitable_key_messages_differ() {
        let overlap = DpopError::NoSuitableKey {
            reason: NoSuitableKeyReason::NoAlgorithmOverlap,
        };
        let thumbprint = DpopError::NoSuitableKey {
            reason: NoSuitableKeyReason::ThumbprintNotFound,
        };
        assert_ne!(overlap.to_string(), thumbprint.to_string());
        assert!(thumbprint.to_string().contains("thumbprint"));
    }
}
