//! Time-based nonce strategy (experimental)
//!
//! Nonces are RFC 6238 style one-time codes computed with HMAC-SHA-256 over
//! the time step, keyed by the server secret concatenated with the client
//! thumbprint. The current and the next step are both accepted so a client
//! that already received the next code is not challenged again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ring::hmac;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{NonceChallenge, NonceScope, OnValidNonce};
use crate::clock::Clock;
use crate::types::ClaimSet;
use crate::{DpopError, Result};

const DEFAULT_DIGITS: u32 = 10;
const DEFAULT_PERIOD_SECONDS: u64 = 180;

/// Derives nonces from a shared secret and the current time step
#[derive(Clone)]
pub struct TotpNonceChallenge {
    secret: Zeroizing<Vec<u8>>,
    clock: Arc<dyn Clock>,
    digits: u32,
    period: u64,
    epoch: i64,
    on_valid: Option<OnValidNonce>,
}

impl std::fmt::Debug for TotpNonceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpNonceChallenge")
            .field("digits", &self.digits)
            .field("period", &self.period)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl TotpNonceChallenge {
    /// Create a strategy with 10 digit codes and a 180 second period
    ///
    /// # Errors
    /// Returns [`DpopError::ConfigurationError`] if `secret` is empty.
    pub fn new(secret: impl Into<Vec<u8>>, clock: Arc<dyn Clock>) -> Result<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.is_empty() {
            return Err(DpopError::ConfigurationError {
                reason: "TOTP nonce secret must not be empty".to_string(),
            });
        }
        Ok(Self {
            secret,
            clock,
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD_SECONDS,
            epoch: 0,
            on_valid: None,
        })
    }

    /// Number of decimal digits per code (6 to 10)
    ///
    /// # Errors
    /// Returns [`DpopError::ConfigurationError`] outside that range.
    pub fn with_digits(mut self, digits: u32) -> Result<Self> {
        if !(6..=10).contains(&digits) {
            return Err(DpopError::ConfigurationError {
                reason: format!("TOTP digits must be between 6 and 10, got {digits}"),
            });
        }
        self.digits = digits;
        Ok(self)
    }

    /// Length of one time step
    ///
    /// # Errors
    /// Returns [`DpopError::ConfigurationError`] for periods under one second.
    pub fn with_period(mut self, period: Duration) -> Result<Self> {
        if period.as_secs() == 0 {
            return Err(DpopError::ConfigurationError {
                reason: "TOTP period must be at least one second".to_string(),
            });
        }
        self.period = period.as_secs();
        Ok(self)
    }

    /// Unix timestamp at which step zero starts
    #[must_use]
    pub fn with_epoch(mut self, epoch: i64) -> Self {
        self.epoch = epoch;
        self
    }

    /// Run `hook` whenever a presented code validates
    ///
    /// The claims carry `iat` and `exp`: the start and end of the time step
    /// the code belongs to.
    #[must_use]
    pub fn with_on_valid(mut self, hook: OnValidNonce) -> Self {
        self.on_valid = Some(hook);
        self
    }

    fn step_claims(&self, timestamp: i64) -> ClaimSet {
        let period = i64::try_from(self.period).unwrap_or(i64::MAX);
        let start = timestamp
            .saturating_sub(self.epoch)
            .div_euclid(period)
            .saturating_mul(period)
            .saturating_add(self.epoch);
        ClaimSet::new()
            .with("iat", start)
            .with("exp", start.saturating_add(period))
    }

    fn accept(&self, scope: &NonceScope, timestamp: i64) -> Result<Option<String>> {
        if let Some(hook) = &self.on_valid {
            hook.call(scope, &self.step_claims(timestamp));
        }
        Ok(None)
    }

    fn code_at(&self, thumbprint: &str, timestamp: i64) -> String {
        let period = i64::try_from(self.period).unwrap_or(i64::MAX);
        let counter = timestamp.saturating_sub(self.epoch).div_euclid(period);

        let mut key_material = Zeroizing::new(Vec::with_capacity(self.secret.len() + thumbprint.len()));
        key_material.extend_from_slice(&self.secret);
        key_material.extend_from_slice(thumbprint.as_bytes());

        let key = hmac::Key::new(hmac::HMAC_SHA256, &key_material);
        let tag = hmac::sign(&key, &counter.to_be_bytes());
        let digest = tag.as_ref();

        // Dynamic truncation (RFC 4226 section 5.3)
        let offset = usize::from(digest[digest.len() - 1] & 0x0f);
        let binary = u64::from(u32::from_be_bytes([
            digest[offset] & 0x7f,
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]));

        let code = binary % 10u64.pow(self.digits);
        format!("{code:0width$}", width = self.digits as usize)
    }

    fn matches(expected: &str, presented: &str) -> bool {
        bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
    }
}

#[async_trait]
impl NonceChallenge for TotpNonceChallenge {
    async fn current_or_new(&self, scope: &NonceScope) -> Result<String> {
        Ok(self.code_at(scope.thumbprint(), self.clock.timestamp()))
    }

    async fn new_if_invalid(&self, scope: &NonceScope, presented: &str) -> Result<Option<String>> {
        let now = self.clock.timestamp();
        let current = self.code_at(scope.thumbprint(), now);
        if Self::matches(&current, presented) {
            return self.accept(scope, now);
        }

        let next_step = now.saturating_add(i64::try_from(self.period).unwrap_or(i64::MAX));
        if Self::matches(&self.code_at(scope.thumbprint(), next_step), presented) {
            return self.accept(scope, next_step);
        }

        Ok(Some(current))
    }
}
