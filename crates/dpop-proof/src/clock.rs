//! Time source abstraction
//!
//! Every timing decision in proof creation and verification reads the clock
//! through [`Clock`], so hosts and tests can pin time deterministically.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, TimeZone, Utc};

/// Supplies the current time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Current Unix timestamp in seconds
    fn timestamp(&self) -> i64 {
        self.now().timestamp()
    }

    /// Current instant as a [`SystemTime`], for comparing key lifetimes
    fn system_time(&self) -> SystemTime {
        self.now().into()
    }
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    seconds: AtomicI64,
}

impl ManualClock {
    /// Create a clock fixed at the given Unix timestamp
    #[must_use]
    pub fn new(timestamp: i64) -> Self {
        Self {
            seconds: AtomicI64::new(timestamp),
        }
    }

    /// Create a clock fixed at the current wall-clock second
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(Utc::now().timestamp())
    }

    /// Jump to the given Unix timestamp
    pub fn set(&self, timestamp: i64) {
        self.seconds.store(timestamp, Ordering::SeqCst);
    }

    /// Move forward (or backward, for negative values) by `seconds`
    pub fn advance(&self, seconds: i64) {
        self.seconds.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.seconds.load(Ordering::SeqCst), 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    fn timestamp(&self) -> i64 {
        self.seconds.load(Ordering::SeqCst)
    }
}
