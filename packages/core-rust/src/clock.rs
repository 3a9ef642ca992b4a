//! Wall-clock abstraction and absolute expiry dates.
//!
//! Every reply-expecting operation carries an absolute [`ExpiryDate`]
//! (milliseconds since Unix epoch) derived from a time-to-live at the moment
//! the operation is issued. Expiry is evaluated against a [`ClockSource`] so
//! tests can drive time explicitly with [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Abstraction over the system clock for dependency injection.
///
/// The default implementation ([`SystemClock`]) delegates to `std::time::SystemTime`.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now(&self) -> u64;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> u64 {
        // A clock set before the epoch reads as 0, which expires everything.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }
}

/// Clock that only moves when told to. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `start_millis`.
    #[must_use]
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    /// Moves the clock forward by `delta_millis`.
    pub fn advance(&self, delta_millis: u64) {
        self.millis.fetch_add(delta_millis, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute value.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Absolute point in time (ms since Unix epoch) after which a message,
/// pending reply, or registration is no longer valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpiryDate(u64);

impl ExpiryDate {
    /// An expiry date that is never reached.
    pub const NEVER: Self = Self(u64::MAX);

    /// Wraps an absolute millisecond timestamp.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Computes `clock.now() + ttl_ms`, saturating at [`ExpiryDate::NEVER`].
    #[must_use]
    pub fn from_ttl(ttl_ms: u64, clock: &dyn ClockSource) -> Self {
        Self(clock.now().saturating_add(ttl_ms))
    }

    /// Returns the absolute timestamp in milliseconds.
    #[must_use]
    pub const fn millis(self) -> u64 {
        self.0
    }

    /// An entry is expired once its expiry is less than or equal to `now`.
    #[must_use]
    pub const fn is_expired(self, now: u64) -> bool {
        self.0 <= now
    }

    /// Milliseconds left until expiry, zero once expired.
    #[must_use]
    pub const fn remaining_ms(self, now: u64) -> u64 {
        self.0.saturating_sub(now)
    }
}
