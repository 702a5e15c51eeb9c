//! Time abstractions

use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};

/// A point in time
///
/// Nanoseconds on the platform's monotonic clock. In the hosted
/// simulation, time can be virtual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instant {
    /// Nanoseconds since boot
    nanos: u64,
}

impl Instant {
    /// Creates an instant from nanoseconds
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Returns nanoseconds since boot
    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Returns the duration since another instant
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }

    /// Returns true once `now` has reached this instant
    pub fn has_passed(&self, now: Instant) -> bool {
        now >= *self
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, duration: Duration) -> Self::Output {
        Instant::from_nanos(self.nanos.saturating_add(duration.as_nanos()))
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, duration: Duration) -> Self::Output {
        Instant::from_nanos(self.nanos.saturating_sub(duration.as_nanos()))
    }
}

/// A duration of time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Duration {
    /// Nanoseconds
    nanos: u64,
}

impl Duration {
    /// The empty duration
    pub const ZERO: Duration = Duration::from_nanos(0);

    /// Creates a duration from nanoseconds
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Creates a duration from microseconds
    pub const fn from_micros(micros: u64) -> Self {
        Self {
            nanos: micros * 1_000,
        }
    }

    /// Creates a duration from milliseconds
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis * 1_000_000,
        }
    }

    /// Creates a duration from seconds
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            nanos: secs * 1_000_000_000,
        }
    }

    /// Returns the duration in nanoseconds
    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Returns the duration in milliseconds
    pub const fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    /// Returns true for the empty duration
    pub const fn is_zero(&self) -> bool {
        self.nanos == 0
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, other: Duration) -> Self::Output {
        Duration::from_nanos(self.nanos.saturating_add(other.nanos))
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, other: Duration) -> Self::Output {
        Duration::from_nanos(self.nanos.saturating_sub(other.nanos))
    }
}

/// Converts a relative wait timeout into an absolute deadline
///
/// `None` and a zero timeout both mean "wait forever" and produce no
/// deadline.
pub fn deadline_after(now: Instant, timeout: Option<Duration>) -> Option<Instant> {
    match timeout {
        Some(timeout) if !timeout.is_zero() => Some(now + timeout),
        _ => None,
    }
}
