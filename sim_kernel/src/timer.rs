//! # Simulated Clock
//!
//! ## Philosophy
//!
//! **Determinism enables thorough testing.**
//!
//! A manual clock only moves when a test tells it to, so timeout paths can
//! be driven to the exact nanosecond. A monotonic clock follows the host's
//! wall clock for tests that exercise real waiting.
//!
//! Clones share the same time source: keep a clone before handing the
//! clock to [`SimKernel::boot_with`](crate::SimKernel::boot_with).

use hal::TimerDevice;
use kernel_api::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Source {
    Manual(Arc<AtomicU64>),
    Monotonic(std::time::Instant),
}

/// Time source of a simulated machine
///
/// # Examples
///
/// ```
/// use sim_kernel::timer::SimClock;
/// use hal::TimerDevice;
/// use kernel_api::Duration;
///
/// let clock = SimClock::manual();
/// let handle = clock.clone();
/// assert_eq!(clock.now_ns(), 0);
///
/// handle.advance(Duration::from_millis(3));
/// assert_eq!(clock.now_ns(), 3_000_000);
/// ```
#[derive(Debug, Clone)]
pub struct SimClock {
    source: Source,
}

impl SimClock {
    /// A clock stopped at 0 until advanced
    pub fn manual() -> Self {
        Self::manual_at(0)
    }

    /// A stopped clock starting at `nanos`
    pub fn manual_at(nanos: u64) -> Self {
        Self {
            source: Source::Manual(Arc::new(AtomicU64::new(nanos))),
        }
    }

    /// A clock following the host, starting at 0 now
    pub fn monotonic() -> Self {
        Self {
            source: Source::Monotonic(std::time::Instant::now()),
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self.source, Source::Manual(_))
    }

    /// Moves a manual clock forward
    ///
    /// # Panics
    ///
    /// Panics on a monotonic clock, or if the clock would overflow.
    pub fn advance(&self, by: Duration) {
        match &self.source {
            Source::Manual(nanos) => {
                let previous = nanos.fetch_add(by.as_nanos(), Ordering::SeqCst);
                assert!(
                    previous.checked_add(by.as_nanos()).is_some(),
                    "simulated clock overflow"
                );
            }
            Source::Monotonic(_) => panic!("only a manual clock can be advanced"),
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::monotonic()
    }
}

impl TimerDevice for SimClock {
    fn now_ns(&self) -> u64 {
        match &self.source {
            Source::Manual(nanos) => nanos.load(Ordering::SeqCst),
            Source::Monotonic(origin) => {
                u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
            }
        }
    }
}
