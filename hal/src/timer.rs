//! # Timer Device
//!
//! Hardware abstraction for monotonic time measurement.
//!
//! ## Philosophy
//!
//! **Time is a service, not a global variable.**
//!
//! This trait provides a monotonic nanosecond clock. It does NOT:
//! - Provide wall-clock time (no UTC, no timezones)
//! - Block or sleep (polling only)
//! - Deliver timer interrupts (the platform calls the kernel's tick hook)
//!
//! Deadlines for timed waits are absolute values of this clock.

/// Monotonic clock
///
/// # Implementation Notes
///
/// - Must be monotonic (never return a smaller value)
/// - Must not block
/// - Must be readable from any CPU with interrupts masked
///
/// # Examples
///
/// ```
/// use hal::TimerDevice;
///
/// fn elapsed<T: TimerDevice>(timer: &T, start: u64) -> u64 {
///     timer.now_ns().saturating_sub(start)
/// }
/// ```
pub trait TimerDevice: Send + Sync {
    /// Returns nanoseconds since boot
    fn now_ns(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Simple test implementation for demonstration
    struct TestTimer {
        nanos: AtomicU64,
    }

    impl TestTimer {
        fn new() -> Self {
            Self {
                nanos: AtomicU64::new(0),
            }
        }

        fn advance(&self, delta: u64) {
            self.nanos.fetch_add(delta, Ordering::SeqCst);
        }
    }

    impl TimerDevice for TestTimer {
        fn now_ns(&self) -> u64 {
            self.nanos.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_timer_monotonic() {
        let timer = TestTimer::new();
        let t1 = timer.now_ns();
        timer.advance(100);
        let t2 = timer.now_ns();
        timer.advance(50);
        let t3 = timer.now_ns();

        assert!(t2 >= t1);
        assert!(t3 >= t2);
        assert_eq!(t2 - t1, 100);
        assert_eq!(t3 - t2, 50);
    }

    #[test]
    fn test_timer_cumulative() {
        let timer = TestTimer::new();
        assert_eq!(timer.now_ns(), 0);

        timer.advance(100);
        assert_eq!(timer.now_ns(), 100);

        timer.advance(200);
        assert_eq!(timer.now_ns(), 300);
    }
}
