//! # Kernel API
//!
//! This crate defines the contracts between the concurrency core and the
//! rest of the kernel.
//!
//! ## Philosophy
//!
//! The core provides **mechanisms**, not policies:
//! - Blocking and waking (semaphores), not file or socket semantics
//! - Thread lifecycle (create, join, reap), not process images
//! - Signal lookup and hand-off, not signal dispositions
//!
//! ## What lives here
//!
//! 1. **Errors**: the three recoverable wait outcomes plus lifecycle errors,
//!    each with its errno so callers can propagate them verbatim
//! 2. **Time**: explicit `Instant`/`Duration`, never ambient
//! 3. **Options**: named wait and reap options instead of raw bit constants
//! 4. **Collaborators**: signal delivery and stack allocation traits

pub mod error;
pub mod signal;
pub mod stack;
pub mod thread;
pub mod time;
pub mod wait;

pub use error::KernelError;
pub use signal::{
    PendingSignals, PosixDelivery, SigInfo, SignalDelivery, SignalSet, SIGALRM, SIGCHLD, SIGHUP,
    SIGINT, SIGKILL, SIGSTOP, SIGTERM, SIGUSR1, SIGUSR2, SIG_COUNT,
};
pub use stack::{StackAllocator, StackBlock};
pub use thread::{Affinity, ThreadKind, ThreadParams};
pub use time::{deadline_after, Duration, Instant};
pub use wait::{ReapFlags, WaitAmount, WaitFlags};

#[cfg(test)]
mod tests {
    use crate::{PendingSignals, SignalSet, SIGINT, SIGKILL, SIGTERM, SIGUSR1};

    #[test]
    fn test_signal_numbers_at_crate_root() {
        let mut set = SignalSet::EMPTY;
        set.insert(SIGINT);
        set.insert(SIGUSR1);
        assert!(set.contains(crate::signal::SIGINT));
        assert!(!set.contains(SIGTERM));

        let pending = PendingSignals::new();
        assert!(pending.is_empty());
        assert_eq!(SIGKILL, 9);
    }
}
