//! Wait and reap options

use serde::{Deserialize, Serialize};

/// How a semaphore wait or poll may block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitFlags {
    /// Return `WouldBlock` (or an empty poll) instead of sleeping
    pub nonblocking: bool,
    /// Return `Interrupted` if a signal becomes ready while sleeping
    pub interruptible: bool,
}

impl WaitFlags {
    /// Sleep until the wait completes; signals are ignored
    pub const BLOCKING: WaitFlags = WaitFlags {
        nonblocking: false,
        interruptible: false,
    };

    /// Sleep, but give up when a signal arrives
    pub const INTERRUPTIBLE: WaitFlags = WaitFlags {
        nonblocking: false,
        interruptible: true,
    };

    /// Never sleep
    pub const NONBLOCKING: WaitFlags = WaitFlags {
        nonblocking: true,
        interruptible: false,
    };

    /// Flags for waits on behalf of a file descriptor
    ///
    /// File waits are always interruptible and are non-blocking when the
    /// descriptor was opened that way.
    pub const fn for_file(nonblocking: bool) -> Self {
        Self {
            nonblocking,
            interruptible: true,
        }
    }
}

/// How many units a semaphore wait asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitAmount {
    /// Up to `n` units; the wait returns as soon as at least one is handed over
    AtMost(usize),
    /// Whatever is available right now; fails with `WouldBlock` if nothing is
    Available,
}

/// Options for reaping a child thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapFlags {
    /// Return immediately when no child has exited yet
    pub nohang: bool,
}

impl ReapFlags {
    /// Return immediately when no child has exited yet
    pub const NOHANG: ReapFlags = ReapFlags { nohang: true };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_flags_are_interruptible() {
        assert_eq!(
            WaitFlags::for_file(true),
            WaitFlags {
                nonblocking: true,
                interruptible: true
            }
        );
        assert!(!WaitFlags::for_file(false).nonblocking);
    }

    #[test]
    fn test_default_is_blocking() {
        assert_eq!(WaitFlags::default(), WaitFlags::BLOCKING);
        assert!(!ReapFlags::default().nohang);
    }

    #[test]
    fn test_flags_serialization() {
        let json = serde_json::to_string(&WaitFlags::INTERRUPTIBLE).unwrap();
        let back: WaitFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WaitFlags::INTERRUPTIBLE);
    }
}
