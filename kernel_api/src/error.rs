//! Kernel error types

use thiserror::Error;

/// Errors returned by the concurrency core
///
/// `WouldBlock`, `TimedOut` and `Interrupted` are the recoverable outcomes of
/// a wait. Every layer built on the semaphore engine passes them up
/// unchanged; the core never retries on a caller's behalf.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    /// A non-blocking wait found nothing available
    #[error("Operation would block")]
    WouldBlock,

    /// The deadline passed before resources became available
    #[error("Operation timed out")]
    TimedOut,

    /// A signal arrived during an interruptible wait
    #[error("Interrupted by signal")]
    Interrupted,

    /// The allocator could not provide memory
    #[error("Out of memory: {requested} bytes requested")]
    OutOfMemory { requested: usize },

    /// No child matches the reap request
    #[error("No matching child")]
    NoChild,

    /// No process matches the signal target
    #[error("No such process")]
    NoSuchProcess,

    /// The thread handle is stale or never existed
    #[error("No such thread")]
    NoSuchThread,

    /// The caller may not perform the operation on the target
    #[error("Operation not permitted")]
    PermissionDenied,
}

impl KernelError {
    /// Returns the POSIX errno for this error
    pub const fn errno(&self) -> i32 {
        match self {
            KernelError::PermissionDenied => 1,
            KernelError::NoSuchProcess | KernelError::NoSuchThread => 3,
            KernelError::Interrupted => 4,
            KernelError::NoChild => 10,
            KernelError::WouldBlock => 11,
            KernelError::OutOfMemory { .. } => 12,
            KernelError::TimedOut => 110,
        }
    }

    /// Returns true for the outcomes a wait may legitimately end with
    pub const fn is_wait_outcome(&self) -> bool {
        matches!(
            self,
            KernelError::WouldBlock | KernelError::TimedOut | KernelError::Interrupted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(KernelError::WouldBlock.errno(), 11);
        assert_eq!(KernelError::TimedOut.errno(), 110);
        assert_eq!(KernelError::Interrupted.errno(), 4);
        assert_eq!(KernelError::NoChild.errno(), 10);
        assert_eq!(KernelError::OutOfMemory { requested: 16 }.errno(), 12);
    }

    #[test]
    fn test_wait_outcomes() {
        assert!(KernelError::WouldBlock.is_wait_outcome());
        assert!(KernelError::Interrupted.is_wait_outcome());
        assert!(!KernelError::NoSuchThread.is_wait_outcome());
    }

    #[test]
    fn test_display() {
        let err = KernelError::OutOfMemory { requested: 4096 };
        assert_eq!(err.to_string(), "Out of memory: 4096 bytes requested");
    }
}
