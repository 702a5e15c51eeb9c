//! Thread records
//!
//! A thread record is owned by the scheduler's arena and is only touched
//! under the scheduler lock. Other subsystems refer to threads by
//! [`ThreadId`], whose generation makes a handle to a reaped thread
//! detectably stale instead of silently aliasing a new one.

use core_types::{CpuId, Pid, ThreadId};
use kernel_api::{Affinity, PendingSignals, StackBlock};

bitflags::bitflags! {
    /// Scheduling state bits of a thread
    pub struct ThreadFlags: u32 {
        /// Blocked until some CPU signals the thread
        const WAITING = 1 << 0;
        /// Finished; waiting to be reaped
        const TERMINATED = 1 << 1;
        /// A signal was deposited since the last delivery
        const SIGNALLED = 1 << 2;
        /// The last blocking call was interrupted by a signal
        const INTERRUPTED_SYSCALL = 1 << 3;
        /// Refuses signals from its parent other than SIGINT
        const REBEL = 1 << 4;

        /// Any of these keeps a thread off every CPU
        const NOT_SCHEDULABLE = Self::WAITING.bits | Self::TERMINATED.bits;
    }
}

/// A schedulable thread
#[derive(Debug)]
pub struct Thread {
    pub(crate) id: ThreadId,
    pub(crate) name: String,
    pub(crate) pid: Pid,
    pub(crate) pgid: Pid,
    pub(crate) parent: Option<ThreadId>,
    pub(crate) creator: Option<ThreadId>,
    pub(crate) flags: ThreadFlags,
    /// Absolute deadline of the current timed wait, 0 when none
    pub(crate) wake_time: u64,
    pub(crate) affinity: Affinity,
    pub(crate) signals: PendingSignals,
    /// A wake-up arrived while the thread was not waiting
    pub(crate) wake_pending: bool,
    pub(crate) on_cpu: Option<CpuId>,
    pub(crate) last_cpu: CpuId,
    pub(crate) exit_status: Option<i32>,
    pub(crate) stack: Option<StackBlock>,
    pub(crate) prev: usize,
    pub(crate) next: usize,
}

impl Thread {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    /// Returns true if the thread belongs to a user process
    pub fn is_process(&self) -> bool {
        !self.pid.is_kernel()
    }

    /// Returns true if the dispatcher may pick the thread
    pub fn is_schedulable(&self) -> bool {
        !self.flags.intersects(ThreadFlags::NOT_SCHEDULABLE)
    }

    /// Returns true once the thread has finished and left its CPU
    pub fn is_zombie(&self) -> bool {
        self.flags.contains(ThreadFlags::TERMINATED) && self.on_cpu.is_none()
    }

    pub fn pending_signals(&self) -> &PendingSignals {
        &self.signals
    }

    /// Point-in-time copy for diagnostics and tests
    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            id: self.id,
            name: self.name.clone(),
            pid: self.pid,
            pgid: self.pgid,
            parent: self.parent,
            flags: self.flags,
            wake_time: self.wake_time,
            on_cpu: self.on_cpu,
            last_cpu: self.last_cpu,
            exit_status: self.exit_status,
            stack_size: self.stack.as_ref().map(StackBlock::size),
        }
    }
}

/// Snapshot of a thread record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
    pub pid: Pid,
    pub pgid: Pid,
    pub parent: Option<ThreadId>,
    pub flags: ThreadFlags,
    pub wake_time: u64,
    pub on_cpu: Option<CpuId>,
    pub last_cpu: CpuId,
    pub exit_status: Option<i32>,
    pub stack_size: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_schedulable_mask() {
        assert!(ThreadFlags::NOT_SCHEDULABLE.contains(ThreadFlags::WAITING));
        assert!(ThreadFlags::NOT_SCHEDULABLE.contains(ThreadFlags::TERMINATED));
        assert!(!ThreadFlags::NOT_SCHEDULABLE.intersects(
            ThreadFlags::SIGNALLED | ThreadFlags::INTERRUPTED_SYSCALL | ThreadFlags::REBEL
        ));
    }
}
