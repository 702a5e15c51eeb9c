//! Signal hand-off contract
//!
//! The core never interprets signals. It stores each thread's pending set,
//! asks the delivery collaborator whether one of them is ready (to abort an
//! interruptible wait), and hands new signals to the collaborator to
//! deposit.

use core_types::Pid;
use serde::{Deserialize, Serialize};

pub const SIGHUP: u8 = 1;
pub const SIGINT: u8 = 2;
pub const SIGKILL: u8 = 9;
pub const SIGUSR1: u8 = 10;
pub const SIGUSR2: u8 = 12;
pub const SIGALRM: u8 = 14;
pub const SIGTERM: u8 = 15;
pub const SIGCHLD: u8 = 17;
pub const SIGSTOP: u8 = 19;

/// Number of signal numbers a set can hold
pub const SIG_COUNT: u8 = 64;

/// Information accompanying a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigInfo {
    /// Signal number
    pub signo: u8,
    /// Sending process (`Pid::KERNEL` when raised by the kernel)
    pub sender: Pid,
    /// Signal-specific code
    pub code: i32,
}

impl SigInfo {
    /// Creates signal info raised by the kernel
    pub fn new(signo: u8) -> Self {
        Self {
            signo,
            sender: Pid::KERNEL,
            code: 0,
        }
    }

    /// Sets the sending process
    pub fn from_pid(mut self, sender: Pid) -> Self {
        self.sender = sender;
        self
    }
}

/// A set of signal numbers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSet(u64);

impl SignalSet {
    /// The empty set
    pub const EMPTY: SignalSet = SignalSet(0);

    fn bit(signo: u8) -> u64 {
        if signo < SIG_COUNT {
            1u64 << signo
        } else {
            0
        }
    }

    /// Adds a signal
    pub fn insert(&mut self, signo: u8) {
        self.0 |= Self::bit(signo);
    }

    /// Removes a signal
    pub fn remove(&mut self, signo: u8) {
        self.0 &= !Self::bit(signo);
    }

    /// Returns true if the signal is in the set
    pub fn contains(&self, signo: u8) -> bool {
        self.0 & Self::bit(signo) != 0
    }

    /// Returns true if the set is empty
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Signals pending on one thread, plus its blocked mask
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSignals {
    queue: Vec<SigInfo>,
    blocked: SignalSet,
}

impl PendingSignals {
    /// Creates an empty pending set
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a signal; a signal number already pending is not queued twice
    pub fn push(&mut self, info: SigInfo) {
        if !self.queue.iter().any(|queued| queued.signo == info.signo) {
            self.queue.push(info);
        }
    }

    /// Returns the pending signals in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &SigInfo> {
        self.queue.iter()
    }

    /// Returns true if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the blocked mask
    pub fn blocked(&self) -> SignalSet {
        self.blocked
    }

    /// Replaces the blocked mask
    pub fn set_blocked(&mut self, blocked: SignalSet) {
        self.blocked = blocked;
    }

    /// Removes and returns the first signal accepted by `ready`
    pub fn take_first(&mut self, ready: impl Fn(&SigInfo) -> bool) -> Option<SigInfo> {
        let position = self.queue.iter().position(|info| ready(info))?;
        Some(self.queue.remove(position))
    }
}

/// Signal-delivery collaborator
///
/// Decides which pending signals are ready and how a new one is queued.
pub trait SignalDelivery: Send + Sync {
    /// Returns true if `info` may be delivered while `blocked` is in effect
    fn is_deliverable(&self, info: &SigInfo, blocked: SignalSet) -> bool;

    /// Returns true if a pending signal is ready to be delivered
    fn has_ready_signal(&self, signals: &PendingSignals) -> bool {
        let blocked = signals.blocked();
        signals
            .iter()
            .any(|info| self.is_deliverable(info, blocked))
    }

    /// Deposits a signal into a thread's pending set
    fn deposit_signal(&self, signals: &mut PendingSignals, info: SigInfo) {
        signals.push(info);
    }
}

/// POSIX readiness: a pending signal is ready unless blocked, and SIGKILL and
/// SIGSTOP cannot be blocked
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixDelivery;

impl SignalDelivery for PosixDelivery {
    fn is_deliverable(&self, info: &SigInfo, blocked: SignalSet) -> bool {
        matches!(info.signo, SIGKILL | SIGSTOP) || !blocked.contains(info.signo)
    }
}
