//! # Scheduler and Semaphore Core
//!
//! This crate is the concurrency substrate of the Kestrel kernel: the thread
//! scheduler, which owns thread lifecycle and decides what runs on which
//! CPU, and the counting semaphore, which is the only blocking and waking
//! mechanism used by every other subsystem.
//!
//! ## Layers
//!
//! - [`sync`]: interrupt-safe spinlock whose guards encode "interrupts are
//!   off on this CPU" and enforce release order
//! - [`scheduler`]: the thread arena and ring, the dispatch loop,
//!   `wait_thread`/`signal_thread`, reaping helpers, and the audit trail
//! - [`timer`]: timed events that wake a thread at a deadline
//! - [`smp`]: the idle-CPU bitmap and wake hint policy
//! - [`semaphore`]: wait, signal, terminate and poll with FIFO hand-off
//! - [`kernel`]: the [`Kernel`] facade tying them to a [`Platform`]
//!
//! ## Lock order
//!
//! A semaphore lock may be held while the scheduler lock is taken, never
//! the reverse. The scheduler lock is taken under a semaphore lock only
//! through [`sync::IrqSpinLock::lock_nested`], which borrows the outer
//! guard so the two are released in reverse order.

pub mod config;
pub mod kernel;
pub mod platform;
pub mod scheduler;
pub mod semaphore;
pub mod smp;
pub mod sync;
pub mod thread;
pub mod timer;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, KernelConfig};
pub use kernel::Kernel;
pub use platform::{ExecContext, Platform, ThreadEntry};
pub use scheduler::{ChildScan, SchedEvent, SchedulerState, WakeOutcome, AUDIT_CAPACITY, BOOT_THREAD};
pub use semaphore::{poll, Semaphore};
pub use smp::{HintPolicy, IdleMask};
pub use sync::{IrqGuard, IrqSpinLock, NestedGuard};
pub use thread::{Thread, ThreadFlags, ThreadInfo};
pub use timer::{TimedEvent, TimerId, TimerQueue};
