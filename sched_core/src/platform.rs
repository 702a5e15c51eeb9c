//! Platform seam
//!
//! Everything the core needs from the machine: CPU control, interrupt
//! masking, a clock, signal and stack collaborators, and the three context
//! primitives. A bare-metal port implements them with register save areas
//! and inter-processor interrupts; the hosted simulation implements them
//! with OS threads.

use core_types::{CpuId, ThreadId};
use hal::{CpuHal, InterruptHal, TimerDevice};
use kernel_api::{SignalDelivery, StackAllocator};

/// Code run by a new thread's context on its first dispatch
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// An execution context the dispatcher can switch to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecContext {
    /// A scheduled thread
    Thread(ThreadId),
    /// The idle loop of a CPU
    Idle(CpuId),
}

/// Machine services used by the core
pub trait Platform: Send + Sync {
    fn cpu(&self) -> &dyn CpuHal;

    fn interrupts(&self) -> &dyn InterruptHal;

    fn timer(&self) -> &dyn TimerDevice;

    fn signals(&self) -> &dyn SignalDelivery;

    fn stacks(&self) -> &dyn StackAllocator;

    /// Prepares the saved state of `thread` so that switching to it runs
    /// `entry` on the stack whose top is `stack_top`
    fn init_context(&self, thread: ThreadId, stack_top: usize, entry: ThreadEntry);

    /// Saves `from` and resumes `to` on `cpu`
    ///
    /// Returns when some CPU switches back to `from`. Called with no lock
    /// held and interrupts enabled.
    fn switch_context(&self, cpu: CpuId, from: ExecContext, to: ExecContext);

    /// Resumes `to` on `cpu` and abandons `from` for good
    ///
    /// Used by exiting threads. Hardware ports never return from it; a
    /// hosted port returns so the backing OS thread can unwind.
    fn exit_context(&self, cpu: CpuId, from: ExecContext, to: ExecContext);
}
