//! The hosted [`Platform`]

use crate::context::{self, ContextTable};
use crate::fault_injection::{FaultPlan, SimAllocator};
use crate::smp::SimCpus;
use crate::timer::SimClock;
use core_types::{CpuId, ThreadId};
use hal::{CpuHal, InterruptHal, TimerDevice};
use kernel_api::{PosixDelivery, SignalDelivery, StackAllocator};
use sched_core::{ExecContext, Platform, ThreadEntry};
use std::time::Duration;

/// Interrupt flag of the calling context
#[derive(Debug, Default, Clone, Copy)]
pub struct SimInterrupts;

impl InterruptHal for SimInterrupts {
    fn enable_interrupts(&self) {
        context::set_interrupts_enabled(true);
    }

    fn disable_interrupts(&self) {
        context::set_interrupts_enabled(false);
    }

    fn interrupts_enabled(&self) -> bool {
        context::interrupts_enabled()
    }
}

/// Hosted machine: one OS thread per execution context
pub struct SimPlatform {
    cpus: SimCpus,
    interrupts: SimInterrupts,
    clock: SimClock,
    signals: PosixDelivery,
    stacks: SimAllocator,
    contexts: ContextTable,
}

impl SimPlatform {
    pub fn new(cpu_count: usize, tick: Duration, clock: SimClock, faults: &FaultPlan) -> Self {
        Self {
            cpus: SimCpus::new(cpu_count, tick),
            interrupts: SimInterrupts,
            clock,
            signals: PosixDelivery,
            stacks: SimAllocator::new(faults),
            contexts: ContextTable::default(),
        }
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn allocator(&self) -> &SimAllocator {
        &self.stacks
    }

    pub fn hints_delivered(&self) -> u64 {
        self.cpus.hints_delivered()
    }

    /// Number of contexts with an OS thread behind them
    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }

    pub(crate) fn contexts(&self) -> &ContextTable {
        &self.contexts
    }
}

impl Platform for SimPlatform {
    fn cpu(&self) -> &dyn CpuHal {
        &self.cpus
    }

    fn interrupts(&self) -> &dyn InterruptHal {
        &self.interrupts
    }

    fn timer(&self) -> &dyn TimerDevice {
        &self.clock
    }

    fn signals(&self) -> &dyn SignalDelivery {
        &self.signals
    }

    fn stacks(&self) -> &dyn StackAllocator {
        &self.stacks
    }

    fn init_context(&self, thread: ThreadId, _stack_top: usize, entry: ThreadEntry) {
        let parker = self.contexts.parker(ExecContext::Thread(thread));
        let spawned = std::thread::Builder::new()
            .name(format!("sim-{thread}"))
            .spawn(move || {
                if let Some(cpu) = parker.park() {
                    context::enter(cpu);
                    context::run_or_abort(ExecContext::Thread(thread), entry);
                }
            });
        if let Err(err) = spawned {
            panic!("cannot back {thread} with a host thread: {err}");
        }
    }

    fn switch_context(&self, cpu: CpuId, from: ExecContext, to: ExecContext) {
        let parker = self.contexts.parker(from);
        self.contexts.resume(to, cpu);
        if let Some(cpu) = parker.park() {
            context::enter(cpu);
        }
    }

    fn exit_context(&self, cpu: CpuId, from: ExecContext, to: ExecContext) {
        self.contexts.remove(from);
        self.contexts.resume(to, cpu);
    }
}
