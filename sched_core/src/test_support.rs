//! Single-threaded platform for unit tests
//!
//! Context switches are recorded and return at once, so tests can only
//! exercise paths that do not need another thread to make progress.
//! Blocking scenarios live in the hosted simulation's integration tests.

use crate::platform::{ExecContext, Platform, ThreadEntry};
use core_types::{CpuId, ThreadId};
use hal::{CpuHal, InterruptHal, TimerDevice};
use kernel_api::{
    Duration, KernelError, PosixDelivery, SignalDelivery, StackAllocator, StackBlock,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Interrupt flag without a CPU behind it
pub struct FlagInterrupts {
    enabled: AtomicBool,
}

impl FlagInterrupts {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }
}

impl InterruptHal for FlagInterrupts {
    fn enable_interrupts(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn disable_interrupts(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn interrupts_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

struct TestCpu {
    count: usize,
    hints: Mutex<Vec<CpuId>>,
}

impl CpuHal for TestCpu {
    fn current_cpu(&self) -> CpuId {
        CpuId::BOOT
    }

    fn cpu_count(&self) -> usize {
        self.count
    }

    fn halt(&self) {}

    fn send_hint(&self, cpu: CpuId) {
        self.hints.lock().unwrap().push(cpu);
    }
}

struct TestClock {
    nanos: AtomicU64,
}

impl TimerDevice for TestClock {
    fn now_ns(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

struct TestStacks {
    fail: AtomicBool,
    released: AtomicUsize,
}

impl StackAllocator for TestStacks {
    fn allocate(&self, size: usize) -> Result<StackBlock, KernelError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(KernelError::OutOfMemory { requested: size });
        }
        Ok(StackBlock::zeroed(size))
    }

    fn release(&self, _block: StackBlock) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct TestPlatform {
    cpu: TestCpu,
    interrupts: FlagInterrupts,
    clock: TestClock,
    signals: PosixDelivery,
    stacks: TestStacks,
    contexts: Mutex<HashMap<ThreadId, ThreadEntry>>,
    switches: Mutex<Vec<(ExecContext, ExecContext)>>,
}

impl TestPlatform {
    pub fn new(cpus: usize) -> Self {
        Self {
            cpu: TestCpu {
                count: cpus,
                hints: Mutex::new(Vec::new()),
            },
            interrupts: FlagInterrupts::new(true),
            clock: TestClock {
                nanos: AtomicU64::new(0),
            },
            signals: PosixDelivery,
            stacks: TestStacks {
                fail: AtomicBool::new(false),
                released: AtomicUsize::new(0),
            },
            contexts: Mutex::new(HashMap::new()),
            switches: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.nanos.fetch_add(by.as_nanos(), Ordering::SeqCst);
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.stacks.fail.store(fail, Ordering::SeqCst);
    }

    pub fn released_stacks(&self) -> usize {
        self.stacks.released.load(Ordering::SeqCst)
    }

    pub fn hints(&self) -> Vec<CpuId> {
        self.cpu.hints.lock().unwrap().clone()
    }

    pub fn has_context(&self, thread: ThreadId) -> bool {
        self.contexts.lock().unwrap().contains_key(&thread)
    }

    pub fn switches(&self) -> Vec<(ExecContext, ExecContext)> {
        self.switches.lock().unwrap().clone()
    }
}

impl Platform for TestPlatform {
    fn cpu(&self) -> &dyn CpuHal {
        &self.cpu
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
        self.contexts.lock().unwrap().insert(thread, entry);
    }

    fn switch_context(&self, _cpu: CpuId, from: ExecContext, to: ExecContext) {
        self.switches.lock().unwrap().push((from, to));
    }

    fn exit_context(&self, _cpu: CpuId, from: ExecContext, to: ExecContext) {
        self.switches.lock().unwrap().push((from, to));
    }
}
