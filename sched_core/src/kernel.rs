//! # Kernel
//!
//! The [`Kernel`] ties the scheduler state to a [`Platform`] and exposes
//! the thread lifecycle: create, yield, sleep, exit, join, reap and signal.
//!
//! ## Switching
//!
//! Every operation that gives up the CPU follows the same shape: take the
//! scheduler lock, update state and pick the next context with
//! [`SchedulerState::switch_task`], release the lock, then ask the platform
//! to switch. No lock is ever held across a context switch, and rescheduling
//! with interrupts disabled is a bug.
//!
//! ## Hints
//!
//! Making a thread runnable may leave it sitting on a halted CPU. After the
//! locks are released the waker sends that CPU a hint interrupt, chosen by
//! the configured [`HintPolicy`]. Idle CPUs also poll on every tick, so a
//! missed hint delays a thread by at most one tick.

use crate::config::{ConfigError, KernelConfig};
use crate::platform::{ExecContext, Platform, ThreadEntry};
use crate::scheduler::{ChildScan, SchedEvent, SchedulerState, WakeOutcome, BOOT_THREAD};
use crate::smp::{HintPolicy, IdleMask};
use crate::sync::{IrqGuard, IrqSpinLock, NestedGuard};
use crate::thread::{Thread, ThreadFlags, ThreadInfo};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core_types::{CpuId, Pid, ThreadId};
use hal::InterruptHal;
use kernel_api::{
    Affinity, Duration, Instant, KernelError, ReapFlags, SigInfo, SignalSet, ThreadParams, SIGINT,
};
use std::sync::Arc;

/// The scheduler core bound to a platform
pub struct Kernel {
    platform: Arc<dyn Platform>,
    config: KernelConfig,
    sched: IrqSpinLock<SchedulerState>,
    idle: IdleMask,
    hints_sent: AtomicU64,
    shutdown: AtomicBool,
}

impl Kernel {
    /// The calling context of [`Kernel::new`], running on CPU 0
    pub const BOOT_THREAD: ThreadId = BOOT_THREAD;

    /// Brings up the core
    ///
    /// The caller becomes the boot thread on CPU 0. The platform must
    /// already treat the caller as `ExecContext::Thread(BOOT_THREAD)`.
    pub fn new(platform: Arc<dyn Platform>, config: KernelConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let available = platform.cpu().cpu_count();
        if available < config.cpu_count {
            return Err(ConfigError::PlatformCpus {
                configured: config.cpu_count,
                available,
            });
        }

        let mut sched = SchedulerState::new(config.cpu_count, config.audit);
        sched.set_audit_capacity(config.audit_capacity);
        sched.set_time(Instant::from_nanos(platform.timer().now_ns()));
        log::info!(
            "kernel core up: {} CPU(s), {} ns tick, {:?} hints",
            config.cpu_count,
            config.tick_ns,
            config.hint_policy
        );

        Ok(Arc::new(Self {
            platform,
            config,
            sched: IrqSpinLock::new(sched),
            idle: IdleMask::new(),
            hints_sent: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn platform(&self) -> &dyn Platform {
        &*self.platform
    }

    /// Current reading of the platform clock
    pub fn now(&self) -> Instant {
        Instant::from_nanos(self.platform.timer().now_ns())
    }

    /// CPU executing the caller
    pub fn current_cpu(&self) -> CpuId {
        self.platform.cpu().current_cpu()
    }

    pub(crate) fn irq(&self) -> &dyn InterruptHal {
        self.platform.interrupts()
    }

    pub(crate) fn lock_sched(&self) -> IrqGuard<'_, SchedulerState> {
        let mut sched = self.sched.lock(self.platform.interrupts());
        sched.set_time(self.now());
        sched
    }

    /// Takes the scheduler lock under an already-held semaphore lock
    pub(crate) fn lock_sched_nested<'a, U>(
        &'a self,
        outer: &'a IrqGuard<'_, U>,
    ) -> NestedGuard<'a, SchedulerState> {
        let mut sched = self.sched.lock_nested(outer);
        sched.set_time(self.now());
        sched
    }

    /// Thread running on the calling CPU, `None` in an idle loop
    pub fn current_thread(&self) -> Option<ThreadId> {
        let cpu = self.current_cpu();
        self.lock_sched().current_on(cpu)
    }

    /// Current thread of the calling CPU; blocking from an idle loop is a bug
    pub(crate) fn current_in(&self, sched: &SchedulerState) -> ThreadId {
        let cpu = self.current_cpu();
        match sched.current_on(cpu) {
            Some(id) => id,
            None => panic!("blocking call from the idle loop of {cpu}"),
        }
    }

    /// Wakes `thread` from under a held lock; deliver the outcome with
    /// [`Kernel::deliver_wake`] once every lock is released
    pub(crate) fn signal_locked(&self, sched: &mut SchedulerState, thread: ThreadId) -> WakeOutcome {
        sched.signal_thread(thread, self.current_cpu(), &self.idle)
    }

    /// Creates a thread running `entry`
    ///
    /// The thread is linked into the ring right after its creator and,
    /// unless created waiting, becomes runnable immediately. When `entry`
    /// returns, its value is the thread's exit status.
    pub fn create_thread<F>(self: &Arc<Self>, entry: F, params: ThreadParams) -> Result<ThreadId, KernelError>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let size = params.stack_size.unwrap_or(self.config.default_stack_size);
        let stack = self.platform.stacks().allocate(size)?;
        let stack_top = stack.top();

        let (id, creator) = {
            let mut sched = self.lock_sched();
            let creator = sched.current_on(self.current_cpu());
            (sched.reserve(), creator)
        };

        let kernel = Arc::clone(self);
        let body: ThreadEntry = Box::new(move || {
            let status = entry();
            kernel.exit_current(status);
        });
        self.platform.init_context(id, stack_top, body);

        let pid = self.lock_sched().insert(id, &params, creator, stack);
        log::debug!("created {id} '{}' ({pid}, {size} byte stack)", params.name);

        if !params.start_waiting {
            self.hint_new_thread(params.affinity);
        }
        Ok(id)
    }

    fn hint_new_thread(&self, affinity: Affinity) {
        let cpu = self.current_cpu();
        let target = match affinity {
            Affinity::Cpu(pinned) => (pinned != cpu && self.idle.is_idle(pinned)).then_some(pinned),
            Affinity::Any => self.idle.claim_first_idle(cpu, self.config.cpu_count),
        };
        if let Some(target) = target {
            self.send_hint(target);
        }
    }

    /// Sends the hint a wake-up calls for, if any
    pub(crate) fn deliver_wake(&self, outcome: WakeOutcome) {
        let WakeOutcome::Runnable { idle_cpu } = outcome else {
            return;
        };
        let target = match self.config.hint_policy {
            HintPolicy::LastCpu => idle_cpu,
            HintPolicy::FirstIdle => self
                .idle
                .claim_first_idle(self.current_cpu(), self.config.cpu_count),
        };
        if let Some(target) = target {
            self.send_hint(target);
        }
    }

    fn send_hint(&self, cpu: CpuId) {
        self.hints_sent.fetch_add(1, Ordering::Relaxed);
        log::trace!("hint to {cpu}");
        self.platform.cpu().send_hint(cpu);
    }

    /// Makes a waiting thread runnable
    pub fn wake_thread(&self, thread: ThreadId) -> Result<(), KernelError> {
        let outcome = {
            let mut sched = self.lock_sched();
            if !sched.contains(thread) {
                return Err(KernelError::NoSuchThread);
            }
            self.signal_locked(&mut sched, thread)
        };
        self.deliver_wake(outcome);
        Ok(())
    }

    /// Gives up the CPU to the next runnable thread
    ///
    /// Timed events that are already due fire first, so a thread whose
    /// deadline passed competes in this round. Returns immediately if
    /// nothing else can run. A thread that marked itself waiting does not
    /// return until it is signalled.
    pub fn yield_now(&self) {
        debug_assert!(
            self.irq().interrupts_enabled(),
            "rescheduling with interrupts disabled"
        );
        let cpu = self.current_cpu();
        let (prev, next, wakes) = {
            let mut sched = self.lock_sched();
            let Some(prev) = sched.current_on(cpu) else {
                return;
            };
            let wakes = self.expire_due(&mut sched, cpu);
            (prev, sched.switch_task(cpu, &self.idle), wakes)
        };
        for outcome in wakes {
            self.deliver_wake(outcome);
        }
        let to = match next {
            Some(next) if next == prev => return,
            Some(next) => ExecContext::Thread(next),
            None => ExecContext::Idle(cpu),
        };
        self.platform
            .switch_context(cpu, ExecContext::Thread(prev), to);
    }

    /// Blocks the calling thread for at least `duration`
    pub fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        let (me, event) = {
            let mut sched = self.lock_sched();
            let me = self.current_in(&sched);
            (me, sched.post_timer(deadline, me))
        };
        loop {
            {
                let mut sched = self.lock_sched();
                if sched.now() >= deadline {
                    sched.cancel_timer(event, me);
                    break;
                }
                sched.wait_thread(me);
            }
            self.yield_now();
        }
    }

    fn exit_current(&self, status: i32) {
        let cpu = self.current_cpu();
        let (me, next, parent_wake) = {
            let mut sched = self.lock_sched();
            let me = self.current_in(&sched);
            let parent = sched.mark_exited(me, status);
            let parent_wake = parent.map(|parent| sched.signal_thread(parent, cpu, &self.idle));
            (me, sched.switch_task(cpu, &self.idle), parent_wake)
        };
        log::debug!("{me} exited with status {status}");
        if let Some(outcome) = parent_wake {
            self.deliver_wake(outcome);
        }
        let to = next.map_or(ExecContext::Idle(cpu), ExecContext::Thread);
        self.platform
            .exit_context(cpu, ExecContext::Thread(me), to);
    }

    /// Waits for a thread created by the caller to terminate, then frees it
    ///
    /// Returns the thread's exit status.
    pub fn destroy_thread(&self, thread: ThreadId) -> Result<i32, KernelError> {
        let me = self
            .current_thread()
            .ok_or(KernelError::PermissionDenied)?;
        if thread == me || thread == BOOT_THREAD {
            return Err(KernelError::PermissionDenied);
        }

        loop {
            let reaped = {
                let mut sched = self.lock_sched();
                let record = sched.thread(thread).ok_or(KernelError::NoSuchThread)?;
                if record.creator != Some(me) {
                    return Err(KernelError::PermissionDenied);
                }
                if record.is_zombie() {
                    sched.remove(thread)
                } else {
                    None
                }
            };
            if let Some(record) = reaped {
                return Ok(self.release(record));
            }
            self.yield_now();
            self.platform.cpu().relax();
        }
    }

    /// Reaps a terminated child process
    ///
    /// `pid` selects children as in `waitpid`: a pid, `-1` for any child,
    /// `0` for the caller's group or `-pgid`. Returns `Ok(None)` when
    /// `nohang` is set and no selected child has terminated yet.
    pub fn poll_thread(&self, pid: i32, flags: ReapFlags) -> Result<Option<(Pid, i32)>, KernelError> {
        loop {
            let reaped = {
                let mut sched = self.lock_sched();
                let me = self.current_in(&sched);
                match sched.scan_children(me, pid) {
                    ChildScan::NoMatch => return Err(KernelError::NoChild),
                    ChildScan::Zombie(child) => sched.remove(child),
                    ChildScan::Running => {
                        if flags.nohang {
                            return Ok(None);
                        }
                        if sched.has_ready_signal(me, self.platform.signals()) {
                            if let Some(record) = sched.thread_mut(me) {
                                record.flags.insert(ThreadFlags::INTERRUPTED_SYSCALL);
                            }
                            return Err(KernelError::Interrupted);
                        }
                        sched.wait_thread(me);
                        None
                    }
                }
            };
            if let Some(child) = reaped {
                let pid = child.pid();
                let status = self.release(child);
                log::debug!("reaped {pid} with status {status}");
                return Ok(Some((pid, status)));
            }
            self.yield_now();
        }
    }

    fn release(&self, mut thread: Thread) -> i32 {
        if let Some(stack) = thread.stack.take() {
            self.platform.stacks().release(stack);
        }
        thread.exit_status.unwrap_or(0)
    }

    /// Deposits a signal in processes selected by `pid`
    ///
    /// `pid > 0` is one process, `0` the caller's process group, `-1` every
    /// process and `pid < -1` the group `-pid`. Each process receives the
    /// signal once. A rebel child refuses everything but SIGINT from its
    /// parent. Waiting targets with the signal ready are woken so an
    /// interruptible wait can return.
    pub fn signal_pid(&self, pid: i32, info: SigInfo) -> Result<(), KernelError> {
        let cpu = self.current_cpu();
        let delivery = self.platform.signals();
        let mut delivered: Vec<Pid> = Vec::new();
        let mut wakes = Vec::new();
        let mut refused = false;

        {
            let mut sched = self.lock_sched();
            let sender = sched.current_on(cpu);
            let own_group = sender
                .and_then(|sender| sched.thread(sender))
                .map_or(Pid::KERNEL, |thread| thread.pgid);

            for id in sched.ring() {
                let Some(target) = sched.thread(id) else { continue };
                if !target.is_process()
                    || target.flags.contains(ThreadFlags::TERMINATED)
                    || delivered.contains(&target.pid)
                {
                    continue;
                }
                let selected = match pid {
                    -1 => true,
                    0 => target.pgid == own_group,
                    pid if pid > 0 => target.pid.as_raw() == pid as u32,
                    group => target.pgid.as_raw() == group.unsigned_abs(),
                };
                if !selected {
                    continue;
                }
                if target.flags.contains(ThreadFlags::REBEL)
                    && sender.is_some()
                    && target.parent == sender
                    && info.signo != SIGINT
                {
                    log::debug!("{} refused signal {} from its parent", target.pid, info.signo);
                    refused = true;
                    continue;
                }

                let Some(target) = sched.thread_mut(id) else { continue };
                delivery.deposit_signal(&mut target.signals, info);
                target.flags.insert(ThreadFlags::SIGNALLED);
                delivered.push(target.pid);
                let wake = target.flags.contains(ThreadFlags::WAITING)
                    && delivery.has_ready_signal(&target.signals);
                if wake {
                    wakes.push(sched.signal_thread(id, cpu, &self.idle));
                }
            }
        }

        for outcome in wakes {
            self.deliver_wake(outcome);
        }
        if !delivered.is_empty() {
            Ok(())
        } else if refused {
            Err(KernelError::PermissionDenied)
        } else {
            Err(KernelError::NoSuchProcess)
        }
    }

    /// Removes the first deliverable signal of the calling thread
    pub fn take_signal(&self) -> Option<SigInfo> {
        let cpu = self.current_cpu();
        let mut sched = self.lock_sched();
        let me = sched.current_on(cpu)?;
        sched.take_ready_signal(me, self.platform.signals())
    }

    /// Replaces the calling thread's blocked set; returns the old one
    pub fn set_signal_mask(&self, blocked: SignalSet) -> SignalSet {
        let mut sched = self.lock_sched();
        let me = self.current_in(&sched);
        match sched.thread_mut(me) {
            Some(thread) => {
                let old = thread.signals.blocked();
                thread.signals.set_blocked(blocked);
                old
            }
            None => SignalSet::EMPTY,
        }
    }

    /// Clears and returns the calling thread's interrupted-call flag
    pub fn take_interrupted(&self) -> bool {
        let mut sched = self.lock_sched();
        let me = self.current_in(&sched);
        sched.thread_mut(me).map_or(false, |thread| {
            let was = thread.flags.contains(ThreadFlags::INTERRUPTED_SYSCALL);
            thread.flags.remove(ThreadFlags::INTERRUPTED_SYSCALL);
            was
        })
    }

    /// Timer interrupt work: wakes every thread whose timed event is due
    pub fn on_tick(&self) {
        let cpu = self.current_cpu();
        let wakes = {
            let mut sched = self.lock_sched();
            self.expire_due(&mut sched, cpu)
        };
        for outcome in wakes {
            self.deliver_wake(outcome);
        }
    }

    fn expire_due(&self, sched: &mut SchedulerState, cpu: CpuId) -> Vec<WakeOutcome> {
        let now = sched.now();
        sched
            .expire_timers(now)
            .into_iter()
            .map(|thread| sched.signal_thread(thread, cpu, &self.idle))
            .collect()
    }

    /// Dispatch loop of a CPU with nothing else to do
    ///
    /// Runs every runnable thread it finds and halts in between. Returns
    /// after [`Kernel::shutdown`].
    pub fn idle_loop(&self) {
        let cpu = self.current_cpu();
        log::debug!("{cpu} entering idle loop");
        while !self.is_shut_down() {
            self.on_tick();
            let next = self.lock_sched().switch_task(cpu, &self.idle);
            match next {
                Some(thread) => {
                    self.platform
                        .switch_context(cpu, ExecContext::Idle(cpu), ExecContext::Thread(thread));
                }
                None => self.platform.cpu().halt(),
            }
        }
        log::debug!("{cpu} left idle loop");
    }

    /// Stops every idle loop
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("kernel core shutting down");
        for index in 0..self.config.cpu_count {
            self.platform.cpu().send_hint(CpuId(index as u32));
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn thread_info(&self, thread: ThreadId) -> Option<ThreadInfo> {
        self.lock_sched().thread(thread).map(Thread::info)
    }

    pub fn thread_count(&self) -> usize {
        self.lock_sched().thread_count()
    }

    /// Recorded scheduling events; empty unless `audit` is configured
    ///
    /// Only the newest `audit_capacity` events are kept.
    pub fn audit_log(&self) -> Vec<SchedEvent> {
        self.lock_sched().audit_log()
    }

    /// Audit events dropped because the trail was full
    pub fn audit_dropped(&self) -> u64 {
        self.lock_sched().audit_dropped()
    }

    /// Raw idle-CPU mask
    pub fn idle_cpus(&self) -> u64 {
        self.idle.snapshot()
    }

    /// Number of hint interrupts sent so far
    pub fn hints_sent(&self) -> u64 {
        self.hints_sent.load(Ordering::Relaxed)
    }
}
