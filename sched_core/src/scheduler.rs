//! Thread Scheduler
//!
//! This module owns every thread record and decides which thread runs on
//! which CPU.
//!
//! ## Philosophy
//!
//! - **One lock, one truth**: all scheduling state lives in
//!   [`SchedulerState`], which is only reachable through the kernel's
//!   scheduler lock. Nothing here blocks or switches stacks; the caller
//!   does that after releasing the lock.
//! - **Waiting is a flag, not a queue**: a blocked thread stays in the ring
//!   with `WAITING` set. Whatever it waits for keeps its own queue and
//!   calls [`SchedulerState::signal_thread`] to release it.
//! - **No lost wake-ups**: a wake-up that arrives before the thread
//!   manages to block is remembered and consumes the next
//!   [`SchedulerState::wait_thread`].
//!
//! ## Design
//!
//! - **Ring**: threads form a circular list threaded through the arena.
//!   Each CPU resumes its search just after the thread it last ran, so
//!   every runnable thread gets a turn.
//! - **Arena**: slots are reused; a generation counter in every
//!   [`ThreadId`] makes handles to reaped threads stale.
//! - **Boot thread**: slot 0 is the thread that booted the kernel. It
//!   anchors the ring, adopts orphans and is never reaped.

use crate::smp::IdleMask;
use crate::thread::{Thread, ThreadFlags};
use crate::timer::{TimedEvent, TimerQueue};
use core_types::{CpuId, Pid, ThreadId};
use kernel_api::{
    Affinity, Instant, PendingSignals, SigInfo, SignalDelivery, StackBlock, ThreadKind,
    ThreadParams,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The thread that booted the kernel
pub const BOOT_THREAD: ThreadId = ThreadId::new(0, 0);

const BOOT_SLOT: usize = 0;

/// Scheduling event for the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedEvent {
    ThreadCreated {
        thread: ThreadId,
        pid: Pid,
        timestamp_ns: u64,
    },
    ThreadDispatched {
        thread: ThreadId,
        cpu: CpuId,
        timestamp_ns: u64,
    },
    ThreadWoken {
        thread: ThreadId,
        timestamp_ns: u64,
    },
    ThreadExited {
        thread: ThreadId,
        status: i32,
        timestamp_ns: u64,
    },
    ThreadReaped {
        thread: ThreadId,
        timestamp_ns: u64,
    },
    CpuIdle {
        cpu: CpuId,
        timestamp_ns: u64,
    },
}

/// Result of [`SchedulerState::signal_thread`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// The thread is gone or terminated
    Ignored,
    /// The thread was not waiting; its next wait returns immediately
    Deferred,
    /// The thread became runnable
    Runnable {
        /// Idle CPU, other than the caller's, that the thread last ran on
        idle_cpu: Option<CpuId>,
    },
}

impl WakeOutcome {
    /// Returns true if the thread became runnable
    pub fn is_runnable(&self) -> bool {
        matches!(self, WakeOutcome::Runnable { .. })
    }
}

/// Result of looking for a reapable child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildScan {
    /// A matching child has terminated
    Zombie(ThreadId),
    /// Matching children exist, none has terminated yet
    Running,
    /// No child matches
    NoMatch,
}

#[derive(Debug)]
enum SlotState {
    Free,
    Reserved,
    Occupied(Thread),
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    state: SlotState,
}

#[derive(Debug, Clone, Copy, Default)]
struct CpuSlot {
    current: Option<ThreadId>,
    cursor: Option<ThreadId>,
}

/// Audit events kept when no capacity is configured
pub const AUDIT_CAPACITY: usize = 4096;

/// Newest scheduling events, bounded
#[derive(Debug)]
struct AuditTrail {
    events: VecDeque<SchedEvent>,
    capacity: usize,
    dropped: u64,
}

impl AuditTrail {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    fn push(&mut self, event: SchedEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.events.len() > self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
    }
}

/// All scheduling state, guarded by the kernel's scheduler lock
#[derive(Debug)]
pub struct SchedulerState {
    slots: Vec<Slot>,
    free: Vec<usize>,
    cpus: Vec<CpuSlot>,
    next_pid: u32,
    timers: TimerQueue,
    audit: Option<AuditTrail>,
    now: Instant,
}

impl SchedulerState {
    /// Creates the state with the boot thread running on CPU 0
    pub fn new(cpu_count: usize, audit: bool) -> Self {
        let boot = Thread {
            id: BOOT_THREAD,
            name: "boot".into(),
            pid: Pid::KERNEL,
            pgid: Pid::KERNEL,
            parent: None,
            creator: None,
            flags: ThreadFlags::empty(),
            wake_time: 0,
            affinity: Affinity::Any,
            signals: PendingSignals::new(),
            wake_pending: false,
            on_cpu: Some(CpuId::BOOT),
            last_cpu: CpuId::BOOT,
            exit_status: None,
            stack: None,
            prev: BOOT_SLOT,
            next: BOOT_SLOT,
        };
        let mut cpus = vec![CpuSlot::default(); cpu_count.max(1)];
        cpus[CpuId::BOOT.index()].current = Some(BOOT_THREAD);

        Self {
            slots: vec![Slot {
                generation: BOOT_THREAD.generation(),
                state: SlotState::Occupied(boot),
            }],
            free: Vec::new(),
            cpus,
            next_pid: 1,
            timers: TimerQueue::new(),
            audit: audit.then(|| AuditTrail::new(AUDIT_CAPACITY)),
            now: Instant::from_nanos(0),
        }
    }

    /// Updates the clock reading used for audit timestamps
    pub fn set_time(&mut self, now: Instant) {
        self.now = now;
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    /// Looks up a live thread
    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        let slot = self.slots.get(id.index())?;
        match &slot.state {
            SlotState::Occupied(thread) if slot.generation == id.generation() => Some(thread),
            _ => None,
        }
    }

    /// Looks up a live thread for modification
    pub fn thread_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        let slot = self.slots.get_mut(id.index())?;
        match &mut slot.state {
            SlotState::Occupied(thread) if slot.generation == id.generation() => Some(thread),
            _ => None,
        }
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.thread(id).is_some()
    }

    /// Number of live threads, zombies included
    pub fn thread_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Occupied(_)))
            .count()
    }

    /// Thread currently running on `cpu`, `None` while it idles
    pub fn current_on(&self, cpu: CpuId) -> Option<ThreadId> {
        self.cpus.get(cpu.index()).and_then(|slot| slot.current)
    }

    /// Every live thread in ring order, starting at the boot thread
    pub fn ring(&self) -> Vec<ThreadId> {
        let mut ids = Vec::new();
        let mut index = BOOT_SLOT;
        loop {
            ids.push(self.id_at(index));
            index = self.at(index).next;
            if index == BOOT_SLOT {
                break;
            }
        }
        ids
    }

    fn at(&self, index: usize) -> &Thread {
        match &self.slots[index].state {
            SlotState::Occupied(thread) => thread,
            _ => panic!("ring links to empty slot {index}"),
        }
    }

    fn at_mut(&mut self, index: usize) -> &mut Thread {
        match &mut self.slots[index].state {
            SlotState::Occupied(thread) => thread,
            _ => panic!("ring links to empty slot {index}"),
        }
    }

    fn id_at(&self, index: usize) -> ThreadId {
        ThreadId::new(index as u32, self.slots[index].generation)
    }

    /// Claims a slot for a thread whose context is still being prepared
    ///
    /// The slot is invisible to lookups and to the dispatcher until
    /// [`SchedulerState::insert`] fills it.
    pub fn reserve(&mut self) -> ThreadId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index].state = SlotState::Reserved;
                self.id_at(index)
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    state: SlotState::Reserved,
                });
                self.id_at(self.slots.len() - 1)
            }
        }
    }

    /// Fills a reserved slot and links the thread into the ring right
    /// after its creator; returns the thread's pid
    pub fn insert(
        &mut self,
        id: ThreadId,
        params: &ThreadParams,
        creator: Option<ThreadId>,
        stack: StackBlock,
    ) -> Pid {
        let index = id.index();
        let reserved = self.slots.get(index).map_or(false, |slot| {
            slot.generation == id.generation() && matches!(slot.state, SlotState::Reserved)
        });
        assert!(reserved, "{id} was not reserved");

        let creator = creator.filter(|creator| self.contains(*creator));
        let (pid, pgid) = match params.kind {
            ThreadKind::Kernel => (Pid::KERNEL, Pid::KERNEL),
            ThreadKind::Process { pgid } => {
                let inherited = creator
                    .and_then(|creator| self.thread(creator))
                    .filter(|thread| thread.is_process())
                    .map(|thread| thread.pgid);
                let pid = Pid(self.next_pid);
                self.next_pid += 1;
                (pid, pgid.or(inherited).unwrap_or(pid))
            }
        };

        let mut flags = ThreadFlags::empty();
        if params.start_waiting {
            flags.insert(ThreadFlags::WAITING);
        }
        if params.rebel {
            flags.insert(ThreadFlags::REBEL);
        }

        let anchor = creator.map_or(BOOT_SLOT, |creator| creator.index());
        let next = self.at(anchor).next;
        let last_cpu = match params.affinity {
            Affinity::Cpu(cpu) => cpu,
            Affinity::Any => self.at(anchor).last_cpu,
        };
        self.slots[index].state = SlotState::Occupied(Thread {
            id,
            name: params.name.clone(),
            pid,
            pgid,
            parent: creator,
            creator,
            flags,
            wake_time: 0,
            affinity: params.affinity,
            signals: PendingSignals::new(),
            wake_pending: false,
            on_cpu: None,
            last_cpu,
            exit_status: None,
            stack: Some(stack),
            prev: anchor,
            next,
        });
        self.at_mut(anchor).next = index;
        self.at_mut(next).prev = index;

        self.record(SchedEvent::ThreadCreated {
            thread: id,
            pid,
            timestamp_ns: self.now.as_nanos(),
        });
        pid
    }

    /// Unlinks a thread and frees its slot
    ///
    /// Children and threads it created are handed to the boot thread.
    pub fn remove(&mut self, id: ThreadId) -> Option<Thread> {
        assert_ne!(id, BOOT_THREAD, "the boot thread is never reaped");
        self.thread(id)?;

        let index = id.index();
        let slot = &mut self.slots[index];
        let state = core::mem::replace(&mut slot.state, SlotState::Free);
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        let SlotState::Occupied(thread) = state else {
            unreachable!("lookup succeeded on an unoccupied slot");
        };

        self.at_mut(thread.prev).next = thread.next;
        self.at_mut(thread.next).prev = thread.prev;

        for slot in &mut self.slots {
            if let SlotState::Occupied(other) = &mut slot.state {
                if other.parent == Some(id) {
                    other.parent = Some(BOOT_THREAD);
                }
                if other.creator == Some(id) {
                    other.creator = Some(BOOT_THREAD);
                }
            }
        }

        self.record(SchedEvent::ThreadReaped {
            thread: id,
            timestamp_ns: self.now.as_nanos(),
        });
        Some(thread)
    }

    /// Marks a thread as not runnable
    ///
    /// If a wake-up arrived since the thread last waited, it is consumed
    /// instead and the thread stays runnable. Callers re-check their wait
    /// condition after every return to the dispatcher.
    pub fn wait_thread(&mut self, id: ThreadId) {
        let thread = match self.thread_mut(id) {
            Some(thread) => thread,
            None => panic!("wait on unknown thread {id}"),
        };
        if thread.wake_pending {
            thread.wake_pending = false;
        } else {
            thread.flags.insert(ThreadFlags::WAITING);
        }
    }

    /// Makes a waiting thread runnable
    ///
    /// A thread that is not waiting gets a pending wake-up instead, so the
    /// signal is not lost if it is about to block. Terminated threads are
    /// ignored.
    pub fn signal_thread(&mut self, id: ThreadId, caller: CpuId, idle: &IdleMask) -> WakeOutcome {
        let timestamp_ns = self.now.as_nanos();
        let Some(thread) = self.thread_mut(id) else {
            return WakeOutcome::Ignored;
        };
        if thread.flags.contains(ThreadFlags::TERMINATED) {
            return WakeOutcome::Ignored;
        }
        if !thread.flags.contains(ThreadFlags::WAITING) {
            thread.wake_pending = true;
            return WakeOutcome::Deferred;
        }

        thread.flags.remove(ThreadFlags::WAITING);
        let last = thread.last_cpu;
        let idle_cpu = (last != caller && idle.is_idle(last)).then_some(last);
        self.record(SchedEvent::ThreadWoken {
            thread: id,
            timestamp_ns,
        });
        WakeOutcome::Runnable { idle_cpu }
    }

    /// Picks the next thread for `cpu`
    ///
    /// The search starts just after the thread the CPU last ran and wraps
    /// around, so the outgoing thread is considered last. Threads that are
    /// waiting, terminated, pinned elsewhere, or running on another CPU are
    /// skipped. Returns `None` when the CPU should idle; the CPU's idle
    /// bit is updated either way.
    pub fn switch_task(&mut self, cpu: CpuId, idle: &IdleMask) -> Option<ThreadId> {
        let slot = self.cpus[cpu.index()];
        let prev = slot.current.filter(|id| self.contains(*id));
        let start = prev
            .or_else(|| slot.cursor.filter(|id| self.contains(*id)))
            .map_or(BOOT_SLOT, |id| id.index());

        let mut index = self.at(start).next;
        let chosen = loop {
            if self.can_run_on(index, cpu) {
                break Some(index);
            }
            if index == start {
                break None;
            }
            index = self.at(index).next;
        };

        if let Some(prev) = prev {
            if chosen != Some(prev.index()) {
                self.at_mut(prev.index()).on_cpu = None;
            }
        }

        let timestamp_ns = self.now.as_nanos();
        match chosen {
            Some(index) => {
                let id = self.id_at(index);
                let thread = self.at_mut(index);
                thread.on_cpu = Some(cpu);
                thread.last_cpu = cpu;
                idle.set_busy(cpu);
                self.cpus[cpu.index()] = CpuSlot {
                    current: Some(id),
                    cursor: Some(id),
                };
                if prev != Some(id) {
                    self.record(SchedEvent::ThreadDispatched {
                        thread: id,
                        cpu,
                        timestamp_ns,
                    });
                }
                Some(id)
            }
            None => {
                self.cpus[cpu.index()].current = None;
                idle.set_idle(cpu);
                if prev.is_some() {
                    self.record(SchedEvent::CpuIdle { cpu, timestamp_ns });
                }
                None
            }
        }
    }

    fn can_run_on(&self, index: usize, cpu: CpuId) -> bool {
        let thread = self.at(index);
        thread.is_schedulable()
            && thread.affinity.allows(cpu)
            && thread.on_cpu.map_or(true, |on| on == cpu)
    }

    /// Marks a thread terminated; returns the parent to notify, if any
    ///
    /// Timed events the thread still owns are cancelled.
    pub fn mark_exited(&mut self, id: ThreadId, status: i32) -> Option<ThreadId> {
        let timestamp_ns = self.now.as_nanos();
        if !self.contains(id) {
            return None;
        }
        let cancelled = self.timers.cancel_thread(id);
        if cancelled > 0 {
            log::trace!("{id} exited with {cancelled} timed event(s) pending");
        }
        let thread = self.thread_mut(id)?;
        thread.flags.insert(ThreadFlags::TERMINATED);
        thread.flags.remove(ThreadFlags::WAITING);
        thread.exit_status = Some(status);
        thread.wake_time = 0;
        let notify = if thread.is_process() {
            thread.parent
        } else {
            None
        };
        self.record(SchedEvent::ThreadExited {
            thread: id,
            status,
            timestamp_ns,
        });
        notify
    }

    /// Looks for a child of `parent` selected by `pid`
    ///
    /// `pid > 0` selects that process, `-1` any child, `0` the parent's own
    /// process group and `pid < -1` the group `-pid`. Only process children
    /// are considered.
    pub fn scan_children(&self, parent: ThreadId, pid: i32) -> ChildScan {
        let own_group = self.thread(parent).map(|thread| thread.pgid);
        let mut running = false;
        for id in self.ring() {
            let Some(child) = self.thread(id) else { continue };
            if child.parent != Some(parent) || !child.is_process() {
                continue;
            }
            let selected = match pid {
                -1 => true,
                0 => Some(child.pgid) == own_group,
                pid if pid > 0 => child.pid.as_raw() == pid as u32,
                group => child.pgid.as_raw() == group.unsigned_abs(),
            };
            if !selected {
                continue;
            }
            if child.is_zombie() {
                return ChildScan::Zombie(id);
            }
            running = true;
        }
        if running {
            ChildScan::Running
        } else {
            ChildScan::NoMatch
        }
    }

    /// Returns true if `id` has a signal ready for delivery
    pub fn has_ready_signal(&self, id: ThreadId, delivery: &dyn SignalDelivery) -> bool {
        self.thread(id)
            .map_or(false, |thread| delivery.has_ready_signal(&thread.signals))
    }

    /// Removes the first deliverable signal of `id`
    pub fn take_ready_signal(
        &mut self,
        id: ThreadId,
        delivery: &dyn SignalDelivery,
    ) -> Option<SigInfo> {
        let thread = self.thread_mut(id)?;
        let blocked = thread.signals.blocked();
        let info = thread
            .signals
            .take_first(|info| delivery.is_deliverable(info, blocked));
        if thread.signals.is_empty() {
            thread.flags.remove(ThreadFlags::SIGNALLED);
        }
        info
    }

    /// Schedules a wake-up of `thread` at `deadline`
    pub fn post_timer(&mut self, deadline: Instant, thread: ThreadId) -> TimedEvent {
        if let Some(record) = self.thread_mut(thread) {
            record.wake_time = deadline.as_nanos();
        }
        self.timers.post(deadline, thread)
    }

    /// Cancels a timed wake-up of `thread`
    pub fn cancel_timer(&mut self, event: TimedEvent, thread: ThreadId) -> bool {
        if let Some(record) = self.thread_mut(thread) {
            record.wake_time = 0;
        }
        self.timers.cancel(event)
    }

    /// Removes every timed event due at `now`; returns the threads to wake
    pub fn expire_timers(&mut self, now: Instant) -> Vec<ThreadId> {
        self.timers.expire(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Keeps at most `capacity` audit events, dropping the oldest
    pub fn set_audit_capacity(&mut self, capacity: usize) {
        if let Some(trail) = &mut self.audit {
            trail.set_capacity(capacity);
        }
    }

    /// Recorded events, oldest first; empty unless auditing is enabled
    pub fn audit_log(&self) -> Vec<SchedEvent> {
        self.audit
            .as_ref()
            .map_or_else(Vec::new, |trail| trail.events.iter().cloned().collect())
    }

    /// Events pushed out of the audit trail to make room
    pub fn audit_dropped(&self) -> u64 {
        self.audit.as_ref().map_or(0, |trail| trail.dropped)
    }

    fn record(&mut self, event: SchedEvent) {
        if let Some(trail) = &mut self.audit {
            trail.push(event);
        }
    }
}
