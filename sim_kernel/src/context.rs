//! Hosted execution contexts
//!
//! Every kernel thread and every idle loop runs on its own OS thread.
//! Exactly one context holds a simulated CPU at a time; all others are
//! parked. A switch resumes the target's parker with the CPU number and
//! then parks the caller, so the CPU baton is passed hand to hand.
//!
//! The calling OS thread's CPU number and interrupt flag live in
//! thread-locals, set whenever a context is resumed.

use core_types::CpuId;
use sched_core::ExecContext;
use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

thread_local! {
    static CURRENT_CPU: Cell<CpuId> = const { Cell::new(CpuId::BOOT) };
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
}

pub(crate) fn current_cpu() -> CpuId {
    CURRENT_CPU.with(Cell::get)
}

pub(crate) fn interrupts_enabled() -> bool {
    INTERRUPTS_ENABLED.with(Cell::get)
}

pub(crate) fn set_interrupts_enabled(enabled: bool) {
    INTERRUPTS_ENABLED.with(|flag| flag.set(enabled));
}

/// Marks the calling OS thread as running on `cpu` with interrupts on
pub(crate) fn enter(cpu: CpuId) {
    CURRENT_CPU.with(|current| current.set(cpu));
    set_interrupts_enabled(true);
}

/// Runs a context body; a panic aborts the whole process
///
/// A context that unwinds never hands its CPU back, so every other
/// context would stay parked and the host process would hang.
pub(crate) fn run_or_abort(context: ExecContext, body: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic>");
        log::error!("{context:?} panicked: {message}");
        eprintln!("simulated {context:?} panicked, aborting: {message}");
        std::process::abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParkState {
    Parked,
    Resumed(CpuId),
    Shutdown,
}

/// Blocks a context's OS thread until another context hands it a CPU
#[derive(Debug)]
pub(crate) struct Parker {
    state: Mutex<ParkState>,
    wake: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            state: Mutex::new(ParkState::Parked),
            wake: Condvar::new(),
        }
    }

    /// Waits to be resumed; returns the CPU to run on, `None` at shutdown
    ///
    /// A resume that arrived before the call is not lost.
    pub(crate) fn park(&self) -> Option<CpuId> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match *state {
                ParkState::Resumed(cpu) => {
                    *state = ParkState::Parked;
                    return Some(cpu);
                }
                ParkState::Shutdown => return None,
                ParkState::Parked => {
                    state = self
                        .wake
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn resume(&self, cpu: CpuId) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != ParkState::Shutdown {
            *state = ParkState::Resumed(cpu);
        }
        self.wake.notify_one();
    }

    fn shut_down(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ParkState::Shutdown;
        self.wake.notify_all();
    }
}

/// Parkers of every live context
#[derive(Debug, Default)]
pub(crate) struct ContextTable {
    parkers: Mutex<HashMap<ExecContext, Arc<Parker>>>,
}

impl ContextTable {
    /// Parker of `context`, created on first use
    pub(crate) fn parker(&self, context: ExecContext) -> Arc<Parker> {
        let mut parkers = self.parkers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            parkers
                .entry(context)
                .or_insert_with(|| Arc::new(Parker::new())),
        )
    }

    /// Hands `cpu` to `context`
    pub(crate) fn resume(&self, context: ExecContext, cpu: CpuId) {
        self.parker(context).resume(cpu);
    }

    pub(crate) fn remove(&self, context: ExecContext) {
        self.parkers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&context);
    }

    /// Releases every idle loop that is parked
    ///
    /// Thread contexts stay parked; nothing will resume them again.
    pub(crate) fn shut_down_idle(&self) {
        let parkers = self.parkers.lock().unwrap_or_else(PoisonError::into_inner);
        for (context, parker) in parkers.iter() {
            if matches!(context, ExecContext::Idle(_)) {
                parker.shut_down();
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.parkers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::ThreadId;
    use std::thread;

    #[test]
    fn test_resume_before_park_is_kept() {
        let table = ContextTable::default();
        let context = ExecContext::Thread(ThreadId::new(1, 0));
        table.resume(context, CpuId(3));
        assert_eq!(table.parker(context).park(), Some(CpuId(3)));
    }

    #[test]
    fn test_park_across_threads() {
        let table = Arc::new(ContextTable::default());
        let context = ExecContext::Thread(ThreadId::new(2, 0));
        let parker = table.parker(context);
        let handle = thread::spawn(move || {
            let cpu = parker.park();
            enter(cpu.unwrap());
            current_cpu()
        });
        table.resume(context, CpuId(1));
        assert_eq!(handle.join().unwrap(), CpuId(1));
    }

    #[test]
    fn test_shutdown_releases_idle_only() {
        let table = ContextTable::default();
        let idle = ExecContext::Idle(CpuId(0));
        let thread = ExecContext::Thread(ThreadId::new(1, 0));
        table.parker(thread);
        table.shut_down_idle();
        table.parker(idle);
        table.shut_down_idle();
        assert_eq!(table.parker(idle).park(), None);

        // Shutdown is sticky.
        table.resume(idle, CpuId(0));
        assert_eq!(table.parker(idle).park(), None);
        assert_eq!(table.len(), 2);

        table.remove(thread);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_interrupt_flag_is_per_thread() {
        enter(CpuId(0));
        set_interrupts_enabled(false);
        let other = thread::spawn(interrupts_enabled).join().unwrap();
        assert!(other);
        assert!(!interrupts_enabled());
        enter(CpuId(0));
        assert!(interrupts_enabled());
    }
}
