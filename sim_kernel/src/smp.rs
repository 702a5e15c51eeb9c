//! Simulated CPUs
//!
//! A halted CPU sleeps on its own condition variable until it receives a
//! hint or one tick passes, which stands in for the local timer interrupt.

use crate::context;
use core_types::CpuId;
use hal::CpuHal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct SimCpu {
    hinted: Mutex<bool>,
    wake: Condvar,
}

/// The CPUs of one simulated machine
#[derive(Debug)]
pub struct SimCpus {
    cpus: Vec<SimCpu>,
    tick: Duration,
    hints: AtomicU64,
}

impl SimCpus {
    pub fn new(count: usize, tick: Duration) -> Self {
        Self {
            cpus: (0..count).map(|_| SimCpu::default()).collect(),
            tick,
            hints: AtomicU64::new(0),
        }
    }

    /// Hint interrupts delivered so far
    pub fn hints_delivered(&self) -> u64 {
        self.hints.load(Ordering::SeqCst)
    }
}

impl CpuHal for SimCpus {
    fn current_cpu(&self) -> CpuId {
        context::current_cpu()
    }

    fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    fn halt(&self) {
        let Some(cpu) = self.cpus.get(context::current_cpu().index()) else {
            return;
        };
        let mut hinted = cpu.hinted.lock().unwrap_or_else(PoisonError::into_inner);
        if !*hinted {
            hinted = cpu
                .wake
                .wait_timeout(hinted, self.tick)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *hinted = false;
    }

    fn send_hint(&self, cpu: CpuId) {
        let Some(target) = self.cpus.get(cpu.index()) else {
            log::warn!("hint to unknown {cpu}");
            return;
        };
        self.hints.fetch_add(1, Ordering::SeqCst);
        *target.hinted.lock().unwrap_or_else(PoisonError::into_inner) = true;
        target.wake.notify_all();
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_pending_hint_skips_halt() {
        let cpus = SimCpus::new(1, Duration::from_secs(60));
        context::enter(CpuId(0));
        cpus.send_hint(CpuId(0));

        let started = Instant::now();
        cpus.halt();
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(cpus.hints_delivered(), 1);
    }

    #[test]
    fn test_halt_ends_after_a_tick() {
        let cpus = SimCpus::new(1, Duration::from_millis(2));
        context::enter(CpuId(0));
        let started = Instant::now();
        cpus.halt();
        assert!(started.elapsed() >= Duration::from_millis(1));
    }

    #[test]
    fn test_hint_wakes_other_cpu() {
        let cpus = Arc::new(SimCpus::new(2, Duration::from_secs(60)));
        let halted = Arc::clone(&cpus);
        let handle = std::thread::spawn(move || {
            context::enter(CpuId(1));
            halted.halt();
        });
        std::thread::sleep(Duration::from_millis(10));
        cpus.send_hint(CpuId(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_hint_to_unknown_cpu_is_dropped() {
        let cpus = SimCpus::new(1, Duration::from_millis(1));
        cpus.send_hint(CpuId(7));
        assert_eq!(cpus.hints_delivered(), 0);
        assert_eq!(cpus.cpu_count(), 1);
    }
}
