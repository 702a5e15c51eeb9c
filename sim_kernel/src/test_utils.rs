//! Test utilities for scenario tests
//!
//! The helpers busy-wait by yielding, which also fires due timed events,
//! and give up after a wall-clock bound instead of hanging a test run.

use crate::timer::SimClock;
use crate::{SimKernel, SimOptions};
use sched_core::{Kernel, KernelConfig, Semaphore};

/// Wall-clock bound for [`spin_until`]
pub const SPIN_LIMIT: std::time::Duration = std::time::Duration::from_secs(10);

/// Boots a machine with `cpus` CPUs and the audit log on
pub fn boot(cpus: usize) -> SimKernel {
    SimKernel::boot(config(cpus)).unwrap_or_else(|err| panic!("boot failed: {err}"))
}

/// Boots a machine driven by a manual clock; returns a clock handle too
pub fn boot_manual(cpus: usize) -> (SimKernel, SimClock) {
    let clock = SimClock::manual();
    let options = SimOptions::default().with_clock(clock.clone());
    let sim = SimKernel::boot_with(config(cpus), options)
        .unwrap_or_else(|err| panic!("boot failed: {err}"));
    (sim, clock)
}

pub fn config(cpus: usize) -> KernelConfig {
    KernelConfig::default().with_cpus(cpus).with_audit()
}

/// Yields until `condition` holds
///
/// # Panics
///
/// Panics if the condition does not hold within [`SPIN_LIMIT`].
pub fn spin_until(kernel: &Kernel, mut condition: impl FnMut() -> bool) {
    let started = std::time::Instant::now();
    while !condition() {
        assert!(
            started.elapsed() < SPIN_LIMIT,
            "condition not reached within {SPIN_LIMIT:?}"
        );
        kernel.yield_now();
        kernel.platform().cpu().relax();
    }
}

/// Yields until at least `count` threads wait on `semaphore`
pub fn wait_for_waiters(kernel: &Kernel, semaphore: &Semaphore, count: usize) {
    spin_until(kernel, || semaphore.waiters(kernel) >= count);
}
