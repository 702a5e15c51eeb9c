//! # Simulated Kernel
//!
//! This crate runs the concurrency core on a hosted machine.
//!
//! ## Purpose
//!
//! The simulation lets the scheduler and semaphores be exercised for real
//! without hardware:
//! - Runs under `cargo test`
//! - Real blocking and real parallelism on several simulated CPUs
//! - Controllable time through a manual clock
//! - Inspectable (audit log, allocator counters, hint counters)
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! Every execution context, kernel thread or idle loop, is an OS thread.
//! A context only runs while it holds a simulated CPU, and a context switch
//! hands the CPU from one OS thread to the next, so the core sees exactly
//! the interleavings a real machine would give it.
//!
//! The thread calling [`SimKernel::boot`] becomes the boot thread on CPU 0.

mod context;
pub mod fault_injection;
pub mod platform;
pub mod smp;
pub mod test_utils;
pub mod timer;

pub use fault_injection::{AllocationFault, AllocatorStats, FaultPlan, SimAllocator};
pub use platform::{SimInterrupts, SimPlatform};
pub use smp::SimCpus;
pub use timer::SimClock;

use core_types::CpuId;
use kernel_api::Duration;
use sched_core::{ConfigError, ExecContext, Kernel, KernelConfig};
use std::ops::Deref;
use std::sync::Arc;

/// Boot options of a simulated machine
#[derive(Debug, Clone, Default)]
pub struct SimOptions {
    pub clock: SimClock,
    pub faults: FaultPlan,
}

impl SimOptions {
    pub fn with_clock(mut self, clock: SimClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }
}

/// A booted simulated machine
///
/// Dereferences to the [`Kernel`] handle. Dropping it shuts the idle
/// loops down; threads still blocked at that point stay parked.
pub struct SimKernel {
    kernel: Arc<Kernel>,
    platform: Arc<SimPlatform>,
}

impl SimKernel {
    /// Boots with a monotonic clock and no faults
    pub fn boot(config: KernelConfig) -> Result<Self, ConfigError> {
        Self::boot_with(config, SimOptions::default())
    }

    pub fn boot_with(config: KernelConfig, options: SimOptions) -> Result<Self, ConfigError> {
        config.validate()?;
        context::enter(CpuId::BOOT);

        let cpu_count = config.cpu_count;
        let tick = std::time::Duration::from_nanos(config.tick_ns);
        let platform = Arc::new(SimPlatform::new(
            cpu_count,
            tick,
            options.clock,
            &options.faults,
        ));
        let kernel = Kernel::new(platform.clone(), config)?;

        for index in 0..cpu_count {
            let cpu = CpuId(index as u32);
            let idle = ExecContext::Idle(cpu);
            let parker = platform.contexts().parker(idle);
            let idle_kernel = Arc::clone(&kernel);
            let spawned = std::thread::Builder::new()
                .name(format!("sim-idle-{index}"))
                .spawn(move || {
                    if let Some(cpu) = parker.park() {
                        context::enter(cpu);
                        context::run_or_abort(idle, || idle_kernel.idle_loop());
                    }
                });
            if let Err(err) = spawned {
                panic!("cannot back the idle loop of {cpu} with a host thread: {err}");
            }
            // CPU 0 belongs to the boot thread; its idle loop starts the
            // first time the boot thread gives the CPU up.
            if cpu != CpuId::BOOT {
                platform.contexts().resume(idle, cpu);
            }
        }
        log::info!("simulated machine booted with {cpu_count} CPU(s)");

        Ok(Self { kernel, platform })
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn platform(&self) -> &SimPlatform {
        &self.platform
    }

    pub fn clock(&self) -> &SimClock {
        self.platform.clock()
    }

    /// Moves a manual clock forward and runs the tick handler
    pub fn advance(&self, by: Duration) {
        self.platform.clock().advance(by);
        self.kernel.on_tick();
    }
}

impl Deref for SimKernel {
    type Target = Arc<Kernel>;

    fn deref(&self) -> &Self::Target {
        &self.kernel
    }
}

impl Drop for SimKernel {
    fn drop(&mut self) {
        self.kernel.shutdown();
        self.platform.contexts().shut_down_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::ThreadParams;

    #[test]
    fn test_boot_rejects_bad_config() {
        let config = KernelConfig::default().with_cpus(0);
        assert!(matches!(SimKernel::boot(config), Err(ConfigError::NoCpus)));
    }

    #[test]
    fn test_boot_thread_runs_on_cpu0() {
        let sim = SimKernel::boot(KernelConfig::default()).unwrap();
        assert_eq!(sim.current_cpu(), CpuId::BOOT);
        assert_eq!(sim.current_thread(), Some(Kernel::BOOT_THREAD));
        assert_eq!(sim.thread_count(), 1);
    }

    #[test]
    fn test_thread_runs_and_is_joined() {
        let sim = SimKernel::boot(KernelConfig::default()).unwrap();
        let thread = sim
            .create_thread(|| 7, ThreadParams::kernel("seven"))
            .unwrap();
        assert_eq!(sim.destroy_thread(thread), Ok(7));
        assert_eq!(sim.thread_count(), 1);
        assert_eq!(sim.platform().allocator().stats().releases, 1);
    }

    #[test]
    fn test_advance_fires_timers() {
        let options = SimOptions::default().with_clock(SimClock::manual());
        let sim = SimKernel::boot_with(KernelConfig::default(), options).unwrap();
        sim.advance(Duration::from_millis(5));
        assert_eq!(sim.now().as_nanos(), 5_000_000);
    }
}
