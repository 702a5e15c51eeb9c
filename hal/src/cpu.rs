//! CPU abstraction

use core_types::CpuId;

/// CPU-specific operations
///
/// All methods act on, or are issued from, the calling CPU.
pub trait CpuHal: Send + Sync {
    /// Returns the CPU the caller is executing on
    fn current_cpu(&self) -> CpuId;

    /// Returns the number of CPUs brought up
    fn cpu_count(&self) -> usize;

    /// Halts the CPU until the next interrupt (timer tick or hint)
    fn halt(&self);

    /// Sends a scheduler hint inter-processor interrupt to `cpu`
    ///
    /// The target re-runs its dispatch loop instead of halting until an
    /// unrelated tick. A hint to a CPU that is already running is harmless.
    fn send_hint(&self, cpu: CpuId);

    /// Spin-wait hint for busy loops
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct MockCpu {
        hints: AtomicU64,
    }

    impl CpuHal for MockCpu {
        fn current_cpu(&self) -> CpuId {
            CpuId(0)
        }

        fn cpu_count(&self) -> usize {
            4
        }

        fn halt(&self) {}

        fn send_hint(&self, cpu: CpuId) {
            self.hints.fetch_or(cpu.mask(), Ordering::SeqCst);
        }
    }

    #[test]
    fn test_hints_are_recorded_per_cpu() {
        let cpu = MockCpu {
            hints: AtomicU64::new(0),
        };
        cpu.send_hint(CpuId(1));
        cpu.send_hint(CpuId(3));
        assert_eq!(cpu.hints.load(Ordering::SeqCst), 0b1010);
        cpu.relax();
        assert_eq!(cpu.current_cpu(), CpuId::BOOT);
    }
}
