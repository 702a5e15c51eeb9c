//! Idle CPU tracking
//!
//! Each CPU owns one bit of the idle mask: set while it has nothing to run
//! and is about to halt, cleared when it dispatches a thread. A CPU that
//! makes a thread runnable uses the mask to pick a halted CPU and send it a
//! hint interrupt so the thread is picked up without waiting for a tick.
//!
//! The mask is only a hint. A CPU may be marked idle a moment after it
//! found work, or busy a moment before it halts; the tick bounds how long
//! such a thread can sit unnoticed.

use core::sync::atomic::{AtomicU64, Ordering};
use core_types::{CpuId, MAX_CPUS};
use serde::{Deserialize, Serialize};

/// Which CPU is hinted when a thread becomes runnable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HintPolicy {
    /// Hint the CPU the thread last ran on, if it is idle
    LastCpu,
    /// Claim and hint the first idle CPU
    FirstIdle,
}

/// Lock-free bitmap of idle CPUs
#[derive(Debug, Default)]
pub struct IdleMask {
    bits: AtomicU64,
}

impl IdleMask {
    /// Creates a mask with every CPU busy
    pub const fn new() -> Self {
        Self {
            bits: AtomicU64::new(0),
        }
    }

    /// Marks `cpu` as having nothing to run
    pub fn set_idle(&self, cpu: CpuId) {
        self.bits.fetch_or(cpu.mask(), Ordering::SeqCst);
    }

    /// Marks `cpu` as running a thread
    pub fn set_busy(&self, cpu: CpuId) {
        self.bits.fetch_and(!cpu.mask(), Ordering::SeqCst);
    }

    /// Returns true if `cpu` is marked idle
    pub fn is_idle(&self, cpu: CpuId) -> bool {
        self.bits.load(Ordering::SeqCst) & cpu.mask() != 0
    }

    /// Returns the raw mask
    pub fn snapshot(&self) -> u64 {
        self.bits.load(Ordering::SeqCst)
    }

    /// Atomically claims the lowest idle CPU other than `except`
    ///
    /// The claimed CPU is marked busy, so two CPUs never hint the same
    /// idle CPU for two different threads.
    pub fn claim_first_idle(&self, except: CpuId, cpu_count: usize) -> Option<CpuId> {
        for index in 0..cpu_count.min(MAX_CPUS) {
            let cpu = CpuId(index as u32);
            if cpu == except {
                continue;
            }
            let previous = self.bits.fetch_and(!cpu.mask(), Ordering::SeqCst);
            if previous & cpu.mask() != 0 {
                return Some(cpu);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_and_busy() {
        let mask = IdleMask::new();
        assert!(!mask.is_idle(CpuId(3)));
        mask.set_idle(CpuId(3));
        mask.set_idle(CpuId(0));
        assert!(mask.is_idle(CpuId(3)));
        assert_eq!(mask.snapshot(), 0b1001);
        mask.set_busy(CpuId(3));
        assert_eq!(mask.snapshot(), 0b0001);
    }

    #[test]
    fn test_claim_skips_caller() {
        let mask = IdleMask::new();
        mask.set_idle(CpuId(0));
        mask.set_idle(CpuId(2));

        assert_eq!(mask.claim_first_idle(CpuId(0), 4), Some(CpuId(2)));
        assert!(!mask.is_idle(CpuId(2)));
        assert!(mask.is_idle(CpuId(0)));
        assert_eq!(mask.claim_first_idle(CpuId(0), 4), None);
    }

    #[test]
    fn test_claim_respects_cpu_count() {
        let mask = IdleMask::new();
        mask.set_idle(CpuId(5));
        assert_eq!(mask.claim_first_idle(CpuId(0), 4), None);
        assert_eq!(mask.claim_first_idle(CpuId(0), 8), Some(CpuId(5)));
    }

    #[test]
    fn test_highest_cpu() {
        let mask = IdleMask::new();
        let last = CpuId((MAX_CPUS - 1) as u32);
        mask.set_idle(last);
        assert!(mask.is_idle(last));
        assert_eq!(mask.claim_first_idle(CpuId(0), MAX_CPUS), Some(last));
    }
}
