//! Unique identifiers for system entities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on the number of CPUs tracked by the idle bitmap
pub const MAX_CPUS: usize = 64;

/// Handle to a thread record
///
/// Threads live in an arena owned by the scheduler. The handle pairs the
/// arena slot with the generation the slot had when the thread was created;
/// once the thread is reaped the slot's generation moves on and every old
/// handle becomes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId {
    index: u32,
    generation: u32,
}

impl ThreadId {
    /// Creates a thread handle from its arena slot and generation
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the arena slot
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    /// Returns the slot generation this handle was issued for
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({}#{})", self.index, self.generation)
    }
}

/// Process identifier
///
/// Kernel-only threads carry [`Pid::KERNEL`]. User processes are numbered
/// from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid(pub u32);

impl Pid {
    /// Pid shared by all kernel-only threads
    pub const KERNEL: Pid = Pid(0);

    /// Returns true for kernel-only threads
    pub const fn is_kernel(&self) -> bool {
        self.0 == 0
    }

    /// Returns the raw process number
    pub const fn as_raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

/// Identifier for a CPU core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CpuId(pub u32);

impl CpuId {
    /// The bootstrap processor
    pub const BOOT: CpuId = CpuId(0);

    /// Returns the CPU number as an index
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    /// Returns the bit this CPU occupies in a CPU mask
    pub const fn mask(&self) -> u64 {
        1u64 << self.0
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cpu({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_generation_distinguishes_reuse() {
        let first = ThreadId::new(3, 0);
        let reused = ThreadId::new(3, 1);
        assert_eq!(first.index(), reused.index());
        assert_ne!(first, reused);
    }

    #[test]
    fn test_pid_kernel() {
        assert!(Pid::KERNEL.is_kernel());
        assert!(!Pid(1).is_kernel());
        assert_eq!(Pid(7).as_raw(), 7);
    }

    #[test]
    fn test_cpu_mask() {
        assert_eq!(CpuId(0).mask(), 1);
        assert_eq!(CpuId(5).mask(), 32);
        assert_eq!(CpuId(63).mask(), 1u64 << 63);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ThreadId::new(2, 4)), "Thread(2#4)");
        assert_eq!(format!("{}", Pid(12)), "Pid(12)");
        assert!(format!("{}", CpuId(1)).starts_with("Cpu("));
    }

    #[test]
    fn test_thread_id_serialization() {
        let id = ThreadId::new(9, 2);
        let json = serde_json::to_string(&id).unwrap();
        let back: ThreadId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
