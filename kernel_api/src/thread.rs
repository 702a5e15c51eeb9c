//! Thread creation parameters

use core_types::{CpuId, Pid};
use serde::{Deserialize, Serialize};

/// What a new thread belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadKind {
    /// Kernel-only thread (pid 0), joined by its creator
    Kernel,
    /// First thread of a new user process, reaped by its parent
    ///
    /// The process joins `pgid`, or the parent's group when `None`.
    Process { pgid: Option<Pid> },
}

/// Which CPUs may run a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Affinity {
    /// Any CPU
    Any,
    /// Only the given CPU
    Cpu(CpuId),
}

impl Affinity {
    /// Returns true if `cpu` may run the thread
    pub fn allows(&self, cpu: CpuId) -> bool {
        match self {
            Affinity::Any => true,
            Affinity::Cpu(pinned) => *pinned == cpu,
        }
    }
}

/// Descriptor for creating a new thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadParams {
    /// Human-readable name for debugging
    pub name: String,
    /// Stack size in bytes; the kernel default when `None`
    pub stack_size: Option<usize>,
    /// Kernel thread or new process
    pub kind: ThreadKind,
    /// CPUs allowed to run the thread
    pub affinity: Affinity,
    /// Create the thread in the waiting state
    pub start_waiting: bool,
    /// Refuse signals from the parent other than SIGINT
    pub rebel: bool,
}

impl ThreadParams {
    /// Creates parameters for a kernel thread
    pub fn kernel(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: None,
            kind: ThreadKind::Kernel,
            affinity: Affinity::Any,
            start_waiting: false,
            rebel: false,
        }
    }

    /// Creates parameters for the first thread of a new process
    pub fn process(name: impl Into<String>) -> Self {
        Self {
            kind: ThreadKind::Process { pgid: None },
            ..Self::kernel(name)
        }
    }

    /// Places the new process in process group `pgid`
    pub fn with_pgid(mut self, pgid: Pid) -> Self {
        self.kind = ThreadKind::Process { pgid: Some(pgid) };
        self
    }

    /// Sets the stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Pins the thread to one CPU
    pub fn with_affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Creates the thread waiting; it runs after its first wake-up
    pub fn start_waiting(mut self) -> Self {
        self.start_waiting = true;
        self
    }

    /// Marks the process as a rebel
    pub fn rebel(mut self) -> Self {
        self.rebel = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_params() {
        let params = ThreadParams::kernel("worker");
        assert_eq!(params.name, "worker");
        assert_eq!(params.kind, ThreadKind::Kernel);
        assert!(!params.start_waiting);
    }

    #[test]
    fn test_process_params_builder() {
        let params = ThreadParams::process("sh")
            .with_pgid(Pid(4))
            .with_stack_size(8192)
            .with_affinity(Affinity::Cpu(CpuId(1)))
            .rebel();
        assert_eq!(params.kind, ThreadKind::Process { pgid: Some(Pid(4)) });
        assert_eq!(params.stack_size, Some(8192));
        assert!(params.rebel);
    }

    #[test]
    fn test_affinity() {
        assert!(Affinity::Any.allows(CpuId(3)));
        assert!(Affinity::Cpu(CpuId(1)).allows(CpuId(1)));
        assert!(!Affinity::Cpu(CpuId(1)).allows(CpuId(0)));
    }
}
