//! Stack allocation collaborator

use crate::KernelError;

/// A zeroed block of memory used as a thread stack
#[derive(Debug)]
pub struct StackBlock {
    memory: Box<[u8]>,
}

impl StackBlock {
    /// Allocates a zeroed block of `size` bytes from the global heap
    pub fn zeroed(size: usize) -> Self {
        Self {
            memory: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Returns the size in bytes
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Returns the initial stack pointer: the 16-byte aligned top of the block
    pub fn top(&self) -> usize {
        let end = self.memory.as_ptr() as usize + self.memory.len();
        end & !0xF
    }

    /// Returns true if no byte of the block has been written
    pub fn is_zeroed(&self) -> bool {
        self.memory.iter().all(|byte| *byte == 0)
    }
}

/// Source of thread stacks
///
/// Exhaustion is reported to the caller as `OutOfMemory`; it is never fatal
/// to the core.
pub trait StackAllocator: Send + Sync {
    /// Produces a zeroed block of at least `size` bytes
    fn allocate(&self, size: usize) -> Result<StackBlock, KernelError>;

    /// Returns a block produced by [`StackAllocator::allocate`]
    fn release(&self, block: StackBlock);
}
