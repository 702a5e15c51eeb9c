//! Deterministic fault injection for stack allocation
//!
//! Thread creation is the only fallible resource path in the core, so the
//! simulated allocator is where faults are planted.
//!
//! ## Design Philosophy
//!
//! - **Deterministic**: Faults fire on exact counts and byte totals
//! - **Composable**: Several faults can be active at once
//! - **Test-focused**: Not intended for production use
//!
//! ## Example
//!
//! ```
//! use sim_kernel::fault_injection::{AllocationFault, FaultPlan};
//!
//! let plan = FaultPlan::new()
//!     .with_allocation_fault(AllocationFault::FailNext { count: 1 })
//!     .with_allocation_fault(AllocationFault::Budget { bytes: 64 * 1024 });
//! assert_eq!(plan.allocation_faults().len(), 2);
//! ```

use kernel_api::{KernelError, StackAllocator, StackBlock};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// A fault to inject into stack allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationFault {
    /// Fail the next N allocations
    FailNext { count: usize },

    /// Fail any allocation that would push live stacks above `bytes`
    Budget { bytes: usize },

    /// Fail any single request larger than `size`
    FailAbove { size: usize },
}

/// A plan describing all faults to inject
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    allocation_faults: Vec<AllocationFault>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allocation_fault(mut self, fault: AllocationFault) -> Self {
        self.allocation_faults.push(fault);
        self
    }

    pub fn allocation_faults(&self) -> &[AllocationFault] {
        &self.allocation_faults
    }

    pub fn is_empty(&self) -> bool {
        self.allocation_faults.is_empty()
    }
}

/// Counters kept by [`SimAllocator`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorStats {
    pub allocations: usize,
    pub releases: usize,
    pub failures: usize,
    pub bytes_in_use: usize,
}

#[derive(Debug, Default)]
struct AllocatorState {
    fail_next: usize,
    budget: Option<usize>,
    max_request: Option<usize>,
    stats: AllocatorStats,
}

impl AllocatorState {
    fn apply(&mut self, fault: AllocationFault) {
        match fault {
            AllocationFault::FailNext { count } => self.fail_next += count,
            AllocationFault::Budget { bytes } => self.budget = Some(bytes),
            AllocationFault::FailAbove { size } => self.max_request = Some(size),
        }
    }

    fn should_fail(&mut self, size: usize) -> bool {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return true;
        }
        if self.max_request.map_or(false, |max| size > max) {
            return true;
        }
        self.budget
            .map_or(false, |budget| self.stats.bytes_in_use + size > budget)
    }
}

/// Heap-backed stack allocator with planted faults
#[derive(Debug, Default)]
pub struct SimAllocator {
    state: Mutex<AllocatorState>,
}

impl SimAllocator {
    pub fn new(plan: &FaultPlan) -> Self {
        let mut state = AllocatorState::default();
        for fault in plan.allocation_faults() {
            state.apply(*fault);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Plants another fault while the machine is running
    pub fn inject(&self, fault: AllocationFault) {
        self.lock().apply(fault);
    }

    pub fn stats(&self) -> AllocatorStats {
        self.lock().stats
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StackAllocator for SimAllocator {
    fn allocate(&self, size: usize) -> Result<StackBlock, KernelError> {
        let mut state = self.lock();
        if state.should_fail(size) {
            state.stats.failures += 1;
            log::debug!("injected stack allocation failure ({size} bytes)");
            return Err(KernelError::OutOfMemory { requested: size });
        }
        state.stats.allocations += 1;
        state.stats.bytes_in_use += size;
        Ok(StackBlock::zeroed(size))
    }

    fn release(&self, block: StackBlock) {
        let mut state = self.lock();
        state.stats.releases += 1;
        state.stats.bytes_in_use = state.stats.bytes_in_use.saturating_sub(block.size());
    }
}
