//! Interrupt-safe spinlock
//!
//! Every lock in the core is taken with interrupts disabled on the local
//! CPU, so a timer interrupt can never try to re-acquire a lock its own CPU
//! already holds. The previous interrupt state is saved in the guard and
//! restored only after the lock itself has been released.
//!
//! Nesting is explicit: a second lock is taken through
//! [`IrqSpinLock::lock_nested`], which borrows the outer guard. The borrow
//! checker then forbids releasing the outer lock first, and the nested
//! guard never touches the interrupt flag.

use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use hal::InterruptHal;
use spin::{Mutex, MutexGuard};

/// A spinlock that disables interrupts for as long as it is held
pub struct IrqSpinLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSpinLock<T> {
    /// Creates an unlocked lock
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Disables interrupts, then spins until the lock is acquired
    pub fn lock<'a>(&'a self, irq: &'a dyn InterruptHal) -> IrqGuard<'a, T> {
        let was_enabled = irq.save_and_disable();
        let guard = self.inner.lock();
        IrqGuard {
            guard: ManuallyDrop::new(guard),
            irq,
            was_enabled,
        }
    }

    /// Acquires the lock while `outer` is held
    ///
    /// Interrupts are already disabled by `outer`. The returned guard
    /// borrows `outer`, so it must be dropped first.
    pub fn lock_nested<'a, U>(&'a self, _outer: &'a IrqGuard<'_, U>) -> NestedGuard<'a, T> {
        NestedGuard {
            guard: self.inner.lock(),
        }
    }

    /// Returns true if some CPU currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T: fmt::Debug> fmt::Debug for IrqSpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Some(guard) => f.debug_struct("IrqSpinLock").field("data", &*guard).finish(),
            None => f.write_str("IrqSpinLock { <locked> }"),
        }
    }
}

/// Outermost guard: releases the lock, then restores the interrupt state
pub struct IrqGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    irq: &'a dyn InterruptHal,
    was_enabled: bool,
}

impl<T> IrqGuard<'_, T> {
    /// Interrupt state saved when the lock was taken
    pub fn interrupts_were_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl<T> Deref for IrqGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the guard is dropped exactly once, here, and never used after.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.irq.restore(self.was_enabled);
    }
}

/// Inner guard of a nested acquisition
pub struct NestedGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for NestedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for NestedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
