//! # Counting Semaphore
//!
//! The semaphore is the only blocking primitive of the kernel. Mutexes,
//! pipes, sockets and driver completion queues are all built on it.
//!
//! ## Semantics
//!
//! - **Counting**: a wait takes up to the requested number of units and
//!   returns how many it got. A `WaitAmount::Available` wait takes
//!   whatever is there without blocking.
//! - **Direct hand-off**: a thread that leaves units behind, or a signal,
//!   wakes the oldest waiter by setting its `give` flag. The woken waiter
//!   takes what it needs and passes the rest on. Waiters never race each
//!   other for the count, which keeps service in FIFO order.
//! - **Termination**: a terminated semaphore first drains normally. Once
//!   its count reaches zero it stays drained, and every wait returns 0
//!   immediately. This is how EOF propagates through pipes and sockets.
//! - **Timeouts and signals**: a blocking wait may give up at a deadline
//!   (`TimedOut`) or, when interruptible, as soon as the waiter has a
//!   deliverable signal (`Interrupted`). Either way it leaves the queue
//!   before returning.
//!
//! ## Locking
//!
//! The semaphore lock is taken first and the scheduler lock nested inside
//! it. Hint interrupts are sent only after both are released.

mod poll;
mod queue;

pub use poll::poll;
pub use queue::{WaitQueue, WaiterKey};

use crate::kernel::Kernel;
use crate::scheduler::WakeOutcome;
use crate::sync::{IrqGuard, IrqSpinLock};
use crate::thread::ThreadFlags;
use crate::timer::TimedEvent;
use core_types::ThreadId;
use kernel_api::{deadline_after, Duration, KernelError, WaitAmount, WaitFlags};

/// Units held by a semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Units(usize),
    /// Terminated and fully consumed
    Drained,
}

impl Level {
    /// Nonzero or drained: a wait would not block
    fn is_ready(&self) -> bool {
        *self != Level::Units(0)
    }
}

#[derive(Debug)]
struct SemState {
    level: Level,
    terminated: bool,
    queue: WaitQueue,
}

/// Counting semaphore with FIFO hand-off
#[derive(Debug)]
pub struct Semaphore {
    state: IrqSpinLock<SemState>,
}

type SemGuard<'a> = IrqGuard<'a, SemState>;

impl Semaphore {
    /// Creates a semaphore holding `count` units
    pub const fn new(count: usize) -> Self {
        Self {
            state: IrqSpinLock::new(SemState {
                level: Level::Units(count),
                terminated: false,
                queue: WaitQueue::new(),
            }),
        }
    }

    /// Creates a semaphore used as a mutex: one unit, taken with
    /// [`Semaphore::wait_one`]
    pub const fn mutex() -> Self {
        Self::new(1)
    }

    fn lock<'a>(&'a self, kernel: &'a Kernel) -> SemGuard<'a> {
        self.state.lock(kernel.irq())
    }

    /// Takes up to `amount` units, blocking while none are available
    ///
    /// Returns the number of units taken; 0 means the semaphore is
    /// terminated and drained. `Available` never blocks: it takes every
    /// unit present and fails with `WouldBlock` on an empty semaphore.
    /// Fails with `WouldBlock` when `nonblocking` is set (or for
    /// `AtMost(0)`), with `TimedOut` once `timeout` has
    /// elapsed, and with `Interrupted` when `interruptible` is set and a
    /// signal is ready.
    pub fn wait(
        &self,
        kernel: &Kernel,
        amount: WaitAmount,
        flags: WaitFlags,
        timeout: Option<Duration>,
    ) -> Result<usize, KernelError> {
        if amount == WaitAmount::AtMost(0) {
            return Err(KernelError::WouldBlock);
        }
        let deadline = deadline_after(kernel.now(), timeout);

        let mut sem = self.lock(kernel);
        let wanted = match (amount, sem.level) {
            (WaitAmount::AtMost(n), _) => n,
            (WaitAmount::Available, Level::Units(0)) => return Err(KernelError::WouldBlock),
            (WaitAmount::Available, Level::Units(n)) => n,
            (WaitAmount::Available, Level::Drained) => 0,
        };

        let mut requeue = false;
        while !sem.level.is_ready() {
            if flags.nonblocking {
                return Err(KernelError::WouldBlock);
            }
            let me = kernel.current_in(&kernel.lock_sched_nested(&sem));
            // A waiter that was handed units and lost them keeps its place.
            let key = if requeue {
                sem.queue.push_front(me)
            } else {
                sem.queue.push_back(me)
            };
            let timer = deadline.map(|deadline| kernel.lock_sched_nested(&sem).post_timer(deadline, me));

            loop {
                if sem.queue.is_given(key) {
                    break;
                }
                if let Some(deadline) = deadline {
                    if kernel.now() >= deadline {
                        sem.queue.leave(key);
                        cancel_timer(kernel, &sem, timer, me);
                        log::trace!("{me} timed out on semaphore");
                        return Err(KernelError::TimedOut);
                    }
                }
                {
                    let mut sched = kernel.lock_sched_nested(&sem);
                    if flags.interruptible && sched.has_ready_signal(me, kernel.platform().signals()) {
                        if let Some(thread) = sched.thread_mut(me) {
                            thread.flags.insert(ThreadFlags::INTERRUPTED_SYSCALL);
                        }
                        drop(sched);
                        sem.queue.leave(key);
                        cancel_timer(kernel, &sem, timer, me);
                        return Err(KernelError::Interrupted);
                    }
                    sched.wait_thread(me);
                }
                drop(sem);
                kernel.yield_now();
                sem = self.lock(kernel);
            }

            sem.queue.leave(key);
            cancel_timer(kernel, &sem, timer, me);
            requeue = true;
        }

        let taken = match sem.level {
            Level::Drained => 0,
            Level::Units(available) => {
                let taken = available.min(wanted);
                sem.level = Level::Units(available - taken);
                taken
            }
        };
        if sem.level == Level::Units(0) && sem.terminated {
            sem.level = Level::Drained;
        }
        let wake = hand_off(kernel, &mut sem);
        drop(sem);

        if let Some(outcome) = wake {
            kernel.deliver_wake(outcome);
        }
        Ok(taken)
    }

    /// Takes exactly one unit, blocking as long as needed
    ///
    /// For semaphores that are never terminated, such as mutexes.
    ///
    /// # Panics
    ///
    /// Panics if the wait returns anything but one unit.
    pub fn wait_one(&self, kernel: &Kernel) {
        match self.wait(kernel, WaitAmount::AtMost(1), WaitFlags::BLOCKING, None) {
            Ok(1) => {}
            other => panic!("wait_one on a semaphore returned {other:?}"),
        }
    }

    /// Adds `count` units and hands off to the oldest waiter
    ///
    /// # Panics
    ///
    /// Panics if the semaphore was terminated.
    pub fn signal(&self, kernel: &Kernel, count: usize) {
        if count == 0 {
            return;
        }
        let mut sem = self.lock(kernel);
        let available = match sem.level {
            Level::Units(available) if !sem.terminated => available,
            _ => panic!("signal on a terminated semaphore"),
        };
        sem.level = Level::Units(available + count);
        let wake = hand_off(kernel, &mut sem);
        drop(sem);

        if let Some(outcome) = wake {
            kernel.deliver_wake(outcome);
        }
    }

    /// Marks the semaphore terminated
    ///
    /// Remaining units can still be taken. Once none are left, every wait
    /// returns 0 without blocking and blocked waiters are released.
    ///
    /// # Panics
    ///
    /// Panics if the semaphore was already terminated.
    pub fn terminate(&self, kernel: &Kernel) {
        let mut sem = self.lock(kernel);
        assert!(!sem.terminated, "semaphore terminated twice");
        sem.terminated = true;
        let mut wake = None;
        if sem.level == Level::Units(0) {
            sem.level = Level::Drained;
            wake = hand_off(kernel, &mut sem);
        }
        drop(sem);

        if let Some(outcome) = wake {
            kernel.deliver_wake(outcome);
        }
    }

    /// Current count: units held, or -1 once terminated and drained
    pub fn count(&self, kernel: &Kernel) -> isize {
        match self.lock(kernel).level {
            Level::Units(units) => units as isize,
            Level::Drained => -1,
        }
    }

    pub fn is_terminated(&self, kernel: &Kernel) -> bool {
        self.lock(kernel).terminated
    }

    /// Number of threads blocked on the semaphore
    pub fn waiters(&self, kernel: &Kernel) -> usize {
        self.lock(kernel).queue.len()
    }

    /// Blocked threads, oldest first
    pub fn waiting_threads(&self, kernel: &Kernel) -> Vec<ThreadId> {
        self.lock(kernel).queue.threads()
    }
}

/// Wakes the oldest waiter if a wait would now succeed
///
/// Called with the semaphore lock held; the returned outcome is delivered
/// after it is released.
fn hand_off(kernel: &Kernel, sem: &mut SemGuard<'_>) -> Option<WakeOutcome> {
    if !sem.level.is_ready() {
        return None;
    }
    let next = sem.queue.hand_off_head()?;
    let mut sched = kernel.lock_sched_nested(sem);
    Some(kernel.signal_locked(&mut sched, next))
}

fn cancel_timer(kernel: &Kernel, sem: &SemGuard<'_>, timer: Option<TimedEvent>, me: ThreadId) {
    if let Some(timer) = timer {
        kernel.lock_sched_nested(sem).cancel_timer(timer, me);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::test_support::TestPlatform;
    use std::sync::Arc;

    fn kernel() -> Arc<Kernel> {
        let platform = Arc::new(TestPlatform::new(1));
        Kernel::new(platform, KernelConfig::default()).unwrap()
    }

    #[test]
    fn test_takes_at_most_requested() {
        let kernel = kernel();
        let sem = Semaphore::new(5);
        assert_eq!(sem.wait(&kernel, WaitAmount::AtMost(3), WaitFlags::BLOCKING, None), Ok(3));
        assert_eq!(sem.count(&kernel), 2);
        assert_eq!(sem.wait(&kernel, WaitAmount::AtMost(9), WaitFlags::BLOCKING, None), Ok(2));
        assert_eq!(sem.count(&kernel), 0);
    }

    #[test]
    fn test_zero_request_would_block() {
        let kernel = kernel();
        let sem = Semaphore::new(5);
        assert_eq!(
            sem.wait(&kernel, WaitAmount::AtMost(0), WaitFlags::BLOCKING, None),
            Err(KernelError::WouldBlock)
        );
        assert_eq!(sem.count(&kernel), 5);
    }

    #[test]
    fn test_available_takes_everything() {
        let kernel = kernel();
        let sem = Semaphore::new(4);
        assert_eq!(sem.wait(&kernel, WaitAmount::Available, WaitFlags::BLOCKING, None), Ok(4));
        assert_eq!(
            sem.wait(&kernel, WaitAmount::Available, WaitFlags::BLOCKING, None),
            Err(KernelError::WouldBlock)
        );
    }

    #[test]
    fn test_nonblocking_on_empty() {
        let kernel = kernel();
        let sem = Semaphore::new(0);
        assert_eq!(
            sem.wait(&kernel, WaitAmount::AtMost(1), WaitFlags::NONBLOCKING, None),
            Err(KernelError::WouldBlock)
        );
        assert_eq!(sem.waiters(&kernel), 0);
    }

    #[test]
    fn test_signal_accumulates() {
        let kernel = kernel();
        let sem = Semaphore::new(0);
        sem.signal(&kernel, 2);
        sem.signal(&kernel, 0);
        sem.signal(&kernel, 3);
        assert_eq!(sem.count(&kernel), 5);
    }

    #[test]
    fn test_mutex_round_trip() {
        let kernel = kernel();
        let mutex = Semaphore::mutex();
        mutex.wait_one(&kernel);
        assert_eq!(mutex.count(&kernel), 0);
        mutex.signal(&kernel, 1);
        assert_eq!(mutex.count(&kernel), 1);
    }

    #[test]
    fn test_terminate_drains_then_returns_zero() {
        let kernel = kernel();
        let sem = Semaphore::new(2);
        sem.terminate(&kernel);
        assert!(sem.is_terminated(&kernel));
        assert_eq!(sem.count(&kernel), 2);

        assert_eq!(sem.wait(&kernel, WaitAmount::AtMost(1), WaitFlags::BLOCKING, None), Ok(1));
        assert_eq!(sem.wait(&kernel, WaitAmount::AtMost(5), WaitFlags::BLOCKING, None), Ok(1));
        assert_eq!(sem.count(&kernel), -1);

        for _ in 0..3 {
            assert_eq!(sem.wait(&kernel, WaitAmount::AtMost(1), WaitFlags::NONBLOCKING, None), Ok(0));
        }
        assert_eq!(sem.wait(&kernel, WaitAmount::Available, WaitFlags::BLOCKING, None), Ok(0));
    }

    #[test]
    fn test_terminate_empty_is_drained() {
        let kernel = kernel();
        let sem = Semaphore::new(0);
        sem.terminate(&kernel);
        assert_eq!(sem.count(&kernel), -1);
        assert_eq!(sem.wait(&kernel, WaitAmount::AtMost(1), WaitFlags::BLOCKING, None), Ok(0));
    }

    #[test]
    #[should_panic(expected = "terminated twice")]
    fn test_double_terminate_panics() {
        let kernel = kernel();
        let sem = Semaphore::new(0);
        sem.terminate(&kernel);
        sem.terminate(&kernel);
    }

    #[test]
    #[should_panic(expected = "signal on a terminated semaphore")]
    fn test_signal_after_terminate_panics() {
        let kernel = kernel();
        let sem = Semaphore::new(1);
        sem.terminate(&kernel);
        sem.signal(&kernel, 1);
    }

    #[test]
    #[should_panic(expected = "wait_one")]
    fn test_wait_one_on_drained_panics() {
        let kernel = kernel();
        let sem = Semaphore::new(0);
        sem.terminate(&kernel);
        sem.wait_one(&kernel);
    }
}
