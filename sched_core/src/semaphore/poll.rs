//! Readiness polling over several semaphores
//!
//! A semaphore is ready when a wait on it would not block: it holds units
//! or is drained. Polling never consumes units. A poller blocks by joining
//! every not-ready semaphore's queue like an ordinary waiter, and wakes
//! when any of them hands off to it. On the way out it leaves every queue,
//! and a hand-off it received is passed on to the next waiter so no unit
//! is stranded.
//!
//! Semaphores are locked one at a time, never all together.

use super::{hand_off, Semaphore, WaiterKey};
use crate::kernel::Kernel;
use crate::thread::ThreadFlags;
use kernel_api::{deadline_after, Duration, KernelError, WaitFlags};

/// Waits until at least one of `semaphores` is ready
///
/// For every ready entry `i`, bit `i % 8` of `ready[i / 8]` is set. Bits
/// are only ever set, so a caller can pre-mark entries it tracks itself.
/// `None` entries are skipped. Returns the number of ready entries: 0 when
/// `nonblocking` is set and none is ready, or when `timeout` elapses.
/// Fails with `Interrupted` when `interruptible` is set and a signal is
/// ready.
///
/// # Panics
///
/// Panics if `ready` has fewer bits than there are semaphores.
pub fn poll(
    kernel: &Kernel,
    semaphores: &[Option<&Semaphore>],
    ready: &mut [u8],
    flags: WaitFlags,
    timeout: Option<Duration>,
) -> Result<usize, KernelError> {
    assert!(
        ready.len() * 8 >= semaphores.len(),
        "poll bitmap holds {} bits for {} semaphores",
        ready.len() * 8,
        semaphores.len()
    );
    let deadline = deadline_after(kernel.now(), timeout);
    let me = if flags.nonblocking {
        None
    } else {
        let sched = kernel.lock_sched();
        Some(kernel.current_in(&sched))
    };

    let mut count = 0;
    let mut counted = vec![false; semaphores.len()];
    let mut keys: Vec<Option<WaiterKey>> = vec![None; semaphores.len()];

    for (index, sem) in semaphores.iter().enumerate() {
        let Some(sem) = sem else { continue };
        let mut state = sem.lock(kernel);
        if state.level.is_ready() {
            mark(ready, index);
            counted[index] = true;
            count += 1;
        } else if count == 0 {
            if let Some(me) = me {
                keys[index] = Some(state.queue.push_back(me));
            }
        }
    }

    let mut result = Ok(());
    if let Some(me) = me.filter(|_| count == 0) {
        let timer = deadline.map(|deadline| kernel.lock_sched().post_timer(deadline, me));
        result = loop {
            for (index, key) in keys.iter().enumerate() {
                let (Some(sem), Some(key)) = (semaphores[index], key) else {
                    continue;
                };
                if sem.lock(kernel).queue.is_given(*key) {
                    mark(ready, index);
                    counted[index] = true;
                    count += 1;
                }
            }
            if count > 0 {
                break Ok(());
            }

            let mut sched = kernel.lock_sched();
            if deadline.map_or(false, |deadline| sched.now() >= deadline) {
                break Ok(());
            }
            if flags.interruptible && sched.has_ready_signal(me, kernel.platform().signals()) {
                if let Some(thread) = sched.thread_mut(me) {
                    thread.flags.insert(ThreadFlags::INTERRUPTED_SYSCALL);
                }
                break Err(KernelError::Interrupted);
            }
            sched.wait_thread(me);
            drop(sched);
            kernel.yield_now();
        };
        if let Some(timer) = timer {
            kernel.lock_sched().cancel_timer(timer, me);
        }
    }

    let mut wakes = Vec::new();
    for (index, key) in keys.into_iter().enumerate() {
        let (Some(sem), Some(key)) = (semaphores[index], key) else {
            continue;
        };
        let mut state = sem.lock(kernel);
        if state.queue.leave(key) {
            if result.is_ok() && !counted[index] {
                mark(ready, index);
                count += 1;
            }
            wakes.extend(hand_off(kernel, &mut state));
        }
    }
    for outcome in wakes {
        kernel.deliver_wake(outcome);
    }

    result.map(|()| count)
}

fn mark(ready: &mut [u8], index: usize) {
    ready[index / 8] |= 1 << (index % 8);
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
    fn test_nonblocking_none_ready() {
        let kernel = kernel();
        let a = Semaphore::new(0);
        let b = Semaphore::new(0);
        let mut ready = [0u8; 1];

        let result = poll(&kernel, &[Some(&a), Some(&b)], &mut ready, WaitFlags::NONBLOCKING, None);
        assert_eq!(result, Ok(0));
        assert_eq!(ready, [0]);
        assert_eq!(a.waiters(&kernel), 0);
        assert_eq!(b.waiters(&kernel), 0);
    }

    #[test]
    fn test_reports_ready_and_drained() {
        let kernel = kernel();
        let empty = Semaphore::new(0);
        let full = Semaphore::new(3);
        let closed = Semaphore::new(0);
        closed.terminate(&kernel);
        let mut ready = [0b0000_0001u8];

        let result = poll(
            &kernel,
            &[Some(&empty), None, Some(&full), Some(&closed)],
            &mut ready,
            WaitFlags::NONBLOCKING,
            None,
        );
        assert_eq!(result, Ok(2));
        // Bit 0 was set by the caller and is left alone.
        assert_eq!(ready, [0b0000_1101]);
        assert_eq!(full.count(&kernel), 3);
    }

    #[test]
    fn test_blocking_poll_returns_at_once_when_ready() {
        let kernel = kernel();
        let empty = Semaphore::new(0);
        let full = Semaphore::new(1);
        let mut ready = [0u8; 1];

        let result = poll(
            &kernel,
            &[Some(&full), Some(&empty)],
            &mut ready,
            WaitFlags::BLOCKING,
            None,
        );
        assert_eq!(result, Ok(1));
        assert_eq!(ready, [0b01]);
        assert_eq!(empty.waiters(&kernel), 0);
    }

    #[test]
    fn test_bitmap_spans_bytes() {
        let kernel = kernel();
        let sems: Vec<Semaphore> = (0..10).map(|i| Semaphore::new(i % 2)).collect();
        let refs: Vec<Option<&Semaphore>> = sems.iter().map(Some).collect();
        let mut ready = [0u8; 2];

        assert_eq!(poll(&kernel, &refs, &mut ready, WaitFlags::NONBLOCKING, None), Ok(5));
        assert_eq!(ready, [0b1010_1010, 0b0000_0010]);
    }

    #[test]
    #[should_panic(expected = "poll bitmap")]
    fn test_short_bitmap_panics() {
        let kernel = kernel();
        let sems: Vec<Semaphore> = (0..9).map(|_| Semaphore::new(0)).collect();
        let refs: Vec<Option<&Semaphore>> = sems.iter().map(Some).collect();
        let mut ready = [0u8; 1];
        let _ = poll(&kernel, &refs, &mut ready, WaitFlags::NONBLOCKING, None);
    }
}
