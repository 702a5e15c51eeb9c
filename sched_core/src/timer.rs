//! Timed events
//!
//! A timed event wakes one thread when the clock reaches its deadline. The
//! queue is ordered by deadline and then by posting order, so events with
//! equal deadlines fire in the order they were posted.
//!
//! Firing an event only makes the thread runnable. The woken thread reads
//! the clock itself to decide whether its wait timed out, so a late or
//! spurious wake-up is never mistaken for expiry.

use core_types::ThreadId;
use kernel_api::Instant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a posted event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(u64);

/// Handle returned by [`TimerQueue::post`], used to cancel the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub id: TimerId,
    pub deadline: Instant,
}

/// Deadline-ordered set of pending events
#[derive(Debug, Default)]
pub struct TimerQueue {
    events: BTreeMap<(Instant, TimerId), ThreadId>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a wake-up of `thread` at `deadline`
    pub fn post(&mut self, deadline: Instant, thread: ThreadId) -> TimedEvent {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.events.insert((deadline, id), thread);
        TimedEvent { id, deadline }
    }

    /// Removes an event; returns false if it already fired
    pub fn cancel(&mut self, event: TimedEvent) -> bool {
        self.events.remove(&(event.deadline, event.id)).is_some()
    }

    /// Removes every event owned by `thread`; returns how many there were
    pub fn cancel_thread(&mut self, thread: ThreadId) -> usize {
        let before = self.events.len();
        self.events.retain(|_, owner| *owner != thread);
        before - self.events.len()
    }

    /// Removes and returns the threads of every event due at `now`
    pub fn expire(&mut self, now: Instant) -> Vec<ThreadId> {
        let mut due = Vec::new();
        while let Some(entry) = self.events.first_entry() {
            if entry.key().0 > now {
                break;
            }
            due.push(entry.remove());
        }
        due
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.events.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_nanos(ms * 1_000_000)
    }

    #[test]
    fn test_expire_in_deadline_order() {
        let mut queue = TimerQueue::new();
        queue.post(at(30), ThreadId::new(3, 0));
        queue.post(at(10), ThreadId::new(1, 0));
        queue.post(at(20), ThreadId::new(2, 0));

        assert_eq!(queue.next_deadline(), Some(at(10)));
        assert!(queue.expire(at(5)).is_empty());
        assert_eq!(
            queue.expire(at(20)),
            vec![ThreadId::new(1, 0), ThreadId::new(2, 0)]
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_equal_deadlines_fire_in_post_order() {
        let mut queue = TimerQueue::new();
        for index in 0..4 {
            queue.post(at(7), ThreadId::new(index, 0));
        }
        let fired = queue.expire(at(7));
        let order: Vec<usize> = fired.iter().map(|id| id.index()).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_cancel() {
        let mut queue = TimerQueue::new();
        let kept = queue.post(at(10), ThreadId::new(1, 0));
        let cancelled = queue.post(at(10), ThreadId::new(2, 0));

        assert!(queue.cancel(cancelled));
        assert!(!queue.cancel(cancelled));
        assert_eq!(queue.expire(at(10)), vec![ThreadId::new(1, 0)]);
        assert!(!queue.cancel(kept));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cancel_thread() {
        let mut queue = TimerQueue::new();
        let gone = ThreadId::new(1, 0);
        queue.post(at(10), gone);
        queue.post(at(20), ThreadId::new(2, 0));
        queue.post(at(30), gone);

        assert_eq!(queue.cancel_thread(gone), 2);
        assert_eq!(queue.cancel_thread(gone), 0);
        assert_eq!(queue.next_deadline(), Some(at(20)));
        assert_eq!(queue.expire(at(30)), vec![ThreadId::new(2, 0)]);
    }
}
