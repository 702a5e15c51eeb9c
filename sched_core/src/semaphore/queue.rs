//! FIFO of blocked waiters
//!
//! Nodes live in a slot arena owned by the semaphore, not on the waiters'
//! stacks. A waiter holds a [`WaiterKey`]; the generation in the key
//! catches use of a node after it was released.
//!
//! A node is in one of three states: linked (waiting), handed off
//! (unlinked with `give` set, waiting for its owner to notice), or free.
//! Only the owner releases a node, through [`WaitQueue::leave`].

use core_types::ThreadId;

/// Handle to a waiter's node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterKey {
    slot: u32,
    generation: u32,
}

#[derive(Debug)]
struct Node {
    thread: ThreadId,
    give: bool,
    linked: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Doubly linked FIFO of waiter nodes
#[derive(Debug)]
pub struct WaitQueue {
    slots: Vec<Slot>,
    free: Vec<usize>,
    first: Option<usize>,
    last: Option<usize>,
    len: usize,
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            first: None,
            last: None,
            len: 0,
        }
    }

    /// Number of linked waiters
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a waiter at the tail
    pub fn push_back(&mut self, thread: ThreadId) -> WaiterKey {
        let index = self.allocate(thread);
        self.link_after(index, self.last);
        self.key(index)
    }

    /// Inserts a waiter at the head
    pub fn push_front(&mut self, thread: ThreadId) -> WaiterKey {
        let index = self.allocate(thread);
        self.link_after(index, None);
        self.key(index)
    }

    /// Unlinks the head, marks it handed off, and returns its thread
    pub fn hand_off_head(&mut self) -> Option<ThreadId> {
        let index = self.first?;
        self.unlink(index);
        let node = self.node_at_mut(index);
        node.give = true;
        Some(node.thread)
    }

    /// Returns true if the node was handed off
    pub fn is_given(&self, key: WaiterKey) -> bool {
        self.node(key).give
    }

    /// Releases a node, unlinking it if still queued
    ///
    /// Returns whether it had been handed off; a caller that did not use
    /// the hand-off must pass it on.
    pub fn leave(&mut self, key: WaiterKey) -> bool {
        let index = self.node_index(key);
        if self.node_at_mut(index).linked {
            self.unlink(index);
        }
        let slot = &mut self.slots[index];
        let node = slot.node.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        node.map_or(false, |node| node.give)
    }

    /// Threads of linked waiters, head first
    pub fn threads(&self) -> Vec<ThreadId> {
        let mut threads = Vec::with_capacity(self.len);
        let mut cursor = self.first;
        while let Some(index) = cursor {
            let node = self.node_at(index);
            threads.push(node.thread);
            cursor = node.next;
        }
        threads
    }

    fn allocate(&mut self, thread: ThreadId) -> usize {
        let node = Node {
            thread,
            give: false,
            linked: false,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                self.slots.len() - 1
            }
        }
    }

    fn key(&self, index: usize) -> WaiterKey {
        WaiterKey {
            slot: index as u32,
            generation: self.slots[index].generation,
        }
    }

    fn node_index(&self, key: WaiterKey) -> usize {
        let index = key.slot as usize;
        match self.slots.get(index) {
            Some(slot) if slot.generation == key.generation && slot.node.is_some() => index,
            _ => panic!("waiter {key:?} is not in the queue"),
        }
    }

    fn node(&self, key: WaiterKey) -> &Node {
        self.node_at(self.node_index(key))
    }

    fn node_at(&self, index: usize) -> &Node {
        match &self.slots[index].node {
            Some(node) => node,
            None => panic!("wait queue links to free slot {index}"),
        }
    }

    fn node_at_mut(&mut self, index: usize) -> &mut Node {
        match &mut self.slots[index].node {
            Some(node) => node,
            None => panic!("wait queue links to free slot {index}"),
        }
    }

    /// Links `index` after `prev`, or at the head when `prev` is `None`
    fn link_after(&mut self, index: usize, prev: Option<usize>) {
        let next = match prev {
            Some(prev) => self.node_at(prev).next,
            None => self.first,
        };
        {
            let node = self.node_at_mut(index);
            node.prev = prev;
            node.next = next;
            node.linked = true;
        }
        match prev {
            Some(prev) => self.node_at_mut(prev).next = Some(index),
            None => self.first = Some(index),
        }
        match next {
            Some(next) => self.node_at_mut(next).prev = Some(index),
            None => self.last = Some(index),
        }
        self.len += 1;
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let node = self.node_at_mut(index);
            assert!(node.linked, "unlinking a waiter that is not queued");
            node.linked = false;
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(prev) => self.node_at_mut(prev).next = next,
            None => self.first = next,
        }
        match next {
            Some(next) => self.node_at_mut(next).prev = prev,
            None => self.last = prev,
        }
        self.len -= 1;
    }
}
