//! Idle-connection timers.
//!
//! [`TimerHeap`] is an array-backed binary min-heap keyed by `(deadline, sequence)`.
//! The sequence number is taken on every add and refresh, so entries with equal
//! deadlines expire in the order they were (re)scheduled. An `fd -> slot` index
//! keeps `refresh` and `remove` at O(log n).

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::error::TimerError;

#[derive(Debug)]
struct Entry<T> {
    fd: RawFd,
    deadline: Instant,
    seq: u64,
    action: T,
}

impl<T> Entry<T> {
    fn key(&self) -> (Instant, u64) {
        (self.deadline, self.seq)
    }
}

/// A min-heap of per-descriptor deadlines, each carrying an expiry action `T`.
#[derive(Debug)]
pub struct TimerHeap<T> {
    heap: Vec<Entry<T>>,
    index: HashMap<RawFd, usize>,
    next_seq: u64,
}

impl<T> Default for TimerHeap<T> {
    fn default() -> Self {
        Self { heap: Vec::new(), index: HashMap::new(), next_seq: 0 }
    }
}

impl<T> TimerHeap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { heap: Vec::with_capacity(capacity), index: HashMap::with_capacity(capacity), next_seq: 0 }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.index.contains_key(&fd)
    }

    /// Schedules `fd` to expire `timeout` from now.
    pub fn add(&mut self, fd: RawFd, timeout: Duration, action: T) {
        self.add_at(fd, Instant::now() + timeout, action);
    }

    /// Schedules `fd` to expire at `deadline`.
    ///
    /// A descriptor has at most one entry: scheduling it again replaces the
    /// previous deadline and action.
    pub fn add_at(&mut self, fd: RawFd, deadline: Instant, action: T) {
        let seq = self.take_seq();
        if let Some(&slot) = self.index.get(&fd) {
            let entry = &mut self.heap[slot];
            entry.deadline = deadline;
            entry.seq = seq;
            entry.action = action;
            self.restore(slot);
            return;
        }

        let slot = self.heap.len();
        self.heap.push(Entry { fd, deadline, seq, action });
        self.index.insert(fd, slot);
        self.sift_up(slot);
    }

    /// Moves the deadline of `fd` to `timeout` from now.
    pub fn refresh(&mut self, fd: RawFd, timeout: Duration) -> Result<(), TimerError> {
        self.refresh_at(fd, Instant::now() + timeout)
    }

    pub fn refresh_at(&mut self, fd: RawFd, deadline: Instant) -> Result<(), TimerError> {
        let Some(&slot) = self.index.get(&fd) else {
            return Err(TimerError::NotFound { fd });
        };

        let seq = self.take_seq();
        let entry = &mut self.heap[slot];
        entry.deadline = deadline;
        entry.seq = seq;
        self.restore(slot);
        Ok(())
    }

    /// Removes the entry of `fd`, returning its action. Removing twice is a no-op.
    pub fn remove(&mut self, fd: RawFd) -> Option<T> {
        let slot = self.index.get(&fd).copied()?;
        Some(self.remove_slot(slot).action)
    }

    /// The earliest deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.first().map(|entry| entry.deadline)
    }

    /// How long until the earliest deadline, zero if it already passed.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.next_deadline().map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Pops every entry whose deadline is at or before `now`, in expiry order,
    /// and hands it to `on_expire`. Returns how many entries expired.
    pub fn expire_due<F>(&mut self, now: Instant, mut on_expire: F) -> usize
    where
        F: FnMut(RawFd, T),
    {
        let mut expired = 0;
        while self.heap.first().is_some_and(|entry| entry.deadline <= now) {
            let entry = self.remove_slot(0);
            on_expire(entry.fd, entry.action);
            expired += 1;
        }
        expired
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn remove_slot(&mut self, slot: usize) -> Entry<T> {
        let entry = self.heap.swap_remove(slot);
        self.index.remove(&entry.fd);
        if slot < self.heap.len() {
            self.index.insert(self.heap[slot].fd, slot);
            self.restore(slot);
        }
        entry
    }

    fn restore(&mut self, slot: usize) {
        let slot = self.sift_up(slot);
        self.sift_down(slot);
    }

    fn sift_up(&mut self, mut slot: usize) -> usize {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.heap[slot].key() >= self.heap[parent].key() {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
        slot
    }

    fn sift_down(&mut self, mut slot: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * slot + 1;
            let right = left + 1;
            let mut smallest = slot;

            if left < len && self.heap[left].key() < self.heap[smallest].key() {
                smallest = left;
            }
            if right < len && self.heap[right].key() < self.heap[smallest].key() {
                smallest = right;
            }
            if smallest == slot {
                return;
            }
            self.swap(slot, smallest);
            slot = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].fd, a);
        self.index.insert(self.heap[b].fd, b);
    }
}
