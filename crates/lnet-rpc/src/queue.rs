//! High-priority / normal dual request queue (§4.6 "Thread scheduling").
//!
//! Grounded on `gvthread_runtime::ready_queue::simple::GlobalQueue`:
//! `Mutex<VecDeque> + Condvar`, a parked-count gate on the wake call.
//! Generalized from one priority-less queue to an HP/normal pair
//! drained at a fixed ratio instead of round-robin over one list.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Instant;

/// HP items are drained ahead of normal ones at this ratio before a
/// normal item is taken, unless one side runs dry first.
pub const HPREQ_RATIO: u32 = 10;

struct Inner<T> {
    hp: VecDeque<T>,
    normal: VecDeque<T>,
}

/// Dual FIFO queue used as both the service's in-queue and its
/// processing queue: `push` tags each item high-priority or not, `pop`
/// blocks until one is available or the queue is closed for shutdown.
pub struct DualQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
    parked: AtomicUsize,
    since_normal: AtomicU32,
    closed: Mutex<bool>,
}

impl<T> DualQueue<T> {
    pub fn new() -> Self {
        DualQueue {
            inner: Mutex::new(Inner { hp: VecDeque::new(), normal: VecDeque::new() }),
            cond: Condvar::new(),
            parked: AtomicUsize::new(0),
            since_normal: AtomicU32::new(0),
            closed: Mutex::new(false),
        }
    }

    pub fn push(&self, item: T, hp: bool) {
        {
            let mut inner = self.inner.lock().unwrap();
            if hp {
                inner.hp.push_back(item);
            } else {
                inner.normal.push_back(item);
            }
        }
        if self.parked.load(Ordering::Relaxed) > 0 {
            self.cond.notify_one();
        }
    }

    /// Blocks until an item is available under the HPREQ_RATIO drain
    /// policy, or the queue is closed (in which case it drains whatever
    /// remains before finally returning `None`).
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = self.try_take(&mut inner) {
                return Some(item);
            }
            if *self.closed.lock().unwrap() {
                return None;
            }
            self.parked.fetch_add(1, Ordering::Relaxed);
            inner = self.cond.wait(inner).unwrap();
            self.parked.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn try_take(&self, inner: &mut Inner<T>) -> Option<T> {
        let since = self.since_normal.load(Ordering::Relaxed);
        if !inner.hp.is_empty() && (since < HPREQ_RATIO || inner.normal.is_empty()) {
            self.since_normal.store(since + 1, Ordering::Relaxed);
            return inner.hp.pop_front();
        }
        if let Some(item) = inner.normal.pop_front() {
            self.since_normal.store(0, Ordering::Relaxed);
            return Some(item);
        }
        inner.hp.pop_front()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.hp.len() + inner.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The arrival time (per `key`) of each queue's current head, HP
    /// first. Used by the health check, which treats the two queues as
    /// independent watchdog subjects rather than merging them into one
    /// chronological order.
    pub fn heads<F: Fn(&T) -> Instant>(&self, key: F) -> (Option<Instant>, Option<Instant>) {
        let inner = self.inner.lock().unwrap();
        (inner.hp.front().map(&key), inner.normal.front().map(&key))
    }

    /// Wakes every blocked popper with nothing further to deliver; used
    /// for shutdown.
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

impl<T> Default for DualQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_only_fifo() {
        let q: DualQueue<i32> = DualQueue::new();
        q.push(1, false);
        q.push(2, false);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn hp_drained_ahead_of_normal() {
        let q: DualQueue<i32> = DualQueue::new();
        q.push(100, false);
        for i in 0..3 {
            q.push(i, true);
        }
        assert_eq!(q.pop(), Some(0));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(100));
    }

    #[test]
    fn hp_ratio_yields_to_normal_once_exhausted() {
        let q: DualQueue<i32> = DualQueue::new();
        for i in 0..(HPREQ_RATIO + 5) {
            q.push(i as i32, true);
        }
        q.push(-1, false);
        for i in 0..HPREQ_RATIO {
            assert_eq!(q.pop(), Some(i as i32));
        }
        // ratio exhausted: the next pop takes the waiting normal item
        // even though HP items remain.
        assert_eq!(q.pop(), Some(-1));
    }

    #[test]
    fn close_unblocks_pop_with_none() {
        let q: DualQueue<i32> = DualQueue::new();
        q.close();
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn close_still_drains_remaining_items_first() {
        let q: DualQueue<i32> = DualQueue::new();
        q.push(7, false);
        q.close();
        assert_eq!(q.pop(), Some(7));
        assert_eq!(q.pop(), None);
    }
}
