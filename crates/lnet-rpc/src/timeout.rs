//! Deadline-sorted timed list and the adaptive-timeout (AT) estimator
//! (§4.6 "Adaptive timeouts").
//!
//! The timed list is grounded on
//! `gvthread_runtime::timer::impls::heap::HeapTimerBackend`: a
//! `BinaryHeap` ordered by deadline with lazy cancellation tracked in a
//! side set, so cancelling a request whose reply already went out
//! doesn't need a heap removal. The estimator itself has no teacher
//! counterpart; it is a plain windowed moving average.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct HeapEntry<T> {
    deadline: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl<T> Eq for HeapEntry<T> {}
impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for HeapEntry<T> {
    // Reversed so `BinaryHeap`, a max-heap, pops the earliest deadline.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.deadline.cmp(&self.deadline).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimedInner<T> {
    heap: BinaryHeap<HeapEntry<T>>,
    cancelled: HashSet<u64>,
    next_seq: u64,
}

/// A deadline-ordered registry of in-flight items (requests, keyed
/// however the caller likes — `lnet-rpc`'s service uses the request's
/// `xid`). `cancel` is lazy: the entry is only actually dropped once it
/// reaches the top of the heap.
pub struct TimedList<T> {
    inner: Mutex<TimedInner<T>>,
}

impl<T> TimedList<T> {
    pub fn new() -> Self {
        TimedList { inner: Mutex::new(TimedInner { heap: BinaryHeap::new(), cancelled: HashSet::new(), next_seq: 0 }) }
    }

    /// Returns a cancellation token for this entry.
    pub fn insert(&self, item: T, deadline: Instant) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(HeapEntry { deadline, seq, item });
        seq
    }

    /// Best-effort cancel; `true` if the token was still live.
    pub fn cancel(&self, seq: u64) -> bool {
        self.inner.lock().unwrap().cancelled.insert(seq)
    }

    /// Pops every entry whose deadline has passed, skipping cancelled
    /// ones (and forgetting their cancellation markers as they're
    /// skipped, so `cancelled` doesn't grow without bound).
    pub fn poll_expired(&self, now: Instant) -> Vec<T> {
        let mut inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        while let Some(top) = inner.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = inner.heap.pop().unwrap();
            if inner.cancelled.remove(&entry.seq) {
                continue;
            }
            out.push(entry.item);
        }
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.lock().unwrap().heap.peek().map(|e| e.deadline)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.heap.len().saturating_sub(inner.cancelled.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for TimedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct AtInner {
    samples: VecDeque<(Instant, Duration)>,
    sum: Duration,
}

/// Server-side service-time estimator: a moving average over the last
/// `history` worth of completed requests' wall-clock durations, clamped
/// to `[min, max]`. Feeds both the per-request deadline extension and
/// the health check's watchdog threshold.
pub struct AtEstimator {
    inner: Mutex<AtInner>,
    min: Duration,
    max: Duration,
    history: Duration,
}

impl AtEstimator {
    pub fn new(min: Duration, max: Duration, history: Duration) -> Self {
        AtEstimator { inner: Mutex::new(AtInner { samples: VecDeque::new(), sum: Duration::ZERO }), min, max, history }
    }

    pub fn record(&self, now: Instant, elapsed: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples.push_back((now, elapsed));
        inner.sum += elapsed;
        while let Some(&(t, d)) = inner.samples.front() {
            if now.saturating_duration_since(t) > self.history {
                inner.samples.pop_front();
                inner.sum -= d;
            } else {
                break;
            }
        }
    }

    pub fn estimate(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        if inner.samples.is_empty() {
            return self.min;
        }
        let avg = inner.sum / inner.samples.len() as u32;
        avg.clamp(self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn poll_expired_returns_in_deadline_order() {
        let list: TimedList<&str> = TimedList::new();
        let base = Instant::now();
        list.insert("late", base + Duration::from_secs(5));
        list.insert("early", base + Duration::from_secs(1));
        let expired = list.poll_expired(base + Duration::from_secs(10));
        assert_eq!(expired, vec!["early", "late"]);
    }

    #[test]
    fn cancelled_entry_never_returned() {
        let list: TimedList<&str> = TimedList::new();
        let base = Instant::now();
        let tok = list.insert("x", base + Duration::from_secs(1));
        assert!(list.cancel(tok));
        assert!(list.poll_expired(base + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn next_deadline_reflects_earliest() {
        let list: TimedList<u32> = TimedList::new();
        let base = Instant::now();
        list.insert(1, base + Duration::from_secs(9));
        list.insert(2, base + Duration::from_secs(3));
        assert_eq!(list.next_deadline(), Some(base + Duration::from_secs(3)));
    }

    #[test]
    fn estimator_clamps_to_bounds() {
        let est = AtEstimator::new(Duration::from_millis(10), Duration::from_millis(100), Duration::from_secs(60));
        let now = Instant::now();
        est.record(now, Duration::from_millis(1));
        assert_eq!(est.estimate(), Duration::from_millis(10));
        est.record(now, Duration::from_secs(5));
        assert_eq!(est.estimate(), Duration::from_millis(100));
    }

    #[test]
    fn estimator_default_is_min_with_no_samples() {
        let est = AtEstimator::new(Duration::from_millis(20), Duration::from_millis(200), Duration::from_secs(60));
        assert_eq!(est.estimate(), Duration::from_millis(20));
    }
}
