//! Tiered router-buffer pool (§4.4: routed messages that cannot be
//! forwarded immediately are staged in fixed-size buffers drawn from a
//! small set of size classes).
//!
//! Grounded on the teacher's `ksvc-core::tier` (dispatch-by-size-class)
//! and `ksvc-module::fixed_pool::FixedPool` (a pool of pre-sized buffers
//! backed by `crossbeam_queue::ArrayQueue`, fully allocated up front so
//! the hot path never calls the allocator).

use crossbeam_queue::ArrayQueue;

struct Tier {
    buffer_size: usize,
    free: ArrayQueue<Vec<u8>>,
}

/// A fixed set of buffer-size tiers, each with a bounded free list.
/// `acquire` picks the smallest tier that fits the request; `release`
/// returns a buffer to its originating tier.
pub struct RouterBufferPool {
    tiers: Vec<Tier>,
}

impl RouterBufferPool {
    /// `tier_specs` is `(buffer_size, count)` pairs; sorted ascending by
    /// size internally regardless of input order.
    pub fn new(tier_specs: &[(usize, usize)]) -> Self {
        let mut tiers: Vec<Tier> = tier_specs
            .iter()
            .map(|&(size, count)| {
                let free = ArrayQueue::new(count.max(1));
                for _ in 0..count {
                    let _ = free.push(vec![0u8; size]);
                }
                Tier { buffer_size: size, free }
            })
            .collect();
        tiers.sort_by_key(|t| t.buffer_size);
        RouterBufferPool { tiers }
    }

    /// Returns `(tier index, buffer)` for the smallest tier that holds
    /// at least `needed` bytes, or `None` if every such tier is
    /// currently exhausted.
    pub fn acquire(&self, needed: usize) -> Option<(usize, Vec<u8>)> {
        for (idx, tier) in self.tiers.iter().enumerate() {
            if tier.buffer_size >= needed {
                if let Some(buf) = tier.free.pop() {
                    return Some((idx, buf));
                }
            }
        }
        None
    }

    pub fn release(&self, tier_idx: usize, mut buf: Vec<u8>) {
        let Some(tier) = self.tiers.get(tier_idx) else { return };
        buf.clear();
        buf.resize(tier.buffer_size, 0);
        let _ = tier.free.push(buf);
    }

    pub fn free_count(&self, tier_idx: usize) -> usize {
        self.tiers.get(tier_idx).map(|t| t.free.len()).unwrap_or(0)
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_picks_smallest_fitting_tier() {
        let pool = RouterBufferPool::new(&[(4096, 2), (256, 2), (1024, 2)]);
        let (idx, buf) = pool.acquire(300).unwrap();
        assert_eq!(buf.len(), 1024);
        assert_eq!(idx, 1);
    }

    #[test]
    fn release_returns_to_same_tier() {
        let pool = RouterBufferPool::new(&[(256, 1)]);
        let (idx, buf) = pool.acquire(100).unwrap();
        assert_eq!(pool.free_count(idx), 0);
        pool.release(idx, buf);
        assert_eq!(pool.free_count(idx), 1);
    }

    #[test]
    fn exhausted_tier_with_no_larger_fallback_returns_none() {
        let pool = RouterBufferPool::new(&[(256, 1)]);
        let _held = pool.acquire(100).unwrap();
        assert!(pool.acquire(100).is_none());
    }

    #[test]
    fn oversized_request_falls_through_to_next_tier() {
        let pool = RouterBufferPool::new(&[(256, 1), (4096, 1)]);
        let (idx, buf) = pool.acquire(1000).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(buf.len(), 4096);
    }
}
