//! Portal / match-table (§3 "Portal / match-table").

use std::collections::VecDeque;
use std::sync::Mutex;

use lnet_core::SpinLock;

use crate::me::MeHandle;

pub const BUCKETS: usize = 127;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortalType {
    Unset,
    Unique,
    Wildcard,
}

/// Mixes (match_bits, nid, pid) into a bucket index for a unique portal.
/// Any fixed, well-distributed mix works here; this one is grounded in
/// the same multiply-xor-fold shape the teacher uses for its small
/// internal hash helpers.
pub fn hash_key(match_bits: u64, nid: u64, pid: u32) -> usize {
    let mut h = match_bits ^ nid.rotate_left(17) ^ (pid as u64).rotate_left(41);
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    (h % BUCKETS as u64) as usize
}

enum MatchList {
    Wildcard(VecDeque<MeHandle>),
    Unique(Vec<VecDeque<MeHandle>>),
}

/// One CPU partition's view of a portal: its own ME list, locked by a
/// [`SpinLock`] standing in for §5's per-partition LO(i).
pub struct MatchTable {
    list: SpinLock<MatchList>,
}

impl MatchTable {
    fn new() -> Self {
        // Shape is undetermined until the portal's type is fixed by its
        // first ME attach; an empty wildcard list is a harmless default
        // since `ensure_shape` converts it before any insert lands.
        MatchTable { list: SpinLock::new(MatchList::Wildcard(VecDeque::new())) }
    }

    /// Converts this table to match `ty`, if it hasn't already committed
    /// to a shape. Only ever called while the table is still empty: a
    /// portal's type is fixed on its very first ME attach, before any
    /// insert has landed on any partition.
    pub fn ensure_shape(&self, ty: PortalType) {
        let mut list = self.list.lock();
        let needs_unique = matches!(ty, PortalType::Unique);
        let is_unique = matches!(&*list, MatchList::Unique(_));
        if needs_unique != is_unique {
            *list = if needs_unique {
                MatchList::Unique((0..BUCKETS).map(|_| VecDeque::new()).collect())
            } else {
                MatchList::Wildcard(VecDeque::new())
            };
        }
    }

    pub fn insert(&self, handle: MeHandle, bucket: Option<usize>, position: Position) {
        let mut list = self.list.lock();
        match &mut *list {
            MatchList::Wildcard(q) => match position {
                Position::Before => q.push_front(handle),
                _ => q.push_back(handle),
            },
            MatchList::Unique(buckets) => {
                let b = &mut buckets[bucket.expect("unique portal requires bucket index")];
                match position {
                    Position::Before => b.push_front(handle),
                    _ => b.push_back(handle),
                }
            }
        }
    }

    /// Snapshot of the candidate list for a given bucket (wildcard ignores
    /// the bucket argument). Copying handles out keeps the critical
    /// section that holds this lock short, per §5.
    pub fn candidates(&self, bucket: Option<usize>) -> Vec<MeHandle> {
        let list = self.list.lock();
        match &*list {
            MatchList::Wildcard(q) => q.iter().copied().collect(),
            MatchList::Unique(buckets) => buckets[bucket.unwrap_or(0)].iter().copied().collect(),
        }
    }

    pub fn remove(&self, handle: MeHandle, bucket: Option<usize>) {
        let mut list = self.list.lock();
        match &mut *list {
            MatchList::Wildcard(q) => q.retain(|h| *h != handle),
            MatchList::Unique(buckets) => {
                buckets[bucket.unwrap_or(0)].retain(|h| *h != handle);
            }
        }
    }
}

use crate::me::Position;

/// State shared across all partitions of one portal, protected by a
/// single [`Mutex`] standing in for §5's LP.
pub struct PortalShared {
    pub portal_type: PortalType,
    pub lazy: bool,
    /// Round-robin cursor into `partitions` used by the stealing walk.
    pub stealing_cursor: usize,
}

pub struct Portal<M> {
    pub shared: Mutex<PortalShared>,
    pub partitions: Vec<MatchTable>,
    pub pending: Mutex<VecDeque<crate::engine::Pending<M>>>,
}

impl<M> Portal<M> {
    pub fn new(num_partitions: usize) -> Self {
        Portal {
            shared: Mutex::new(PortalShared { portal_type: PortalType::Unset, lazy: false, stealing_cursor: 0 }),
            partitions: (0..num_partitions).map(|_| MatchTable::new()).collect(),
            pending: Mutex::new(VecDeque::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_key_in_range() {
        for i in 0..1000u64 {
            assert!(hash_key(i, i * 7, i as u32) < BUCKETS);
        }
    }

    #[test]
    fn wildcard_insert_order() {
        let table = MatchTable::new();
        table.ensure_shape(PortalType::Wildcard);
        let h1: MeHandle = lnet_core::Handle::default();
        table.insert(h1, None, Position::After);
        assert_eq!(table.candidates(None), vec![h1]);
    }
}
