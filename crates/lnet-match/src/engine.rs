//! The matching engine itself (§4.1 "Matching engine (C1)").

use std::collections::VecDeque;

use lnet_core::{Arena, Result};
use lnet_core::error::LnetError;
use lnet_wire::ProcessId;

use crate::event::{Event, EventKind};
use crate::md::{Md, MdHandle};
use crate::me::{Me, MeHandle, Position};
use crate::portal::{hash_key, Portal, PortalType};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Put,
    Get,
}

#[derive(Clone, Copy, Debug)]
pub struct IncomingMeta {
    pub src: ProcessId,
    pub op: Op,
    pub rlength: u32,
    pub roffset: u32,
    pub match_bits: u64,
}

/// A message that missed every local match table, parked by the caller
/// for later retry by [`MatchEngine::match_against_blocked`] or the
/// stealing walk. `M` is the caller's own opaque handle for the message
/// (`lnet-transport` uses its `Handle<Message>`); the engine never
/// interprets it.
pub struct Pending<M> {
    pub meta: IncomingMeta,
    pub token: M,
}

#[derive(Clone, Debug)]
pub enum MatchOutcome {
    Ok {
        md: MdHandle,
        mlength: u32,
        offset: u32,
        threshold: crate::md::Threshold,
        niov: u32,
        auto_unlinked: bool,
        ack_disable: bool,
    },
    Drop { reason: &'static str },
    None,
}

pub struct AttachResult<M> {
    pub me: MeHandle,
    pub md: MdHandle,
    /// Previously-pending messages that matched this MD as soon as it
    /// was published (§4.1 "Match-against-blocked").
    pub retried: Vec<(M, MatchOutcome)>,
}

pub struct MatchEngine<M> {
    mds: Arena<Md>,
    mes: Arena<Me>,
    portals: Vec<Portal<M>>,
    num_partitions: usize,
}

impl<M> MatchEngine<M> {
    pub fn new(num_partitions: usize, max_portals: usize) -> Self {
        MatchEngine {
            mds: Arena::new(),
            mes: Arena::new(),
            portals: (0..max_portals).map(|_| Portal::new(num_partitions)).collect(),
            num_partitions: num_partitions.max(1),
        }
    }

    pub fn max_portals(&self) -> usize {
        self.portals.len()
    }

    fn portal(&self, portal_idx: u32) -> Result<&Portal<M>> {
        self.portals
            .get(portal_idx as usize)
            .ok_or_else(|| LnetError::invalid(format!("portal index {portal_idx} out of range")))
    }

    pub fn attach_md(
        &self,
        portal_idx: u32,
        partition: usize,
        mut me: Me,
        md: Md,
        position: Position,
    ) -> Result<AttachResult<M>> {
        let portal = self.portal(portal_idx)?;
        let desired_type = if me.is_wildcard() { PortalType::Wildcard } else { PortalType::Unique };
        {
            let mut shared = portal.shared.lock().unwrap();
            match shared.portal_type {
                PortalType::Unset => {
                    shared.portal_type = desired_type;
                    for table in &portal.partitions {
                        table.ensure_shape(desired_type);
                    }
                }
                t if t == desired_type => {}
                _ => return Err(LnetError::invalid("portal type is fixed by its first match entry")),
            }
        }

        let bucket =
            (desired_type == PortalType::Unique).then(|| hash_key(me.match_bits, me.nid.0, me.pid.0));

        let md_handle = self.mds.insert(md);
        me.md = Some(md_handle);
        let me_handle = self.mes.insert(me);

        if desired_type == PortalType::Wildcard && !matches!(position, Position::Local) {
            for table in &portal.partitions {
                table.insert(me_handle, None, position);
            }
        } else {
            let part = portal
                .partitions
                .get(partition)
                .ok_or_else(|| LnetError::invalid("partition index out of range"))?;
            part.insert(me_handle, bucket, position);
        }

        let retried = self.match_against_blocked(portal_idx, me_handle, md_handle)?;
        Ok(AttachResult { me: me_handle, md: md_handle, retried })
    }

    /// Synchronous match attempt for a freshly arrived message (§4.1
    /// `match_incoming`): local scan, then (for wildcard portals with
    /// more than one partition) a round-robin stealing walk.
    pub fn match_incoming(&self, portal_idx: u32, partition: usize, meta: IncomingMeta) -> Result<MatchOutcome> {
        let portal = self.portal(portal_idx)?;
        let portal_type = portal.shared.lock().unwrap().portal_type;
        let bucket = (portal_type == PortalType::Unique)
            .then(|| hash_key(meta.match_bits, meta.src.nid.0, meta.src.pid.0));

        if let Some(outcome) = self.scan_partition(portal, partition, bucket, &meta) {
            return Ok(outcome);
        }

        if portal_type == PortalType::Wildcard && self.num_partitions > 1 {
            if let Some(outcome) = self.steal(portal, partition, &meta) {
                return Ok(outcome);
            }
        }

        // A GET with no matching MD is always dropped, even on a lazy
        // portal: lazy delay exists to let a PUT wait for a future
        // receive buffer, not to stall a GET's synchronous reply path.
        let lazy = meta.op != Op::Get && portal.shared.lock().unwrap().lazy;
        Ok(if lazy { MatchOutcome::None } else { MatchOutcome::Drop { reason: "no matching entry" } })
    }

    /// Parks a message that `match_incoming` returned `None` for, so a
    /// later MD publication can satisfy it (§4.1, §3 lazy portal).
    pub fn enqueue_pending(&self, portal_idx: u32, meta: IncomingMeta, token: M) -> Result<()> {
        let portal = self.portal(portal_idx)?;
        portal.pending.lock().unwrap().push_back(Pending { meta, token });
        Ok(())
    }

    /// Walks the pending queue against one freshly published MD,
    /// removing and returning everything it satisfies; the rest stays
    /// queued in its original FIFO order.
    fn match_against_blocked(
        &self,
        portal_idx: u32,
        me_handle: MeHandle,
        md_handle: MdHandle,
    ) -> Result<Vec<(M, MatchOutcome)>> {
        let portal = self.portal(portal_idx)?;
        let mut pending = portal.pending.lock().unwrap();
        let mut results = Vec::new();
        let mut remaining = VecDeque::with_capacity(pending.len());
        while let Some(p) = pending.pop_front() {
            match self.commit_if_match_for_me(me_handle, md_handle, &p.meta) {
                Some(outcome) => results.push((p.token, outcome)),
                None => remaining.push_back(p),
            }
        }
        *pending = remaining;
        Ok(results)
    }

    /// `set_portal_lazy`/`clear_portal_lazy` (§6.5). Clearing drains and
    /// drops everything still queued.
    pub fn set_lazy(&self, portal_idx: u32, lazy: bool) -> Result<Vec<(M, MatchOutcome)>> {
        let portal = self.portal(portal_idx)?;
        let was_lazy = {
            let mut shared = portal.shared.lock().unwrap();
            let was = shared.lazy;
            shared.lazy = lazy;
            was
        };
        if was_lazy && !lazy {
            let drained: Vec<_> = portal
                .pending
                .lock()
                .unwrap()
                .drain(..)
                .map(|p| (p.token, MatchOutcome::Drop { reason: "portal lazy flag cleared" }))
                .collect();
            Ok(drained)
        } else {
            Ok(Vec::new())
        }
    }

    /// Explicit unlink of a match entry (and, transitively, its MD if
    /// this drops its refcount to zero). §8 L3.
    pub fn unlink(&self, me_handle: MeHandle) -> Result<()> {
        let me = self.mes.remove(me_handle).ok_or_else(|| LnetError::invalid("unknown match entry"))?;
        let portal = self.portal(me.portal_index)?;
        let portal_type = portal.shared.lock().unwrap().portal_type;
        let bucket = (portal_type == PortalType::Unique).then(|| hash_key(me.match_bits, me.nid.0, me.pid.0));
        for table in &portal.partitions {
            table.remove(me_handle, bucket);
        }
        if let Some(md_handle) = me.md {
            self.request_unlink(md_handle);
        }
        Ok(())
    }

    fn request_unlink(&self, md_handle: MdHandle) {
        let released = self
            .mds
            .with_mut(md_handle, |md| {
                md.unlink_pending = true;
                if md.refcount == 0 {
                    md.emit(Event {
                        kind: EventKind::Unlink,
                        initiator: ProcessId::ANY,
                        target: ProcessId::ANY,
                        sender_nid: lnet_wire::Nid::ANY,
                        portal_index: 0,
                        match_bits: 0,
                        rlength: 0,
                        mlength: 0,
                        offset: md.offset,
                        hdr_data: 0,
                        md: md_handle,
                        md_snapshot: None,
                        payload: None,
                    });
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if released {
            self.mds.remove(md_handle);
        }
    }

    /// Called once a message holding `md_handle` is finalized (§4.3
    /// step 2): drops the MD's refcount and releases it if it was
    /// pending unlink and just reached zero.
    pub fn release_md_ref(&self, md_handle: MdHandle) {
        let released = self
            .mds
            .with_mut(md_handle, |md| {
                md.refcount = md.refcount.saturating_sub(1);
                if md.refcount == 0 && md.unlink_pending {
                    md.emit(Event {
                        kind: EventKind::Unlink,
                        initiator: ProcessId::ANY,
                        target: ProcessId::ANY,
                        sender_nid: lnet_wire::Nid::ANY,
                        portal_index: 0,
                        match_bits: 0,
                        rlength: 0,
                        mlength: 0,
                        offset: md.offset,
                        hdr_data: 0,
                        md: md_handle,
                        md_snapshot: None,
                        payload: None,
                    });
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if released {
            self.mds.remove(md_handle);
        }
    }

    pub fn with_md<R>(&self, handle: MdHandle, f: impl FnOnce(&Md) -> R) -> Option<R> {
        self.mds.with(handle, f)
    }

    pub fn with_md_mut<R>(&self, handle: MdHandle, f: impl FnOnce(&mut Md) -> R) -> Option<R> {
        self.mds.with_mut(handle, f)
    }

    fn scan_partition(
        &self,
        portal: &Portal<M>,
        partition: usize,
        bucket: Option<usize>,
        meta: &IncomingMeta,
    ) -> Option<MatchOutcome> {
        let table = portal.partitions.get(partition)?;
        for me_handle in table.candidates(bucket) {
            if let Some(outcome) = self.commit_if_match(me_handle, meta) {
                return Some(outcome);
            }
        }
        None
    }

    /// Round-robin walk of every other partition, starting from the
    /// portal's shared cursor (advanced on every call regardless of
    /// outcome, which is what gives P8 its fairness bound).
    fn steal(&self, portal: &Portal<M>, local_partition: usize, meta: &IncomingMeta) -> Option<MatchOutcome> {
        let start = {
            let mut shared = portal.shared.lock().unwrap();
            let c = shared.stealing_cursor;
            shared.stealing_cursor = (c + 1) % self.num_partitions;
            c
        };
        for step in 0..self.num_partitions {
            let p = (start + step) % self.num_partitions;
            if p == local_partition {
                continue;
            }
            if let Some(outcome) = self.scan_partition(portal, p, None, meta) {
                return Some(outcome);
            }
        }
        None
    }

    fn commit_if_match(&self, me_handle: MeHandle, meta: &IncomingMeta) -> Option<MatchOutcome> {
        let md_handle = self.mes.with(me_handle, |me| me.md)??;
        self.commit_if_match_for_me(me_handle, md_handle, meta)
    }

    fn commit_if_match_for_me(&self, me_handle: MeHandle, md_handle: MdHandle, meta: &IncomingMeta) -> Option<MatchOutcome> {
        let me = self.mes.with(me_handle, |me| *me)?;
        self.mds
            .with_mut(md_handle, |md| {
                if md.is_exhausted() {
                    return None;
                }
                if !md.options.accepts(meta.op) {
                    return None;
                }
                if !me.matches_sender(meta.src.nid, meta.src.pid) {
                    return None;
                }
                if !me.matches_bits(meta.match_bits) {
                    return None;
                }

                let offset = if md.options.manage_remote { meta.roffset } else { md.offset };
                let capacity = if md.options.max_size {
                    md.max_size.unwrap_or_else(|| md.length())
                } else {
                    md.length().saturating_sub(offset)
                };

                let mlength = if meta.rlength > capacity {
                    if !md.options.truncate {
                        return Some(MatchOutcome::Drop { reason: "overflow without TRUNCATE" });
                    }
                    meta.rlength.min(capacity)
                } else {
                    meta.rlength.min(capacity)
                };

                md.refcount += 1;
                md.threshold.decrement();
                let threshold = md.threshold;
                md.offset = offset + mlength;
                let mut auto_unlinked = false;
                if md.options.auto_unlink && md.is_exhausted() {
                    md.unlink_pending = true;
                    auto_unlinked = true;
                }
                Some(MatchOutcome::Ok {
                    md: md_handle,
                    mlength,
                    offset,
                    threshold,
                    niov: md.niov(),
                    auto_unlinked,
                    ack_disable: md.options.ack_disable,
                })
            })
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::md::{Iov, MdOptions, Threshold};
    use lnet_wire::{Nid, Pid};

    fn meta(rlength: u32, match_bits: u64) -> IncomingMeta {
        IncomingMeta { src: ProcessId::new(Nid(1), Pid(1)), op: Op::Put, rlength, roffset: 0, match_bits }
    }

    fn put_md(len: usize, opts: MdOptions) -> Md {
        Md::new(Iov::Bytes(vec![vec![0u8; len]]), opts, Threshold::Finite(1))
    }

    #[test]
    fn s1_loopback_put_commits_and_decrements_threshold() {
        let engine: MatchEngine<u64> = MatchEngine::new(1, 8);
        let me = Me::new(Nid::ANY, Pid::ANY, 0x42, 0, 4);
        let md = put_md(256, MdOptions { op_put: true, ..Default::default() });
        let attach = engine.attach_md(4, 0, me, md, Position::After).unwrap();
        assert!(attach.retried.is_empty());

        let outcome = engine.match_incoming(4, 0, meta(128, 0x42)).unwrap();
        match outcome {
            MatchOutcome::Ok { mlength, offset, threshold, .. } => {
                assert_eq!(mlength, 128);
                assert_eq!(offset, 0);
                assert_eq!(threshold, Threshold::Finite(0));
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn s2_truncate_drop_leaves_md_unchanged() {
        let engine: MatchEngine<u64> = MatchEngine::new(1, 8);
        let me = Me::new(Nid::ANY, Pid::ANY, 0x1, 0, 4);
        let md = put_md(1024, MdOptions { op_put: true, ..Default::default() });
        let attach = engine.attach_md(4, 0, me, md, Position::After).unwrap();

        let outcome = engine.match_incoming(4, 0, meta(4096, 0x1)).unwrap();
        assert!(matches!(outcome, MatchOutcome::Drop { .. }));

        engine
            .with_md(attach.md, |md| {
                assert_eq!(md.offset, 0);
                assert_eq!(md.threshold, Threshold::Finite(1));
            })
            .unwrap();
    }

    #[test]
    fn s3_lazy_portal_delays_then_satisfies() {
        let engine: MatchEngine<u64> = MatchEngine::new(1, 8);
        engine.set_lazy(4, true).unwrap();

        let outcome = engine.match_incoming(4, 0, meta(64, 0x7)).unwrap();
        assert!(matches!(outcome, MatchOutcome::None));
        engine.enqueue_pending(4, meta(64, 0x7), 99u64).unwrap();

        let me = Me::new(Nid::ANY, Pid::ANY, 0x7, 0, 4);
        let md = put_md(128, MdOptions { op_put: true, ..Default::default() });
        let attach = engine.attach_md(4, 0, me, md, Position::After).unwrap();

        assert_eq!(attach.retried.len(), 1);
        let (token, outcome) = &attach.retried[0];
        assert_eq!(*token, 99u64);
        match outcome {
            MatchOutcome::Ok { mlength, offset, .. } => {
                assert_eq!(*mlength, 64);
                assert_eq!(*offset, 0);
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn l3_unlink_without_match_frees_md_silently() {
        let engine: MatchEngine<u64> = MatchEngine::new(1, 8);
        let me = Me::new(Nid::ANY, Pid::ANY, 0x9, 0, 4);
        let md = put_md(64, MdOptions { op_put: true, ..Default::default() });
        let attach = engine.attach_md(4, 0, me, md, Position::After).unwrap();
        engine.unlink(attach.me).unwrap();
        assert!(engine.with_md(attach.md, |_| ()).is_none());
    }

    #[test]
    fn stealing_finds_md_on_other_partition() {
        let engine: MatchEngine<u64> = MatchEngine::new(2, 8);
        let me = Me::new(Nid::ANY, Pid::ANY, 0x5, 0, 4);
        let md = put_md(64, MdOptions { op_put: true, ..Default::default() });
        // post only on this poster's local partition 1
        engine.attach_md(4, 1, me, md, Position::Local).unwrap();

        // message arrives, and is matched, on partition 0 via stealing
        let outcome = engine.match_incoming(4, 0, meta(32, 0x5)).unwrap();
        assert!(matches!(outcome, MatchOutcome::Ok { .. }));
    }

    #[test]
    fn get_with_no_match_drops_even_when_lazy() {
        let engine: MatchEngine<u64> = MatchEngine::new(1, 8);
        engine.set_lazy(4, true).unwrap();
        let outcome = engine
            .match_incoming(4, 0, IncomingMeta { src: ProcessId::new(Nid(1), Pid(1)), op: Op::Get, rlength: 64, roffset: 0, match_bits: 0x7 })
            .unwrap();
        assert!(matches!(outcome, MatchOutcome::Drop { .. }));
    }

    #[test]
    fn concurrency_one_disables_stealing() {
        let engine: MatchEngine<u64> = MatchEngine::new(1, 8);
        let outcome = engine.match_incoming(4, 0, meta(32, 0x5)).unwrap();
        assert!(matches!(outcome, MatchOutcome::Drop { .. }));
    }
}
