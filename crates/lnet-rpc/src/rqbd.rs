//! Request buffer descriptors: lazy-portal MDs posted in a group, with
//! the low-water repost rule from §4.6 ("Request buffers").
//!
//! Grounded on the teacher's `ksvc_module::fixed_pool` sizing idiom
//! (pools are replenished, not grown on demand) generalized from a
//! worker-thread pool to a buffer pool; the actual attach/unlink calls
//! are the ones `lnet-match`/`lnet-transport` already expose.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lnet_core::Result;
use lnet_drivers::LinkDriver;
use lnet_match::{EventSender, Iov, Md, MdHandle, MdOptions, Me, MeHandle, Position, Threshold};
use lnet_transport::Ni;
use lnet_wire::{Nid, Pid};

/// One service's pool of posted request buffers on a single portal.
///
/// Each rqbd is a `Finite(1)` auto-unlink MD: it is good for exactly one
/// incoming request, after which the matcher marks it for reclaim and
/// the service must post a replacement. `group_size` buffers are posted
/// at a time; once fewer than half remain posted, a fresh group goes
/// up. Auto-unlink only retires the MD, not its match entry, so this
/// ring also tracks and explicitly unlinks the now-dead entry once its
/// `Unlink` event is observed — otherwise the portal's match table
/// would accumulate one ghost entry per consumed rqbd forever.
pub struct RqbdRing<D> {
    ni: Arc<Ni<D>>,
    portal_index: u32,
    partition: usize,
    group_size: usize,
    bufsize: usize,
    events: EventSender,
    posted: AtomicUsize,
    live: Mutex<HashMap<MdHandle, MeHandle>>,
}

impl<D: LinkDriver> RqbdRing<D> {
    pub fn new(
        ni: Arc<Ni<D>>,
        portal_index: u32,
        partition: usize,
        group_size: usize,
        bufsize: usize,
        events: EventSender,
    ) -> Result<Self> {
        let ring = RqbdRing {
            ni,
            portal_index,
            partition,
            group_size: group_size.max(1),
            bufsize,
            events,
            posted: AtomicUsize::new(0),
            live: Mutex::new(HashMap::new()),
        };
        ring.ni.set_portal_lazy(portal_index, true)?;
        ring.post_group()?;
        Ok(ring)
    }

    fn post_one(&self) -> Result<()> {
        let mut md = Md::new(
            Iov::Bytes(vec![vec![0u8; self.bufsize]]),
            MdOptions { op_put: true, truncate: true, auto_unlink: true, ..Default::default() },
            Threshold::Finite(1),
        );
        md.event_queue = Some(self.events.clone());
        let me = Me::new(Nid::ANY, Pid::ANY, 0, u64::MAX, self.portal_index);
        let (me_handle, md_handle) = self.ni.attach_md_tracked(self.portal_index, self.partition, me, md, Position::After)?;
        self.live.lock().unwrap().insert(md_handle, me_handle);
        self.posted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn post_group(&self) -> Result<()> {
        for _ in 0..self.group_size {
            self.post_one()?;
        }
        Ok(())
    }

    /// Called for every `Unlink` event the service observes; a no-op
    /// (returns `false`) unless `md` names one of this ring's own
    /// rqbds, since the same shared event channel also carries unlink
    /// notifications for ack-source MDs that have nothing to do with
    /// this pool. When it is one of ours, the dangling match entry is
    /// unlinked and the low-water mark may need topping up.
    pub fn on_rqbd_unlinked(&self, md: MdHandle) -> Result<bool> {
        let Some(me) = self.live.lock().unwrap().remove(&md) else {
            return Ok(false);
        };
        self.ni.unlink_me(me)?;
        let remaining = self.posted.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining < self.group_size / 2 {
            self.post_group()?;
        }
        Ok(true)
    }

    pub fn posted_count(&self) -> usize {
        self.posted.load(Ordering::Relaxed)
    }

    /// Unlinks every still-posted rqbd and clears the portal's lazy
    /// flag, draining (and dropping) anything still queued against it.
    pub fn shutdown(&self) -> Result<()> {
        self.ni.set_portal_lazy(self.portal_index, false)?;
        let live = std::mem::take(&mut *self.live.lock().unwrap());
        for me in live.into_values() {
            self.ni.unlink_me(me)?;
        }
        Ok(())
    }
}
