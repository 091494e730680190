//! Reply-state tracking for "difficult" replies (§4.6 "Reply state").
//!
//! A simple reply is sent once and forgotten. A difficult reply is one
//! whose handler asked for delivery confirmation: it is kept here,
//! keyed by the request's `xid`, until the fabric's own ACK for that
//! PUT is observed or the caller evicts it (service shutdown, export
//! torn down). No teacher file covers this directly — it is new
//! plumbing over the ack-request primitive `lnet-transport` already
//! exposes — but the keyed-registration-until-observed shape matches
//! how this workspace already tracks in-flight work elsewhere (the
//! peer credit queue, the timed list).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use lnet_match::MeHandle;

struct ActiveReply {
    registered_at: Instant,
    ack_me: MeHandle,
}

/// Tracks difficult replies awaiting their delivery ack, keyed by the
/// xid of the request they answer.
pub struct ReplyPool {
    active: Mutex<HashMap<u64, ActiveReply>>,
}

impl ReplyPool {
    pub fn new() -> Self {
        ReplyPool { active: Mutex::new(HashMap::new()) }
    }

    /// Registers a difficult reply. `ack_me` is the match entry backing
    /// the one-shot local MD passed as `ack_source_md` to the reply's
    /// `send_put`; it must be unlinked once this entry is resolved one
    /// way or the other.
    pub fn track(&self, xid: u64, ack_me: MeHandle) {
        self.active.lock().unwrap().insert(xid, ActiveReply { registered_at: Instant::now(), ack_me });
    }

    /// Observes the fabric ACK for `xid`; returns the match entry to
    /// unlink if one was tracked.
    pub fn observe_ack(&self, xid: u64) -> Option<MeHandle> {
        self.active.lock().unwrap().remove(&xid).map(|r| r.ack_me)
    }

    /// Evicts a difficult reply without ever seeing its ack (service
    /// shutdown or export teardown); returns the match entry to unlink.
    pub fn evict(&self, xid: u64) -> Option<MeHandle> {
        self.active.lock().unwrap().remove(&xid).map(|r| r.ack_me)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Every xid still outstanding and how long it has been waiting,
    /// oldest first — used by shutdown to evict everything still live.
    pub fn drain_all(&self) -> Vec<(u64, MeHandle)> {
        self.active
            .lock()
            .unwrap()
            .drain()
            .map(|(xid, r)| (xid, r.ack_me))
            .collect()
    }

    pub fn oldest_age(&self, now: Instant) -> Option<std::time::Duration> {
        self.active.lock().unwrap().values().map(|r| now.saturating_duration_since(r.registered_at)).max()
    }
}

impl Default for ReplyPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnet_core::Handle;

    fn me() -> MeHandle {
        Handle::default()
    }

    #[test]
    fn track_then_observe_ack_returns_me() {
        let pool = ReplyPool::new();
        pool.track(42, me());
        assert_eq!(pool.active_count(), 1);
        assert!(pool.observe_ack(42).is_some());
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn observe_unknown_xid_is_none() {
        let pool = ReplyPool::new();
        assert!(pool.observe_ack(7).is_none());
    }

    #[test]
    fn drain_all_empties_pool() {
        let pool = ReplyPool::new();
        pool.track(1, me());
        pool.track(2, me());
        let drained = pool.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(pool.active_count(), 0);
    }
}
