//! Per-NID peer state (§3 "Peer").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lnet_wire::Nid;

use crate::credit::CreditPool;
use crate::ni::NiId;
use crate::router::NetId;

/// Router-only bookkeeping: present iff this peer is itself a gateway.
pub struct RouterPeerState<T> {
    pub rtr_credits: CreditPool<T>,
    /// Per-remote-net liveness as reported back by `query`; `false`
    /// means this gateway is known down for that net specifically.
    pub net_liveness: HashMap<NetId, bool>,
}

impl<T> RouterPeerState<T> {
    pub fn new(initial_rtr_credits: i64) -> Self {
        RouterPeerState { rtr_credits: CreditPool::new(initial_rtr_credits), net_liveness: HashMap::new() }
    }
}

pub struct Peer<T> {
    pub nid: Nid,
    pub ni: Option<NiId>,
    pub tx_credits: CreditPool<T>,
    pub queued_bytes: u64,
    pub last_alive: Instant,
    pub last_query: Option<Instant>,
    pub alive: bool,
    pub alive_count: u32,
    pub last_notify_ts: Option<Instant>,
    pub router: Option<RouterPeerState<T>>,
}

impl<T> Peer<T> {
    pub fn new(nid: Nid, ni: Option<NiId>, initial_tx_credits: i64, now: Instant) -> Self {
        Peer {
            nid,
            ni,
            tx_credits: CreditPool::new(initial_tx_credits),
            queued_bytes: 0,
            last_alive: now,
            last_query: None,
            alive: true,
            alive_count: 0,
            last_notify_ts: None,
            router: None,
        }
    }

    /// §4.4 "Peer liveness": `now < last_alive + peer_timeout` OR a
    /// recent notify with timestamp ≥ `last_alive` said so.
    pub fn is_alive(&self, now: Instant, peer_timeout: Duration) -> bool {
        let within_window = now.duration_since(self.last_alive) < peer_timeout;
        let recent_notify = self.last_notify_ts.is_some_and(|ts| ts >= self.last_alive);
        within_window || recent_notify
    }

    pub fn refresh_liveness(&mut self, now: Instant, peer_timeout: Duration) {
        self.alive = self.is_alive(now, peer_timeout);
    }

    /// Records a liveness confirmation (`notify-locked` in §4.4):
    /// `(lp_timestamp, lp_last_alive, lp_alive_count)`.
    pub fn notify_locked(&mut self, now: Instant) {
        self.last_notify_ts = Some(now);
        self.last_alive = now;
        self.alive_count += 1;
        self.alive = true;
    }

    /// Whether this peer is due for a liveness query (at most once per
    /// `query_interval`).
    pub fn should_query(&self, now: Instant, query_interval: Duration) -> bool {
        self.last_query.is_none_or(|t| now.duration_since(t) >= query_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_within_timeout_window() {
        let now = Instant::now();
        let peer: Peer<u32> = Peer::new(Nid(1), None, 8, now);
        assert!(peer.is_alive(now, Duration::from_secs(5)));
    }

    #[test]
    fn notify_refreshes_liveness() {
        let t0 = Instant::now();
        let mut peer: Peer<u32> = Peer::new(Nid(1), None, 8, t0);
        peer.alive_count = 0;
        peer.notify_locked(t0);
        assert_eq!(peer.alive_count, 1);
        assert!(peer.alive);
    }

    #[test]
    fn query_throttled_to_interval() {
        let t0 = Instant::now();
        let mut peer: Peer<u32> = Peer::new(Nid(1), None, 8, t0);
        assert!(peer.should_query(t0, Duration::from_secs(1)));
        peer.last_query = Some(t0);
        assert!(!peer.should_query(t0, Duration::from_secs(1)));
    }
}
