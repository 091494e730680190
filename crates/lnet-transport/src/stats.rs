//! Per-NI counters (§7 "Observability"): allocation high-water mark plus
//! send/recv/route/drop counts and byte totals. Plain atomics, same
//! style as the teacher's scheduler counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct NiStats {
    msgs_alloc: AtomicU64,
    msgs_max: AtomicU64,
    send_count: AtomicU64,
    send_length: AtomicU64,
    recv_count: AtomicU64,
    recv_length: AtomicU64,
    route_count: AtomicU64,
    route_length: AtomicU64,
    drop_count: AtomicU64,
    drop_length: AtomicU64,
}

impl NiStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a message handle is allocated; bumps the live count
    /// and the high-water mark in one pass.
    pub fn msg_allocated(&self) {
        let live = self.msgs_alloc.fetch_add(1, Ordering::Relaxed) + 1;
        self.msgs_max.fetch_max(live, Ordering::Relaxed);
    }

    pub fn msg_freed(&self) {
        self.msgs_alloc.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_send(&self, bytes: u64) {
        self.send_count.fetch_add(1, Ordering::Relaxed);
        self.send_length.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_recv(&self, bytes: u64) {
        self.recv_count.fetch_add(1, Ordering::Relaxed);
        self.recv_length.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_route(&self, bytes: u64) {
        self.route_count.fetch_add(1, Ordering::Relaxed);
        self.route_length.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_drop(&self, bytes: u64) {
        self.drop_count.fetch_add(1, Ordering::Relaxed);
        self.drop_length.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn msgs_alloc(&self) -> u64 {
        self.msgs_alloc.load(Ordering::Relaxed)
    }
    pub fn msgs_max(&self) -> u64 {
        self.msgs_max.load(Ordering::Relaxed)
    }
    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::Relaxed)
    }
    pub fn send_length(&self) -> u64 {
        self.send_length.load(Ordering::Relaxed)
    }
    pub fn recv_count(&self) -> u64 {
        self.recv_count.load(Ordering::Relaxed)
    }
    pub fn recv_length(&self) -> u64 {
        self.recv_length.load(Ordering::Relaxed)
    }
    pub fn route_count(&self) -> u64 {
        self.route_count.load(Ordering::Relaxed)
    }
    pub fn route_length(&self) -> u64 {
        self.route_length.load(Ordering::Relaxed)
    }
    pub fn drop_count(&self) -> u64 {
        self.drop_count.load(Ordering::Relaxed)
    }
    pub fn drop_length(&self) -> u64 {
        self.drop_length.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_water_mark_tracks_peak_not_current() {
        let s = NiStats::new();
        s.msg_allocated();
        s.msg_allocated();
        s.msg_allocated();
        s.msg_freed();
        assert_eq!(s.msgs_alloc(), 2);
        assert_eq!(s.msgs_max(), 3);
    }

    #[test]
    fn send_recv_route_drop_independent() {
        let s = NiStats::new();
        s.record_send(100);
        s.record_recv(200);
        s.record_route(300);
        s.record_drop(400);
        assert_eq!((s.send_count(), s.send_length()), (1, 100));
        assert_eq!((s.recv_count(), s.recv_length()), (1, 200));
        assert_eq!((s.route_count(), s.route_length()), (1, 300));
        assert_eq!((s.drop_count(), s.drop_length()), (1, 400));
    }
}
