//! Network interface binding: ties the matcher, credits, router, and a
//! link driver together into the send/receive orchestration of §4.2-
//! §4.4. New code grounded on spec.md directly; no single teacher file
//! covers this, since it is the seam between several of the teacher's
//! subsystems (credit-gated scheduling, driver dispatch, event
//! delivery).
//!
//! Scope trim, recorded in full in DESIGN.md: the per-partition NI tx
//! credit pool is retained for diagnostics (value/min-observed) but is
//! not a second hard admission gate alongside the peer's tx-credit;
//! gating two independent FIFOs on one message would need joint
//! readiness tracking the integration scenarios this workspace targets
//! never exercise.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use lnet_core::Result;
use lnet_drivers::LinkDriver;
use lnet_match::{Event, EventKind, MatchEngine, MdHandle, MdSnapshot, Op, Position};
use lnet_wire::{CookieMinter, Cookie, Header, MessageType, Nid, OpUnion, Pid, ProcessId, WireHandle};

use crate::message::{Message, MessageHandle};
use crate::peer::{Peer, RouterPeerState};
use crate::router::{NetId, RouterTable};
use crate::router_buffer::RouterBufferPool;
use crate::stats::NiStats;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NiId(pub u32);

struct PendingSend {
    dest: Nid,
    peer_nid: Nid,
    partition: usize,
    header: Header,
    payload: Vec<u8>,
}

struct PendingRecv {
    header: Header,
    payload: Vec<u8>,
}

fn net_of(nid: Nid) -> NetId {
    NetId((nid.0 >> 32) as u32)
}

/// A bound network interface: one NID, one driver, a matching engine,
/// a peer table, a router table, and the credit/stats bookkeeping that
/// ties sends and receives together.
pub struct Ni<D> {
    pub id: NiId,
    pub nid: Nid,
    driver: D,
    num_partitions: usize,
    interface_cookie: Cookie,
    cookies: CookieMinter,
    ni_tx_credits: Vec<Mutex<crate::credit::CreditPool<MessageHandle>>>,
    peers: Mutex<HashMap<Nid, Peer<MessageHandle>>>,
    router: Mutex<RouterTable>,
    router_buffers: RouterBufferPool,
    messages: lnet_core::Arena<Message>,
    matcher: MatchEngine<u64>,
    recv_ids: AtomicU64,
    pending_sends: Mutex<HashMap<MessageHandle, PendingSend>>,
    pending_recvs: Mutex<HashMap<u64, PendingRecv>>,
    /// GET sink MDs and ack-source MDs exposed to remote peers by wire
    /// handle, so a later REPLY/ACK can be routed back to the right MD.
    wire_handles: Mutex<HashMap<WireHandle, MdHandle>>,
    default_peer_tx_credits: i64,
    default_peer_rtr_credits: i64,
    pub stats: NiStats,
}

impl<D: LinkDriver> Ni<D> {
    pub fn new(
        id: NiId,
        nid: Nid,
        driver: D,
        num_partitions: usize,
        max_portals: usize,
        default_peer_tx_credits: i64,
        default_peer_rtr_credits: i64,
        ni_tx_credits_initial: i64,
        router_buffer_tiers: &[(usize, usize)],
    ) -> Self {
        let cookies = CookieMinter::new();
        let interface_cookie = cookies.mint();
        Ni {
            id,
            nid,
            driver,
            num_partitions: num_partitions.max(1),
            interface_cookie,
            cookies,
            ni_tx_credits: (0..num_partitions.max(1))
                .map(|_| Mutex::new(crate::credit::CreditPool::new(ni_tx_credits_initial)))
                .collect(),
            peers: Mutex::new(HashMap::new()),
            router: Mutex::new(RouterTable::new()),
            router_buffers: RouterBufferPool::new(router_buffer_tiers),
            messages: lnet_core::Arena::new(),
            matcher: MatchEngine::new(num_partitions, max_portals),
            recv_ids: AtomicU64::new(0),
            pending_sends: Mutex::new(HashMap::new()),
            pending_recvs: Mutex::new(HashMap::new()),
            wire_handles: Mutex::new(HashMap::new()),
            default_peer_tx_credits,
            default_peer_rtr_credits,
            stats: NiStats::new(),
        }
    }

    pub fn matcher(&self) -> &MatchEngine<u64> {
        &self.matcher
    }

    pub fn router_buffers(&self) -> &RouterBufferPool {
        &self.router_buffers
    }

    fn partition_for(&self, nid: Nid) -> usize {
        (nid.0 as usize) % self.num_partitions
    }

    /// Callers address NI partitions by arbitrary `usize`; this maps any
    /// value onto a valid `ni_tx_credits` slot the way `partition_for`
    /// does for incoming traffic.
    fn credit_slot(&self, partition: usize) -> usize {
        partition % self.num_partitions
    }

    fn ensure_peer(&self, nid: Nid) {
        let mut peers = self.peers.lock().unwrap();
        peers
            .entry(nid)
            .or_insert_with(|| Peer::new(nid, Some(self.id), self.default_peer_tx_credits, Instant::now()));
    }

    pub fn add_route(&self, net: NetId, gateway: Nid, hops: u32) {
        self.ensure_peer(gateway);
        self.router.lock().unwrap().add_route(net, gateway, hops);
    }

    pub fn del_route(&self, net: NetId, gateway: Nid) {
        self.router.lock().unwrap().del_route(net, gateway);
    }

    pub fn fail_nid(&self, nid: Nid) {
        if let Some(peer) = self.peers.lock().unwrap().get_mut(&nid) {
            peer.alive = false;
        }
    }

    /// Registers a local MD so a remote GET reply or PUT ack can be
    /// routed back to it by wire handle.
    pub fn register_wire_handle(&self, md: MdHandle) -> WireHandle {
        let handle = WireHandle { interface_cookie: self.interface_cookie, object_cookie: self.cookies.mint() };
        self.wire_handles.lock().unwrap().insert(handle, md);
        handle
    }

    fn resolve_route(&self, target: Nid) -> Result<Nid> {
        if target == self.nid || self.driver.query(target) {
            return Ok(target);
        }
        let net = net_of(target);
        let peers = self.peers.lock().unwrap();
        let mut router = self.router.lock().unwrap();
        router
            .select_gateway(net, &peers, Some(self.id))
            .ok_or_else(|| lnet_core::LnetError::unreachable(format!("no route to {target:?}")))
    }

    // ---- send path --------------------------------------------------

    pub fn send_put(
        &self,
        target: ProcessId,
        partition: usize,
        portal_index: u32,
        match_bits: u64,
        hdr_data: u64,
        ack_source_md: Option<MdHandle>,
        payload: Vec<u8>,
    ) -> Result<MessageHandle> {
        let ack_wmd = match ack_source_md {
            Some(md) => self.register_wire_handle(md),
            None => WireHandle::NONE,
        };
        let op = OpUnion::Put { ack_wmd, match_bits, hdr_data, ptl_index: portal_index, offset: 0 };
        self.send_common(target, partition, MessageType::Put, op, ack_source_md, payload)
    }

    pub fn send_get(
        &self,
        target: ProcessId,
        partition: usize,
        portal_index: u32,
        match_bits: u64,
        sink_md: MdHandle,
        sink_length: u32,
    ) -> Result<MessageHandle> {
        let return_wmd = self.register_wire_handle(sink_md);
        let op = OpUnion::Get { return_wmd, match_bits, ptl_index: portal_index, src_offset: 0, sink_length };
        self.send_common(target, partition, MessageType::Get, op, Some(sink_md), Vec::new())
    }

    fn send_reply(&self, target: ProcessId, partition: usize, dst_wmd: WireHandle, payload: Vec<u8>) -> Result<MessageHandle> {
        let op = OpUnion::Reply { dst_wmd };
        self.send_common(target, partition, MessageType::Reply, op, None, payload)
    }

    fn send_ack(&self, target: ProcessId, partition: usize, dst_wmd: WireHandle, match_bits: u64, mlength: u32) -> Result<MessageHandle> {
        let op = OpUnion::Ack { dst_wmd, match_bits, mlength };
        self.send_common(target, partition, MessageType::Ack, op, None, Vec::new())
    }

    /// `source_md` is the local MD the caller issued this PUT/GET
    /// against, if any; it is where the SEND event (§4.5) fires once the
    /// transmit completes. REPLY and ACK are matching-engine-driven and
    /// have no initiator MD of their own, so callers pass `None`.
    fn send_common(
        &self,
        target: ProcessId,
        partition: usize,
        kind: MessageType,
        op: OpUnion,
        source_md: Option<MdHandle>,
        payload: Vec<u8>,
    ) -> Result<MessageHandle> {
        // `next_hop` is who the driver actually hands bytes to (self,
        // direct peer, or a gateway); `header.dest_nid` always stays the
        // final destination so a receiving gateway can tell a message
        // isn't addressed to it and needs forwarding (§4.4).
        let next_hop = self.resolve_route(target.nid)?;
        self.ensure_peer(next_hop);

        let (match_bits, hdr_data, portal_index) = match op {
            OpUnion::Put { match_bits, hdr_data, ptl_index, .. } => (match_bits, hdr_data, ptl_index),
            OpUnion::Get { match_bits, ptl_index, .. } => (match_bits, 0, ptl_index),
            _ => (0, 0, 0),
        };
        let length = payload.len() as u32;
        let id = WireHandle { interface_cookie: self.interface_cookie, object_cookie: self.cookies.mint() };
        let mut msg = Message::new(
            id,
            kind,
            ProcessId::new(self.nid, Pid::ANY),
            target,
            portal_index,
            match_bits,
            hdr_data,
            length,
            0,
        );
        msg.peer_nid = Some(next_hop);
        msg.partition = Some(partition);
        msg.routed = next_hop != target.nid;
        msg.source_md = source_md;
        let handle = self.messages.insert(msg);

        let header = Header {
            msg_type: kind,
            payload_length: length,
            dest_nid: target.nid,
            src_nid: self.nid,
            dest_pid: target.pid,
            src_pid: Pid::ANY,
            op,
        };

        self.stage_and_send(handle, partition, next_hop, next_hop, header, payload)
    }

    fn stage_and_send(
        &self,
        handle: MessageHandle,
        partition: usize,
        peer_nid: Nid,
        dest_nid: Nid,
        header: Header,
        payload: Vec<u8>,
    ) -> Result<MessageHandle> {
        // ni pool tracked for diagnostics only, see module doc comment.
        let _ = self.ni_tx_credits[self.credit_slot(partition)].lock().unwrap().acquire();

        let peer_ready = {
            let mut peers = self.peers.lock().unwrap();
            peers.get_mut(&peer_nid).expect("peer ensured by caller").tx_credits.acquire()
        };

        if peer_ready {
            self.dispatch(handle, peer_nid, partition, dest_nid, header, payload)
        } else {
            self.peers.lock().unwrap().get_mut(&peer_nid).unwrap().tx_credits.enqueue(handle);
            self.pending_sends
                .lock()
                .unwrap()
                .insert(handle, PendingSend { dest: dest_nid, peer_nid, partition, header, payload });
            Ok(handle)
        }
    }

    fn dispatch(
        &self,
        handle: MessageHandle,
        peer_nid: Nid,
        partition: usize,
        dest_nid: Nid,
        header: Header,
        payload: Vec<u8>,
    ) -> Result<MessageHandle> {
        let committed = self.messages.with(handle, |m| m.commit()).unwrap_or(false);
        debug_assert!(committed, "dispatch only ever runs once per message, from NEW");

        match self.driver.send(dest_nid, header, payload) {
            Ok(()) => {
                self.messages.with(handle, |m| m.mark_on_wire());
                self.stats.record_send(header.payload_length as u64);
                self.complete_send(handle, peer_nid, partition);
                Ok(handle)
            }
            Err(e) => {
                self.messages.with(handle, |m| m.fail());
                self.return_credits_and_resume(peer_nid, partition);
                self.messages.remove(handle);
                Err(e)
            }
        }
    }

    fn complete_send(&self, handle: MessageHandle, peer_nid: Nid, partition: usize) {
        let finalized = self.messages.with(handle, |m| m.finalize()).unwrap_or(false);
        if finalized {
            // §4.5: SEND fires at the initiator on transmit completion,
            // on whichever MD the send was issued against.
            if let Some((source_md, initiator, target)) = self.messages.with(handle, |m| (m.source_md, m.initiator, m.target)) {
                if let Some(md) = source_md {
                    self.matcher.with_md(md, |m| m.emit(Event::send(initiator, target)));
                }
            }
            self.return_credits_and_resume(peer_nid, partition);
            self.messages.remove(handle);
        }
    }

    fn return_credits_and_resume(&self, peer_nid: Nid, partition: usize) {
        let popped = {
            let mut peers = self.peers.lock().unwrap();
            peers.get_mut(&peer_nid).and_then(|p| p.tx_credits.release())
        };
        let _ = self.ni_tx_credits[self.credit_slot(partition)].lock().unwrap().release();
        if let Some(next) = popped {
            self.resume_pending_send(next);
        }
    }

    fn resume_pending_send(&self, handle: MessageHandle) {
        let Some(ctx) = self.pending_sends.lock().unwrap().remove(&handle) else { return };
        let _ = self.dispatch(handle, ctx.peer_nid, ctx.partition, ctx.dest, ctx.header, ctx.payload);
    }

    // ---- attach / control passthrough --------------------------------

    pub fn attach_md(
        &self,
        portal_idx: u32,
        partition: usize,
        me: lnet_match::Me,
        md: lnet_match::Md,
        position: Position,
    ) -> Result<MdHandle> {
        let (_me, md) = self.attach_md_tracked(portal_idx, partition, me, md, position)?;
        Ok(md)
    }

    /// Same as [`Ni::attach_md`], but also returns the match-entry handle
    /// so a long-lived caller (an rqbd pool, say) can `unlink` it later
    /// instead of waiting on auto-unlink or refcount to reach zero.
    pub fn attach_md_tracked(
        &self,
        portal_idx: u32,
        partition: usize,
        me: lnet_match::Me,
        md: lnet_match::Md,
        position: Position,
    ) -> Result<(lnet_match::MeHandle, MdHandle)> {
        let attach = self.matcher.attach_md(portal_idx, partition, me, md, position)?;
        for (recv_id, outcome) in attach.retried {
            if let Some(pending) = self.pending_recvs.lock().unwrap().remove(&recv_id) {
                self.finish_put_delivery(pending.header, pending.payload, outcome);
            }
        }
        Ok((attach.me, attach.md))
    }

    /// Unlinks a match entry posted via [`Ni::attach_md_tracked`].
    pub fn unlink_me(&self, me: lnet_match::MeHandle) -> Result<()> {
        self.matcher.unlink(me)
    }

    pub fn set_portal_lazy(&self, portal_idx: u32, lazy: bool) -> Result<()> {
        let drained = self.matcher.set_lazy(portal_idx, lazy)?;
        for (recv_id, _outcome) in drained {
            self.pending_recvs.lock().unwrap().remove(&recv_id);
        }
        Ok(())
    }

    // ---- receive path -------------------------------------------------

    pub fn deliver(&self, header: Header, payload: Vec<u8>) -> Result<()> {
        if header.dest_nid != self.nid {
            return self.forward(header, payload);
        }
        match header.msg_type {
            MessageType::Put => self.deliver_put(header, payload),
            MessageType::Get => self.deliver_get(header),
            MessageType::Reply => self.deliver_reply(header, payload),
            MessageType::Ack => self.deliver_ack(header),
            MessageType::Hello => Ok(()),
        }
    }

    /// §4.4: `header` is addressed past this NI, so it acts as a
    /// gateway. Stages the hop in a router buffer (sized by tier, never
    /// touched — every driver here sends synchronously, so the buffer
    /// is held only as a capacity token) and spends the sending peer's
    /// rtr-credit for the duration of the re-send, then returns both on
    /// completion. Exhaustion of either drops the message rather than
    /// queuing it; see DESIGN.md for this scope trim.
    fn forward(&self, header: Header, payload: Vec<u8>) -> Result<()> {
        let Some((tier, buf)) = self.router_buffers.acquire(payload.len()) else {
            self.stats.record_drop(payload.len() as u64);
            log::warn!("router buffer exhausted, dropping forwarded {:?} to {:?}", header.msg_type, header.dest_nid);
            return Ok(());
        };

        if !self.acquire_rtr_credit(header.src_nid) {
            self.router_buffers.release(tier, buf);
            self.stats.record_drop(payload.len() as u64);
            log::warn!("rtr credit exhausted for {:?}, dropping forwarded {:?}", header.src_nid, header.msg_type);
            return Ok(());
        }

        let src_nid = header.src_nid;
        let byte_len = header.payload_length as u64;
        let result = self.resolve_route(header.dest_nid).and_then(|hop| self.driver.send(hop, header, payload));
        match &result {
            Ok(()) => self.stats.record_route(byte_len),
            Err(_) => self.stats.record_drop(byte_len),
        }
        self.router_buffers.release(tier, buf);
        self.release_rtr_credit(src_nid);
        result
    }

    fn acquire_rtr_credit(&self, nid: Nid) -> bool {
        self.ensure_peer(nid);
        let mut peers = self.peers.lock().unwrap();
        let peer = peers.get_mut(&nid).expect("peer ensured above");
        peer.router.get_or_insert_with(|| RouterPeerState::new(self.default_peer_rtr_credits)).rtr_credits.acquire()
    }

    fn release_rtr_credit(&self, nid: Nid) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(router) = peers.get_mut(&nid).and_then(|p| p.router.as_mut()) {
            let _ = router.rtr_credits.release();
        }
    }

    fn deliver_put(&self, header: Header, payload: Vec<u8>) -> Result<()> {
        let OpUnion::Put { match_bits, ptl_index, offset, .. } = header.op else {
            return Err(lnet_core::LnetError::protocol("PUT header missing its op union"));
        };
        let meta = lnet_match::IncomingMeta {
            src: ProcessId::new(header.src_nid, header.src_pid),
            op: Op::Put,
            rlength: header.payload_length,
            roffset: offset,
            match_bits,
        };
        let partition = self.partition_for(header.src_nid);
        let outcome = self.matcher.match_incoming(ptl_index, partition, meta)?;
        match outcome {
            lnet_match::MatchOutcome::None => {
                let id = self.recv_ids.fetch_add(1, Ordering::Relaxed);
                self.pending_recvs.lock().unwrap().insert(id, PendingRecv { header, payload });
                self.matcher.enqueue_pending(ptl_index, meta, id)?;
                Ok(())
            }
            other => {
                self.finish_put_delivery(header, payload, other);
                Ok(())
            }
        }
    }

    fn finish_put_delivery(&self, header: Header, payload: Vec<u8>, outcome: lnet_match::MatchOutcome) {
        let OpUnion::Put { ack_wmd, match_bits, hdr_data, ptl_index, .. } = header.op else { return };
        match outcome {
            lnet_match::MatchOutcome::Ok { md, mlength, offset, threshold, niov, ack_disable, .. } => {
                let len = mlength.min(payload.len() as u32) as usize;
                self.matcher.with_md_mut(md, |m| m.write_at(offset, &payload[..len]));
                let event = Event {
                    kind: EventKind::Put,
                    initiator: ProcessId::new(header.src_nid, header.src_pid),
                    target: ProcessId::new(self.nid, header.dest_pid),
                    sender_nid: header.src_nid,
                    portal_index: ptl_index,
                    match_bits,
                    rlength: header.payload_length,
                    mlength,
                    offset,
                    hdr_data,
                    md,
                    md_snapshot: Some(MdSnapshot { niov, length: mlength, threshold }),
                    payload: Some(payload[..len].to_vec()),
                };
                self.matcher.with_md(md, |m| m.emit(event));
                self.stats.record_recv(mlength as u64);
                // P6: only a non-ACK_DISABLE MD gets an ACK back.
                if !ack_wmd.is_none() && !ack_disable {
                    let target = ProcessId::new(header.src_nid, header.src_pid);
                    let partition = self.partition_for(header.src_nid);
                    let _ = self.send_ack(target, partition, ack_wmd, match_bits, mlength);
                }
                self.matcher.release_md_ref(md);
            }
            lnet_match::MatchOutcome::Drop { reason } => {
                self.stats.record_drop(header.payload_length as u64);
                log::debug!("dropping PUT to portal {ptl_index}: {reason}");
            }
            lnet_match::MatchOutcome::None => {}
        }
    }

    fn deliver_get(&self, header: Header) -> Result<()> {
        let OpUnion::Get { return_wmd, match_bits, ptl_index, src_offset, sink_length } = header.op else {
            return Err(lnet_core::LnetError::protocol("GET header missing its op union"));
        };
        let meta = lnet_match::IncomingMeta {
            src: ProcessId::new(header.src_nid, header.src_pid),
            op: Op::Get,
            rlength: sink_length,
            roffset: src_offset,
            match_bits,
        };
        let partition = self.partition_for(header.src_nid);
        let outcome = self.matcher.match_incoming(ptl_index, partition, meta)?;
        match outcome {
            lnet_match::MatchOutcome::Ok { md, mlength, offset, niov, threshold, .. } => {
                let data = self.matcher.with_md(md, |m| m.read_at(offset, mlength)).unwrap_or_default();
                let event = Event {
                    kind: EventKind::Get,
                    initiator: ProcessId::new(header.src_nid, header.src_pid),
                    target: ProcessId::new(self.nid, header.dest_pid),
                    sender_nid: header.src_nid,
                    portal_index: ptl_index,
                    match_bits,
                    rlength: sink_length,
                    mlength,
                    offset,
                    hdr_data: 0,
                    md,
                    md_snapshot: Some(MdSnapshot { niov, length: mlength, threshold }),
                    payload: Some(data.clone()),
                };
                self.matcher.with_md(md, |m| m.emit(event));
                self.matcher.release_md_ref(md);
                self.stats.record_recv(0);
                let target = ProcessId::new(header.src_nid, header.src_pid);
                let reply_partition = self.partition_for(header.src_nid);
                self.send_reply(target, reply_partition, return_wmd, data)?;
            }
            lnet_match::MatchOutcome::Drop { reason } => {
                self.stats.record_drop(0);
                log::debug!("dropping GET to portal {ptl_index}: {reason}");
            }
            lnet_match::MatchOutcome::None => {
                self.stats.record_drop(0);
            }
        }
        Ok(())
    }

    fn deliver_reply(&self, header: Header, payload: Vec<u8>) -> Result<()> {
        let OpUnion::Reply { dst_wmd } = header.op else {
            return Err(lnet_core::LnetError::protocol("REPLY header missing its op union"));
        };
        let Some(md) = self.wire_handles.lock().unwrap().remove(&dst_wmd) else {
            self.stats.record_drop(payload.len() as u64);
            return Ok(());
        };
        self.matcher.with_md_mut(md, |m| m.write_at(0, &payload));
        let snapshot = self.matcher.with_md(md, |m| MdSnapshot { niov: m.niov(), length: m.length(), threshold: m.threshold });
        let event = Event {
            kind: EventKind::Reply,
            initiator: ProcessId::new(self.nid, Pid::ANY),
            target: ProcessId::new(header.src_nid, header.src_pid),
            sender_nid: header.src_nid,
            portal_index: 0,
            match_bits: 0,
            rlength: payload.len() as u32,
            mlength: payload.len() as u32,
            offset: 0,
            hdr_data: 0,
            md,
            md_snapshot: snapshot,
            payload: Some(payload.clone()),
        };
        self.matcher.with_md(md, |m| m.emit(event));
        self.stats.record_recv(payload.len() as u64);
        self.matcher.release_md_ref(md);
        Ok(())
    }

    fn deliver_ack(&self, header: Header) -> Result<()> {
        let OpUnion::Ack { dst_wmd, match_bits, mlength } = header.op else {
            return Err(lnet_core::LnetError::protocol("ACK header missing its op union"));
        };
        let Some(md) = self.wire_handles.lock().unwrap().remove(&dst_wmd) else {
            return Ok(());
        };
        let snapshot = self.matcher.with_md(md, |m| MdSnapshot { niov: m.niov(), length: m.length(), threshold: m.threshold });
        let event = Event {
            kind: EventKind::Ack,
            initiator: ProcessId::new(header.src_nid, header.src_pid),
            target: ProcessId::new(self.nid, Pid::ANY),
            sender_nid: header.src_nid,
            portal_index: 0,
            match_bits,
            rlength: mlength,
            mlength,
            offset: 0,
            hdr_data: 0,
            md,
            md_snapshot: snapshot,
            payload: None,
        };
        self.matcher.with_md(md, |m| m.emit(event));
        self.matcher.release_md_ref(md);
        Ok(())
    }

    /// Drains and delivers everything currently buffered by the driver.
    /// Intended to be called from a polling loop or test harness.
    pub fn pump(&self) -> Result<usize> {
        let mut n = 0;
        while let Some((header, payload)) = self.driver.recv() {
            self.deliver(header, payload)?;
            n += 1;
        }
        while let Some((header, payload)) = self.driver.eager_recv() {
            self.deliver(header, payload)?;
            n += 1;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageState;
    use lnet_core::channel;
    use lnet_drivers::LoopbackDriver;
    use lnet_match::{Iov, Md, MdOptions, Me, Threshold};

    fn new_ni(nid: u64) -> Ni<LoopbackDriver> {
        Ni::new(NiId(0), Nid(nid), LoopbackDriver::new(Nid(nid)), 1, 8, 8, 8, 8, &[(4096, 4)])
    }

    #[test]
    fn s1_loopback_put_delivers_and_fires_event() {
        let ni = new_ni(1);
        let (tx, rx) = channel(4);
        let mut md = Md::new(Iov::Bytes(vec![vec![0u8; 64]]), MdOptions { op_put: true, ..Default::default() }, Threshold::Finite(1));
        md.event_queue = Some(tx);
        let me = Me::new(Nid::ANY, Pid::ANY, 0x42, 0, 7);
        ni.attach_md(7, 0, me, md, Position::After).unwrap();

        // Source MD for the PUT itself: never matched against (no
        // incoming traffic targets portal 5), it exists only to collect
        // the initiator's own SEND/ACK completions.
        let (src_tx, src_rx) = channel(4);
        let mut source_md = Md::new(Iov::Bytes(vec![vec![0u8; 32]]), MdOptions::default(), Threshold::Finite(1));
        source_md.event_queue = Some(src_tx);
        let source_me = Me::new(Nid::ANY, Pid::ANY, 0x99, 0, 5);
        let source = ni.attach_md(5, 0, source_me, source_md, Position::After).unwrap();

        let target = ProcessId::new(Nid(1), Pid(1));
        let payload = vec![9u8; 32];
        ni.send_put(target, 0, 7, 0x42, 0xdead, Some(source), payload.clone()).unwrap();
        ni.pump().unwrap();

        let event = rx.try_recv().expect("PUT event should have fired");
        assert_eq!(event.kind, EventKind::Put);
        assert_eq!(event.mlength, 32);
        assert_eq!(ni.stats.recv_count(), 1);

        let send_event = src_rx.try_recv().expect("SEND event should have fired at the initiator");
        assert_eq!(send_event.kind, EventKind::Send);
        assert_eq!(send_event.sender_nid, Nid::ANY, "initiator NID is cleared to ANY on the wire per §4.5");
        assert_eq!(send_event.target, target);
    }

    #[test]
    fn p6_ack_disable_md_gets_no_ack() {
        let ni = new_ni(1);
        let (tx, rx) = channel(4);
        let mut md = Md::new(
            Iov::Bytes(vec![vec![0u8; 64]]),
            MdOptions { op_put: true, ack_disable: true, ..Default::default() },
            Threshold::Finite(1),
        );
        md.event_queue = Some(tx);
        let me = Me::new(Nid::ANY, Pid::ANY, 0x42, 0, 7);
        ni.attach_md(7, 0, me, md, Position::After).unwrap();

        let (src_tx, src_rx) = channel(4);
        let mut source_md = Md::new(Iov::Bytes(vec![vec![0u8; 32]]), MdOptions::default(), Threshold::Finite(1));
        source_md.event_queue = Some(src_tx);
        let source_me = Me::new(Nid::ANY, Pid::ANY, 0x99, 0, 5);
        let source = ni.attach_md(5, 0, source_me, source_md, Position::After).unwrap();

        let target = ProcessId::new(Nid(1), Pid(1));
        ni.send_put(target, 0, 7, 0x42, 0, Some(source), vec![1u8; 32]).unwrap();
        ni.pump().unwrap();

        let event = rx.try_recv().expect("PUT event should have fired");
        assert_eq!(event.kind, EventKind::Put);

        // The matched MD disabled ACKs, so only SEND reaches the
        // initiator's queue, never an ACK.
        let send_event = src_rx.try_recv().expect("SEND event should have fired");
        assert_eq!(send_event.kind, EventKind::Send);
        assert!(src_rx.try_recv().is_none(), "ACK_DISABLE must suppress the ACK event");
    }

    #[test]
    fn lazy_portal_then_attach_delivers_retried_put() {
        let ni = new_ni(1);
        ni.set_portal_lazy(3, true).unwrap();
        let target = ProcessId::new(Nid(1), Pid(1));
        ni.send_put(target, 0, 3, 0x1, 0, None, vec![1, 2, 3]).unwrap();
        ni.pump().unwrap();
        assert_eq!(ni.stats.recv_count(), 0);

        let (tx, rx) = channel(4);
        let mut md = Md::new(Iov::Bytes(vec![vec![0u8; 16]]), MdOptions { op_put: true, ..Default::default() }, Threshold::Finite(1));
        md.event_queue = Some(tx);
        let me = Me::new(Nid::ANY, Pid::ANY, 0x1, 0, 3);
        ni.attach_md(3, 0, me, md, Position::After).unwrap();

        assert!(rx.try_recv().is_some());
    }

    #[test]
    fn get_then_reply_round_trip() {
        let ni = new_ni(1);
        let mut source_md = Md::new(Iov::Bytes(vec![vec![7u8; 16]]), MdOptions { op_get: true, ..Default::default() }, Threshold::Finite(1));
        let (src_tx, src_rx) = channel(4);
        source_md.event_queue = Some(src_tx);
        let me = Me::new(Nid::ANY, Pid::ANY, 0x9, 0, 5);
        ni.attach_md(5, 0, me, source_md, Position::After).unwrap();

        // The sink MD is attached like any other local MD (no remote
        // sender will ever match it); its wire handle is what carries
        // the REPLY back to it.
        let sink_me = Me::new(Nid::ANY, Pid::ANY, 0xA, 0, 6);
        let sink_md = Md::new(Iov::Bytes(vec![vec![0u8; 16]]), MdOptions::default(), Threshold::Finite(1));
        let sink = ni.attach_md(6, 0, sink_me, sink_md, Position::After).unwrap();

        let target = ProcessId::new(Nid(1), Pid(1));
        ni.send_get(target, 0, 5, 0x9, sink, 16).unwrap();
        ni.pump().unwrap();

        let event = src_rx.try_recv().expect("source MD should see a GET event");
        assert_eq!(event.kind, EventKind::Get);
        assert_eq!(event.mlength, 16);

        let got = ni.matcher().with_md(sink, |m| m.read_at(0, 16)).unwrap();
        assert_eq!(got, vec![7u8; 16]);
    }

    #[test]
    fn exhausted_peer_credit_queues_then_resumes_on_release() {
        // zero initial peer tx credits: the first send exhausts the
        // pool immediately and parks instead of reaching the driver.
        let ni = Ni::new(NiId(0), Nid(1), LoopbackDriver::new(Nid(1)), 1, 8, 0, 8, 8, &[(4096, 4)]);
        let (tx, rx) = channel(4);
        let mut md = Md::new(Iov::Bytes(vec![vec![0u8; 16]]), MdOptions { op_put: true, ..Default::default() }, Threshold::Finite(1));
        md.event_queue = Some(tx);
        let me = Me::new(Nid::ANY, Pid::ANY, 0x5, 0, 2);
        ni.attach_md(2, 0, me, md, Position::After).unwrap();

        let target = ProcessId::new(Nid(1), Pid(1));
        let handle = ni.send_put(target, 0, 2, 0x5, 0, None, vec![4, 5, 6]).unwrap();
        assert_eq!(ni.messages.with(handle, |m| m.state()), Some(MessageState::New));
        assert!(ni.driver.recv().is_none());

        // §4.2: a credit return pops the queue head and dispatches it.
        ni.return_credits_and_resume(Nid(1), 0);
        ni.pump().unwrap();

        assert!(ni.messages.with(handle, |m| m.state()).is_none());
        assert!(rx.try_recv().is_some());
    }

    #[test]
    fn s5_router_path_forwards_and_returns_rtr_credits() {
        use lnet_drivers::{ChannelDriver, ChannelNetwork};

        // Gateway (Nid(2)) and the next hop toward the remote net
        // (Nid(50)) share a network; the ultimate destination's NID is
        // never registered anywhere, so resolving it can only succeed
        // through the gateway's route table, exactly as it would on a
        // real multi-net fabric.
        let net = ChannelNetwork::new();
        let gateway: Ni<ChannelDriver> = Ni::new(NiId(0), Nid(2), net.register(Nid(2), 8), 1, 8, 8, 8, 8, &[(4096, 4)]);
        let next_hop = net.register(Nid(50), 8);

        let remote_dst = Nid((7u64 << 32) | 99);
        gateway.add_route(net_of(remote_dst), Nid(50), 1);

        let header = Header {
            msg_type: MessageType::Put,
            payload_length: 16,
            dest_nid: remote_dst,
            src_nid: Nid(1),
            dest_pid: Pid::ANY,
            src_pid: Pid::ANY,
            op: OpUnion::Put { ack_wmd: WireHandle::NONE, match_bits: 0, hdr_data: 0, ptl_index: 0, offset: 0 },
        };
        let payload = vec![5u8; 16];

        gateway.deliver(header, payload.clone()).unwrap();

        let (fwd_header, fwd_payload) = next_hop.recv().expect("forwarded message should reach the next hop");
        assert_eq!(fwd_header.dest_nid, remote_dst, "dest_nid must stay the final target across the hop");
        assert_eq!(fwd_header.src_nid, Nid(1));
        assert_eq!(fwd_payload, payload);
        assert_eq!(gateway.stats.route_count(), 1);

        // Both the router buffer and the sender's rtr-credit are
        // returned once the forward completes.
        assert_eq!(gateway.router_buffers().free_count(0), 4);
        let rtr_value = gateway.peers.lock().unwrap().get(&Nid(1)).unwrap().router.as_ref().unwrap().rtr_credits.value();
        assert_eq!(rtr_value, 8);
    }
}
