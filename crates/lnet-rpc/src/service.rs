//! The request/reply service itself (§4.6): rqbds feeding a dual
//! queue, a fixed worker pool, a dedicated intake/ack thread, an
//! adaptive-timeout thread, and shutdown/health surfaces.
//!
//! Thread shape grounded on `ksvc_module::fixed_pool::FixedPool`
//! (threads spawned once at creation via `thread::Builder`, no dynamic
//! resizing); the "one thread reserved for parsing/acks so handler
//! threads can't starve reply-side work" split is new, since the
//! teacher's pool has no notion of a request/reply distinction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lnet_core::{LnetError, Receiver, Result, Sender};
use lnet_drivers::LinkDriver;
use lnet_match::{Event, EventKind, Iov, Md, MdOptions, Me, Position, Threshold};
use lnet_transport::Ni;
use lnet_wire::{EnvelopeOpcode, EnvelopeStatus, Nid, Pid, ProcessId, RpcEnvelope, WireHandle, FLAG_AT_SUPPORT};

use crate::queue::DualQueue;
use crate::reply::ReplyPool;
use crate::rqbd::RqbdRing;
use crate::timeout::{AtEstimator, TimedList};

/// One parsed, not-yet-answered request.
pub struct IncomingRequest {
    pub initiator: ProcessId,
    pub envelope: RpcEnvelope,
    pub arrived: Instant,
    pub deadline: Instant,
}

/// What a [`Handler`] hands back for one request.
pub struct HandlerReply {
    pub envelope: RpcEnvelope,
    /// A difficult reply is tracked until the fabric observes delivery
    /// (or the service shuts down); a simple one is sent and forgotten.
    pub difficult: bool,
}

pub trait Handler: Send + Sync {
    fn handle(&self, req: &IncomingRequest) -> HandlerReply;

    /// Opcodes/services that must be drained ahead of normal traffic
    /// (e.g. a ping). Defaults to "nothing is high priority".
    fn is_high_priority(&self, _req: &IncomingRequest) -> bool {
        false
    }
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub req_portal: u32,
    pub rep_portal: u32,
    pub partition: usize,
    pub group_size: usize,
    pub bufsize: usize,
    pub threads: usize,
    pub default_timeout: Duration,
    pub at_min: Duration,
    pub at_max: Duration,
    pub at_history: Duration,
    pub at_early_margin: Duration,
    pub at_extra: Duration,
}

impl ServiceConfig {
    pub fn req_portal(mut self, v: u32) -> Self {
        self.req_portal = v;
        self
    }
    pub fn rep_portal(mut self, v: u32) -> Self {
        self.rep_portal = v;
        self
    }
    pub fn partition(mut self, v: usize) -> Self {
        self.partition = v;
        self
    }
    pub fn group_size(mut self, v: usize) -> Self {
        self.group_size = v;
        self
    }
    pub fn bufsize(mut self, v: usize) -> Self {
        self.bufsize = v;
        self
    }
    pub fn threads(mut self, v: usize) -> Self {
        self.threads = v;
        self
    }
    pub fn default_timeout(mut self, v: Duration) -> Self {
        self.default_timeout = v;
        self
    }
    pub fn at_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.at_min = min;
        self.at_max = max;
        self
    }
    pub fn at_history(mut self, v: Duration) -> Self {
        self.at_history = v;
        self
    }
    pub fn at_early_margin(mut self, v: Duration) -> Self {
        self.at_early_margin = v;
        self
    }
    pub fn at_extra(mut self, v: Duration) -> Self {
        self.at_extra = v;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.group_size == 0 {
            return Err(LnetError::invalid("group_size must be greater than zero"));
        }
        if self.threads < 2 {
            return Err(LnetError::invalid("a service needs at least two worker threads"));
        }
        if self.at_min > self.at_max {
            return Err(LnetError::invalid("at_min must not exceed at_max"));
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            req_portal: 0,
            rep_portal: 1,
            partition: 0,
            group_size: 8,
            bufsize: 4096,
            threads: 4,
            default_timeout: Duration::from_secs(30),
            at_min: Duration::from_millis(50),
            at_max: Duration::from_secs(5),
            at_history: Duration::from_secs(60),
            at_early_margin: Duration::from_secs(2),
            at_extra: Duration::from_secs(10),
        }
    }
}

struct Shared<D> {
    ni: Arc<Ni<D>>,
    config: ServiceConfig,
    handler: Arc<dyn Handler>,
    events: Sender<Event>,
    queue: DualQueue<Arc<IncomingRequest>>,
    in_flight: Mutex<HashMap<u64, Arc<IncomingRequest>>>,
    timed: TimedList<u64>,
    estimator: AtEstimator,
    replies: ReplyPool,
    stopping: AtomicBool,
}

/// A bound request/reply service: rqbds posted on `config.req_portal`,
/// replies addressed back via `config.rep_portal` with `match_bits` set
/// to the request's `xid` (the same xid-on-reply-portal addressing
/// real LNet RPC uses, so the client side needs nothing beyond
/// `attach_md` with a unique match entry per outstanding call).
pub struct Service<D> {
    shared: Arc<Shared<D>>,
    rqbds: Arc<RqbdRing<D>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: LinkDriver + 'static> Service<D> {
    pub fn new(ni: Arc<Ni<D>>, config: ServiceConfig, handler: Arc<dyn Handler>) -> Result<Self> {
        config.validate()?;

        let capacity = (config.group_size * 2 + config.threads * 4 + 64).max(64);
        let (events, intake_rx) = lnet_core::channel(capacity);

        let rqbds = Arc::new(RqbdRing::new(
            ni.clone(),
            config.req_portal,
            config.partition,
            config.group_size,
            config.bufsize,
            events.clone(),
        )?);

        let shared = Arc::new(Shared {
            ni,
            config: config.clone(),
            handler,
            events,
            queue: DualQueue::new(),
            in_flight: Mutex::new(HashMap::new()),
            timed: TimedList::new(),
            estimator: AtEstimator::new(config.at_min, config.at_max, config.at_history),
            replies: ReplyPool::new(),
            stopping: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(config.threads + 2);

        {
            let shared = shared.clone();
            let rqbds = rqbds.clone();
            workers.push(
                thread::Builder::new()
                    .name("lnet-rpc-intake".into())
                    .spawn(move || intake_loop(shared, rqbds, intake_rx))
                    .expect("spawn intake thread"),
            );
        }
        {
            let shared = shared.clone();
            workers.push(
                thread::Builder::new()
                    .name("lnet-rpc-at-timer".into())
                    .spawn(move || at_timer_loop(shared))
                    .expect("spawn AT timer thread"),
            );
        }
        for i in 0..config.threads {
            let shared = shared.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("lnet-rpc-worker-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("spawn worker thread"),
            );
        }

        Ok(Service { shared, rqbds, workers: Mutex::new(workers) })
    }

    pub fn posted_rqbds(&self) -> usize {
        self.rqbds.posted_count()
    }

    pub fn active_replies(&self) -> usize {
        self.shared.replies.active_count()
    }

    /// §4.6 "Health": both queue heads (if any) must have been waiting
    /// no longer than the watchdog threshold.
    pub fn is_healthy(&self) -> bool {
        let watchdog = self.shared.config.at_max.max(self.shared.config.default_timeout * 3 / 2);
        let now = Instant::now();
        let (hp, normal) = self.shared.queue.heads(|r| r.arrived);
        let within = |t: Option<Instant>| t.map_or(true, |arrived| now.saturating_duration_since(arrived) <= watchdog);
        within(hp) && within(normal)
    }

    /// Stops accepting new work, unlinks every rqbd and outstanding
    /// difficult-reply ack MD, and joins every worker thread.
    pub fn shutdown(&self) -> Result<()> {
        self.shared.stopping.store(true, Ordering::Release);
        self.rqbds.shutdown()?;
        self.shared.queue.close();
        self.shared.events.close();
        for (_xid, ack_me) in self.shared.replies.drain_all() {
            let _ = self.shared.ni.unlink_me(ack_me);
        }
        let mut workers = self.workers.lock().unwrap();
        for w in workers.drain(..) {
            let _ = w.join();
        }
        Ok(())
    }
}

fn intake_loop<D: LinkDriver>(shared: Arc<Shared<D>>, rqbds: Arc<RqbdRing<D>>, rx: Receiver<Event>) {
    while let Some(event) = rx.recv() {
        match event.kind {
            EventKind::Put => handle_arrival(&shared, &event),
            EventKind::Unlink => {
                let _ = rqbds.on_rqbd_unlinked(event.md);
            }
            EventKind::Ack => {
                if let Some(ack_me) = shared.replies.observe_ack(event.match_bits) {
                    let _ = shared.ni.unlink_me(ack_me);
                }
            }
            _ => {}
        }
    }
}

fn handle_arrival<D: LinkDriver>(shared: &Arc<Shared<D>>, event: &Event) {
    // The event carries its own copy of the bytes (see `Event::payload`):
    // by the time this runs, an auto-unlinked rqbd MD may already have
    // been reclaimed by the delivering thread, so re-reading through
    // the MD handle here would race.
    let bytes = event.payload.as_deref().unwrap_or(&[]);
    let envelope = match RpcEnvelope::decode(bytes) {
        Ok(e) => e,
        Err(e) => {
            log::debug!("dropping malformed rpc envelope ({} bytes): {e}", bytes.len());
            return;
        }
    };

    let now = Instant::now();
    let timeout = if envelope.timeout == 0 { shared.config.default_timeout } else { Duration::from_secs(envelope.timeout as u64) };
    let xid = envelope.xid;
    let req = Arc::new(IncomingRequest { initiator: event.initiator, envelope, arrived: now, deadline: now + timeout });

    let at_support = req.envelope.flags & FLAG_AT_SUPPORT != 0;
    shared.in_flight.lock().unwrap().insert(xid, req.clone());
    if at_support && shared.config.at_early_margin < timeout {
        shared.timed.insert(xid, req.deadline - shared.config.at_early_margin);
    }

    let hp = shared.handler.is_high_priority(&req);
    shared.queue.push(req, hp);
}

fn worker_loop<D: LinkDriver>(shared: Arc<Shared<D>>) {
    while let Some(req) = shared.queue.pop() {
        // Left in `in_flight` for the whole call, not just the queue wait:
        // the AT timer looks requests up there to decide whether to send
        // an early extension, and a long handler call is exactly the case
        // that needs one.
        let start = Instant::now();
        let reply = shared.handler.handle(&req);
        let done = Instant::now();
        shared.estimator.record(done, done.duration_since(start));
        shared.in_flight.lock().unwrap().remove(&req.envelope.xid);
        send_reply(&shared, &req, reply);
    }
}

fn send_reply<D: LinkDriver>(shared: &Shared<D>, req: &IncomingRequest, reply: HandlerReply) {
    let payload = reply.envelope.encode();
    let ack_md = if reply.difficult {
        register_ack_md(shared, req.envelope.xid)
    } else {
        None
    };
    if let Err(e) = shared.ni.send_put(req.initiator, shared.config.partition, shared.config.rep_portal, req.envelope.xid, 0, ack_md, payload) {
        log::debug!("failed to send rpc reply for xid {}: {e}", req.envelope.xid);
    }
}

/// Registers a local, never-matchable MD purely so the reply PUT can
/// carry it as its `ack_source_md`: the fabric fires an `Ack` event on
/// it once the client's own NI observes the reply. `MdOptions::default`
/// leaves both `op_put`/`op_get` false, so `commit_if_match` can never
/// select it for a real incoming message regardless of match bits.
fn register_ack_md<D: LinkDriver>(shared: &Shared<D>, xid: u64) -> Option<lnet_match::MdHandle> {
    let mut md = Md::new(Iov::Bytes(Vec::new()), MdOptions::default(), Threshold::Finite(1));
    md.event_queue = Some(shared.events.clone());
    let me = Me::new(Nid::ANY, Pid::ANY, 0, u64::MAX, shared.config.req_portal);
    match shared.ni.attach_md_tracked(shared.config.req_portal, shared.config.partition, me, md, Position::Local) {
        Ok((ack_me, ack_md)) => {
            shared.replies.track(xid, ack_me);
            Some(ack_md)
        }
        Err(e) => {
            log::warn!("failed to register ack md for xid {xid}: {e}");
            None
        }
    }
}

fn at_timer_loop<D: LinkDriver>(shared: Arc<Shared<D>>) {
    const POLL_CAP: Duration = Duration::from_millis(200);
    loop {
        if shared.stopping.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        let sleep_for = match shared.timed.next_deadline() {
            Some(d) if d > now => (d - now).min(POLL_CAP),
            Some(_) => Duration::from_millis(0),
            None => POLL_CAP,
        };
        thread::sleep(sleep_for);
        if shared.stopping.load(Ordering::Acquire) {
            return;
        }
        for xid in shared.timed.poll_expired(Instant::now()) {
            let maybe_req = shared.in_flight.lock().unwrap().get(&xid).cloned();
            if let Some(req) = maybe_req {
                send_early_extension(&shared, &req);
            }
        }
    }
}

fn send_early_extension<D: LinkDriver>(shared: &Shared<D>, req: &Arc<IncomingRequest>) {
    let bump = shared.config.at_extra.min(shared.config.at_max);
    let new_deadline = req.deadline + bump;
    let xid = req.envelope.xid;

    let updated = Arc::new(IncomingRequest {
        initiator: req.initiator,
        envelope: req.envelope.clone(),
        arrived: req.arrived,
        deadline: new_deadline,
    });
    shared.in_flight.lock().unwrap().insert(xid, updated);
    shared.timed.insert(xid, new_deadline - shared.config.at_early_margin);

    let envelope = RpcEnvelope {
        opcode: EnvelopeOpcode::Reply,
        status: EnvelopeStatus::Extended,
        transno: req.envelope.transno,
        xid,
        handle: WireHandle::NONE,
        timeout: bump.as_secs() as u32,
        service_time: 0,
        swab_mask: 0,
        flags: 0,
        segments: Vec::new(),
    };
    if let Err(e) = shared.ni.send_put(req.initiator, shared.config.partition, shared.config.rep_portal, xid, 0, None, envelope.encode()) {
        log::debug!("failed to send AT extension for xid {xid}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnet_drivers::{ChannelDriver, ChannelNetwork};
    use lnet_transport::NiId;
    use lnet_wire::Segment;

    fn spawn_pump(ni: Arc<Ni<ChannelDriver>>) -> (Arc<AtomicBool>, JoinHandle<()>) {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                let _ = ni.pump();
                thread::sleep(Duration::from_millis(2));
            }
        });
        (stop, handle)
    }

    fn request_envelope(xid: u64, at_support: bool, body: Vec<u8>) -> RpcEnvelope {
        RpcEnvelope {
            opcode: EnvelopeOpcode::Request,
            status: EnvelopeStatus::Ok,
            transno: xid,
            xid,
            handle: WireHandle::NONE,
            timeout: 0,
            service_time: 0,
            swab_mask: 0,
            flags: if at_support { FLAG_AT_SUPPORT } else { 0 },
            segments: vec![Segment { kind: 1, bytes: body }],
        }
    }

    struct EchoHandler;

    impl Handler for EchoHandler {
        fn handle(&self, req: &IncomingRequest) -> HandlerReply {
            HandlerReply {
                envelope: RpcEnvelope {
                    opcode: EnvelopeOpcode::Reply,
                    status: EnvelopeStatus::Ok,
                    transno: req.envelope.transno,
                    xid: req.envelope.xid,
                    handle: WireHandle::NONE,
                    timeout: 0,
                    service_time: 0,
                    swab_mask: 0,
                    flags: 0,
                    segments: req.envelope.segments.clone(),
                },
                difficult: false,
            }
        }
    }

    #[test]
    fn request_reply_roundtrip() {
        let net = ChannelNetwork::new();
        let server_ni = Arc::new(Ni::new(NiId(0), Nid(1), net.register(Nid(1), 32), 1, 8, 8, 8, 8, &[(4096, 4)]));
        let client_ni = Arc::new(Ni::new(NiId(1), Nid(2), net.register(Nid(2), 32), 1, 8, 8, 8, 8, &[(4096, 4)]));

        let config = ServiceConfig::default().req_portal(0).rep_portal(1).threads(2);
        let service = Service::new(server_ni.clone(), config, Arc::new(EchoHandler)).unwrap();

        let (stop_server, server_pump) = spawn_pump(server_ni.clone());
        let (stop_client, client_pump) = spawn_pump(client_ni.clone());

        let xid = 42u64;
        let (tx, rx) = lnet_core::channel(4);
        let mut reply_md =
            Md::new(Iov::Bytes(vec![vec![0u8; 256]]), MdOptions { op_put: true, ..Default::default() }, Threshold::Finite(1));
        reply_md.event_queue = Some(tx);
        let me = Me::new(Nid::ANY, Pid::ANY, xid, 0, 1);
        client_ni.attach_md(1, 0, me, reply_md, Position::After).unwrap();

        let envelope = request_envelope(xid, false, vec![9, 9, 9]);
        let server = ProcessId::new(Nid(1), Pid::ANY);
        client_ni.send_put(server, 0, 0, xid, 0, None, envelope.encode()).unwrap();

        let event = rx.recv().expect("reply should arrive");
        let reply = RpcEnvelope::decode(event.payload.as_deref().unwrap()).unwrap();
        assert_eq!(reply.xid, xid);
        assert_eq!(reply.status, EnvelopeStatus::Ok);
        assert_eq!(reply.segments[0].bytes, vec![9, 9, 9]);

        stop_server.store(true, Ordering::Relaxed);
        stop_client.store(true, Ordering::Relaxed);
        server_pump.join().unwrap();
        client_pump.join().unwrap();
        service.shutdown().unwrap();
    }

    struct SleepyHandler {
        sleep_for: Duration,
    }

    impl Handler for SleepyHandler {
        fn handle(&self, req: &IncomingRequest) -> HandlerReply {
            thread::sleep(self.sleep_for);
            HandlerReply {
                envelope: RpcEnvelope {
                    opcode: EnvelopeOpcode::Reply,
                    status: EnvelopeStatus::Ok,
                    transno: req.envelope.transno,
                    xid: req.envelope.xid,
                    handle: WireHandle::NONE,
                    timeout: 0,
                    service_time: 0,
                    swab_mask: 0,
                    flags: 0,
                    segments: Vec::new(),
                },
                difficult: false,
            }
        }
    }

    /// A client that declares AT support and a short deadline gets an
    /// `Extended` reply while the handler is still working, then the
    /// real answer once it finishes — no client-visible timeout either
    /// way.
    #[test]
    fn at_early_reply_extends_deadline_during_slow_handler() {
        let net = ChannelNetwork::new();
        let server_ni = Arc::new(Ni::new(NiId(0), Nid(1), net.register(Nid(1), 32), 1, 8, 8, 8, 8, &[(4096, 4)]));
        let client_ni = Arc::new(Ni::new(NiId(1), Nid(2), net.register(Nid(2), 32), 1, 8, 8, 8, 8, &[(4096, 4)]));

        let config = ServiceConfig::default()
            .req_portal(0)
            .rep_portal(1)
            .threads(2)
            .at_bounds(Duration::from_millis(50), Duration::from_secs(5))
            .at_early_margin(Duration::from_millis(400))
            .at_extra(Duration::from_secs(1));
        let handler = Arc::new(SleepyHandler { sleep_for: Duration::from_millis(1700) });
        let service = Service::new(server_ni.clone(), config, handler).unwrap();

        let (stop_server, server_pump) = spawn_pump(server_ni.clone());
        let (stop_client, client_pump) = spawn_pump(client_ni.clone());

        let xid = 7u64;
        let (tx, rx) = lnet_core::channel(4);
        let mut reply_md =
            Md::new(Iov::Bytes(vec![vec![0u8; 256]]), MdOptions { op_put: true, ..Default::default() }, Threshold::Finite(2));
        reply_md.event_queue = Some(tx);
        let me = Me::new(Nid::ANY, Pid::ANY, xid, 0, 1);
        client_ni.attach_md(1, 0, me, reply_md, Position::After).unwrap();

        // timeout=2s, AT-support set: the handler's 1.7s sleep runs past
        // the early-margin trigger point at 2s - 400ms = 1.6s.
        let mut envelope = request_envelope(xid, true, Vec::new());
        envelope.timeout = 2;
        let server = ProcessId::new(Nid(1), Pid::ANY);
        client_ni.send_put(server, 0, 0, xid, 0, None, envelope.encode()).unwrap();

        let first = rx.recv().expect("early extension should arrive");
        let first = RpcEnvelope::decode(first.payload.as_deref().unwrap()).unwrap();
        assert_eq!(first.status, EnvelopeStatus::Extended);
        assert_eq!(first.xid, xid);

        let second = rx.recv().expect("final reply should arrive");
        let second = RpcEnvelope::decode(second.payload.as_deref().unwrap()).unwrap();
        assert_eq!(second.status, EnvelopeStatus::Ok);
        assert_eq!(second.xid, xid);

        stop_server.store(true, Ordering::Relaxed);
        stop_client.store(true, Ordering::Relaxed);
        server_pump.join().unwrap();
        client_pump.join().unwrap();
        service.shutdown().unwrap();
    }
}
