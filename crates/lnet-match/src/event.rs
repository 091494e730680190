//! Completion events (§4.5).

use lnet_core::{channel, Receiver, Sender};
use lnet_wire::{Nid, ProcessId};

use crate::md::{MdHandle, Threshold};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Send,
    Put,
    Get,
    Reply,
    Ack,
    Unlink,
}

/// A snapshot of the MD fields relevant to a completion, taken at commit
/// time so a later unlink/reuse of the MD cannot change what the consumer
/// observes.
#[derive(Clone, Copy, Debug)]
pub struct MdSnapshot {
    pub niov: u32,
    pub length: u32,
    pub threshold: Threshold,
}

#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub initiator: ProcessId,
    pub target: ProcessId,
    pub sender_nid: Nid,
    pub portal_index: u32,
    pub match_bits: u64,
    pub rlength: u32,
    pub mlength: u32,
    pub offset: u32,
    pub hdr_data: u64,
    pub md: MdHandle,
    pub md_snapshot: Option<MdSnapshot>,
    /// The bytes the operation wrote into (Put) or read out of (Get,
    /// Reply) the MD, captured at emission time. A consumer reading the
    /// MD itself after the fact can lose the race against an
    /// auto-unlinked, zero-refcount MD being reclaimed; carrying the
    /// bytes on the event sidesteps that entirely. `None` for `Send`,
    /// `Ack`, and `Unlink`, which move no data.
    pub payload: Option<Vec<u8>>,
}

impl Event {
    pub fn send(initiator: ProcessId, target: ProcessId) -> Self {
        Event {
            kind: EventKind::Send,
            initiator,
            target,
            // Cleared to ANY on the wire at the initiator per §4.5.
            sender_nid: Nid::ANY,
            portal_index: 0,
            match_bits: 0,
            rlength: 0,
            mlength: 0,
            offset: 0,
            hdr_data: 0,
            md: MdHandle::NONE,
            md_snapshot: None,
            payload: None,
        }
    }
}

/// Per-MD completion queue. Multi-producer; a single consumer drains it
/// (§5 "Event queues are multi-producer, single-file-descriptor-consumer").
pub fn event_queue(capacity: usize) -> (Sender<Event>, Receiver<Event>) {
    channel(capacity)
}

pub type EventSender = Sender<Event>;
pub type EventReceiver = Receiver<Event>;
