//! In-flight message state machine (§4.3 "Message lifecycle").
//!
//! Grounded on the teacher's `GVThreadState` (`#[repr(u8)]` enum with
//! helper methods guarding legal transitions): here the states are
//! `New -> Committed -> OnWire -> Finalized` instead of a scheduler's
//! run states, and the CAS that drives `OnWire -> Finalized` is the
//! enforcement point for invariant P3 (finalize fires exactly once).

use std::sync::atomic::{AtomicU8, Ordering};

use lnet_core::Handle;
use lnet_match::MdHandle;
use lnet_wire::{MessageType, Nid, ProcessId, WireHandle};

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MessageState {
    New = 0,
    Committed = 1,
    OnWire = 2,
    Finalized = 3,
}

impl MessageState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => MessageState::New,
            1 => MessageState::Committed,
            2 => MessageState::OnWire,
            3 => MessageState::Finalized,
            _ => unreachable!("message state is only ever written through this module"),
        }
    }
}

/// A message in flight through the fabric: header fields plus the
/// lifecycle state that governs when credits are returned and events
/// fired.
pub struct Message {
    pub id: WireHandle,
    pub kind: MessageType,
    pub initiator: ProcessId,
    pub target: ProcessId,
    pub portal_index: u32,
    pub match_bits: u64,
    pub hdr_data: u64,
    pub length: u32,
    pub offset: u32,
    pub routed: bool,
    /// Which peer and NI-partition this message's credits were (or will
    /// be) charged against, filled in by the transport layer once known
    /// so the credit return at finalize knows where to return them.
    pub peer_nid: Option<Nid>,
    pub partition: Option<usize>,
    /// The local MD this send was issued against, if any (PUT/GET only;
    /// REPLY and ACK are matching-engine-driven and have no initiator MD
    /// of their own). SEND fires here on finalize (§4.5).
    pub source_md: Option<MdHandle>,
    state: AtomicU8,
}

impl Message {
    pub fn new(
        id: WireHandle,
        kind: MessageType,
        initiator: ProcessId,
        target: ProcessId,
        portal_index: u32,
        match_bits: u64,
        hdr_data: u64,
        length: u32,
        offset: u32,
    ) -> Self {
        Message {
            id,
            kind,
            initiator,
            target,
            portal_index,
            match_bits,
            hdr_data,
            length,
            offset,
            routed: false,
            peer_nid: None,
            partition: None,
            source_md: None,
            state: AtomicU8::new(MessageState::New as u8),
        }
    }

    pub fn state(&self) -> MessageState {
        MessageState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: MessageState, to: MessageState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// NEW -> COMMITTED: a send/reply/ack has acquired its credit and
    /// buffer and is ready to be handed to a driver.
    #[must_use]
    pub fn commit(&self) -> bool {
        self.transition(MessageState::New, MessageState::Committed)
    }

    /// COMMITTED -> ON_WIRE: the driver has accepted the message.
    #[must_use]
    pub fn mark_on_wire(&self) -> bool {
        self.transition(MessageState::Committed, MessageState::OnWire)
    }

    /// ON_WIRE -> FINALIZED. P3: this CAS is the sole finalize gate, so
    /// concurrent completion callbacks (local unlink racing a driver
    /// completion, say) can race this call freely and only one will
    /// observe `true`.
    #[must_use]
    pub fn finalize(&self) -> bool {
        self.transition(MessageState::OnWire, MessageState::Finalized)
    }

    pub fn is_finalized(&self) -> bool {
        self.state() == MessageState::Finalized
    }

    /// Any state -> FINALIZED (§4.3: cancellation, shutdown, or an
    /// unrecoverable peer error finalizes a message regardless of its
    /// current state). A CAS loop rather than a single
    /// `compare_exchange` so it composes with invariant P3 even when a
    /// normal [`Message::finalize`] races it: whichever call observes
    /// the pre-finalized state first wins, the other sees `Finalized`
    /// and returns `false`.
    #[must_use]
    pub fn fail(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current == MessageState::Finalized as u8 {
                return false;
            }
            if self
                .state
                .compare_exchange(current, MessageState::Finalized as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }
}

pub type MessageHandle = Handle<Message>;

#[cfg(test)]
mod tests {
    use super::*;

    fn msg() -> Message {
        Message::new(
            WireHandle::NONE,
            MessageType::Put,
            ProcessId::ANY,
            ProcessId::ANY,
            0,
            0,
            0,
            0,
            0,
        )
    }

    #[test]
    fn happy_path_transitions() {
        let m = msg();
        assert_eq!(m.state(), MessageState::New);
        assert!(m.commit());
        assert!(m.mark_on_wire());
        assert!(m.finalize());
        assert!(m.is_finalized());
    }

    #[test]
    fn out_of_order_transition_rejected() {
        let m = msg();
        assert!(!m.mark_on_wire());
        assert!(!m.finalize());
        assert_eq!(m.state(), MessageState::New);
    }

    #[test]
    fn p3_finalize_exactly_once() {
        let m = msg();
        m.commit();
        m.mark_on_wire();
        assert!(m.finalize());
        assert!(!m.finalize());
    }

    #[test]
    fn fail_finalizes_from_any_state_exactly_once() {
        let m = msg();
        assert!(m.fail());
        assert_eq!(m.state(), MessageState::Finalized);
        assert!(!m.fail());
        assert!(!m.finalize());
    }
}
