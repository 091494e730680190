//! Self-NID loopback driver (S1 "local loopback PUT").
//!
//! The simplest possible [`LinkDriver`]: a single FIFO in front of its
//! own NID. Sends addressed to anything else are rejected as
//! unreachable rather than silently misdelivered.

use std::collections::VecDeque;
use std::sync::Mutex;

use lnet_core::{LnetError, Result};
use lnet_wire::{Header, Nid};

use crate::driver::{LinkDriver, WireMessage};

pub struct LoopbackDriver {
    self_nid: Nid,
    inbox: Mutex<VecDeque<WireMessage>>,
}

impl LoopbackDriver {
    pub fn new(self_nid: Nid) -> Self {
        LoopbackDriver { self_nid, inbox: Mutex::new(VecDeque::new()) }
    }
}

impl LinkDriver for LoopbackDriver {
    fn send(&self, dest: Nid, header: Header, payload: Vec<u8>) -> Result<()> {
        if dest != self.self_nid {
            return Err(LnetError::unreachable(format!(
                "loopback driver bound to {:?} cannot reach {dest:?}",
                self.self_nid
            )));
        }
        self.inbox.lock().unwrap().push_back((header, payload));
        Ok(())
    }

    fn recv(&self) -> Option<WireMessage> {
        self.inbox.lock().unwrap().pop_front()
    }

    fn eager_recv(&self) -> Option<WireMessage> {
        self.recv()
    }

    fn query(&self, nid: Nid) -> bool {
        nid == self.self_nid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnet_wire::{MessageType, OpUnion, Pid};

    fn hello(dest: Nid, src: Nid) -> Header {
        Header {
            msg_type: MessageType::Hello,
            payload_length: 0,
            dest_nid: dest,
            src_nid: src,
            dest_pid: Pid::ANY,
            src_pid: Pid::ANY,
            op: OpUnion::Hello { opaque: [0u8; 40] },
        }
    }

    #[test]
    fn loopback_delivers_to_self() {
        let d = LoopbackDriver::new(Nid(1));
        d.send(Nid(1), hello(Nid(1), Nid(1)), vec![1, 2, 3]).unwrap();
        let (h, payload) = d.recv().unwrap();
        assert_eq!(h.dest_nid, Nid(1));
        assert_eq!(payload, vec![1, 2, 3]);
        assert!(d.recv().is_none());
    }

    #[test]
    fn send_to_other_nid_rejected() {
        let d = LoopbackDriver::new(Nid(1));
        assert!(d.send(Nid(2), hello(Nid(2), Nid(1)), vec![]).is_err());
    }

    #[test]
    fn query_only_self() {
        let d = LoopbackDriver::new(Nid(1));
        assert!(d.query(Nid(1)));
        assert!(!d.query(Nid(2)));
    }
}
