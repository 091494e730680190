//! Fault-injection decorator (§6.5 `fail_nid`).
//!
//! Grounded on the pack's documented decorator-composition note for
//! `ksvc-module` backends: wrap an existing [`LinkDriver`] rather than
//! reimplement one, so any real driver gains a test hook for free.

use std::collections::HashSet;
use std::sync::Mutex;

use lnet_core::{LnetError, Result};
use lnet_wire::{Header, Nid};

use crate::driver::{LinkDriver, WireMessage};

pub struct FaultInjectingDriver<D> {
    inner: D,
    failed: Mutex<HashSet<Nid>>,
}

impl<D: LinkDriver> FaultInjectingDriver<D> {
    pub fn new(inner: D) -> Self {
        FaultInjectingDriver { inner, failed: Mutex::new(HashSet::new()) }
    }

    /// Marks `nid` as failed: further sends to or queries of it report
    /// failure instead of reaching the wrapped driver.
    pub fn fail_nid(&self, nid: Nid) {
        self.failed.lock().unwrap().insert(nid);
    }

    /// Reverses a prior [`FaultInjectingDriver::fail_nid`].
    pub fn restore_nid(&self, nid: Nid) {
        self.failed.lock().unwrap().remove(&nid);
    }

    fn is_failed(&self, nid: Nid) -> bool {
        self.failed.lock().unwrap().contains(&nid)
    }
}

impl<D: LinkDriver> LinkDriver for FaultInjectingDriver<D> {
    fn send(&self, dest: Nid, header: Header, payload: Vec<u8>) -> Result<()> {
        if self.is_failed(dest) {
            return Err(LnetError::Simulated);
        }
        self.inner.send(dest, header, payload)
    }

    fn recv(&self) -> Option<WireMessage> {
        self.inner.recv()
    }

    fn eager_recv(&self) -> Option<WireMessage> {
        self.inner.eager_recv()
    }

    fn query(&self, nid: Nid) -> bool {
        if self.is_failed(nid) {
            return false;
        }
        self.inner.query(nid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackDriver;
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
    fn failed_nid_rejects_send_and_query() {
        let d = FaultInjectingDriver::new(LoopbackDriver::new(Nid(1)));
        assert!(d.query(Nid(1)));
        d.fail_nid(Nid(1));
        assert!(!d.query(Nid(1)));
        assert!(matches!(d.send(Nid(1), hello(Nid(1), Nid(1)), vec![]), Err(LnetError::Simulated)));
    }

    #[test]
    fn restore_nid_reverses_failure() {
        let d = FaultInjectingDriver::new(LoopbackDriver::new(Nid(1)));
        d.fail_nid(Nid(1));
        d.restore_nid(Nid(1));
        assert!(d.query(Nid(1)));
        assert!(d.send(Nid(1), hello(Nid(1), Nid(1)), vec![]).is_ok());
    }
}
