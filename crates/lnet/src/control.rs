//! Control surface (§6.5): route table edits, portal lazy toggling, and
//! fault injection, exposed as plain methods on [`Node`] rather than a
//! CLI (out of scope, §1). Each one is a thin pass-through to the NI it
//! names — the interesting behavior already lives in
//! `lnet_transport::Ni` and `lnet_match::MatchEngine`; this module's
//! job is just to give it a stable, documented, directly unit-testable
//! entry point.

use lnet_core::{LnetError, Result};
use lnet_drivers::LinkDriver;
use lnet_transport::{NetId, NiId};
use lnet_wire::Nid;

use crate::node::Node;

impl<D: LinkDriver + 'static> Node<D> {
    fn require_ni(&self, ni: NiId) -> Result<std::sync::Arc<lnet_transport::Ni<D>>> {
        self.ni(ni).ok_or_else(|| LnetError::invalid(format!("no such NI: {ni:?}")))
    }

    pub fn add_route(&self, ni: NiId, net: NetId, gateway: Nid, hops: u32) -> Result<()> {
        self.require_ni(ni)?.add_route(net, gateway, hops);
        Ok(())
    }

    pub fn del_route(&self, ni: NiId, net: NetId, gateway: Nid) -> Result<()> {
        self.require_ni(ni)?.del_route(net, gateway);
        Ok(())
    }

    /// Marks `portal_idx` lazy: PUTs that find no matching MD are
    /// queued instead of dropped (§4.1 "Lazy portal").
    pub fn set_portal_lazy(&self, ni: NiId, portal_idx: u32) -> Result<()> {
        self.require_ni(ni)?.set_portal_lazy(portal_idx, true)
    }

    /// Clears lazy mode on `portal_idx`. Per spec, this drops every
    /// message currently delayed on the portal rather than attempting
    /// to match them against whatever MDs happen to be posted now.
    pub fn clear_portal_lazy(&self, ni: NiId, portal_idx: u32) -> Result<()> {
        self.require_ni(ni)?.set_portal_lazy(portal_idx, false)
    }

    /// Marks `nid` dead on `ni`'s peer table (§6.5 fault injection):
    /// subsequent sends route around it or fail with `Unreachable`.
    pub fn fail_nid(&self, ni: NiId, nid: Nid) -> Result<()> {
        self.require_ni(ni)?.fail_nid(nid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use lnet_drivers::LoopbackDriver;
    use lnet_match::{Iov, Md, MdOptions, Me, Position, Threshold};
    use lnet_transport::MessageHandle;
    use lnet_wire::{Pid, ProcessId};

    #[test]
    fn clearing_lazy_drops_delayed_messages() {
        let node = Node::<LoopbackDriver>::new(Config::default()).unwrap();
        let ni = node.add_ni(Nid(1), LoopbackDriver::new(Nid(1))).unwrap();
        node.set_portal_lazy(ni.id, 5).unwrap();

        let target = ProcessId::new(Nid(1), Pid(1));
        let _: MessageHandle = ni.send_put(target, 0, 5, 0x9, 0, None, vec![1, 2, 3]).unwrap();
        ni.pump().unwrap();
        assert_eq!(ni.stats.recv_count(), 0);

        node.clear_portal_lazy(ni.id, 5).unwrap();
        let md = Md::new(Iov::Bytes(vec![vec![0u8; 16]]), MdOptions { op_put: true, ..Default::default() }, Threshold::Finite(1));
        let me = Me::new(Nid::ANY, Pid::ANY, 0x9, 0, 5);
        ni.attach_md(5, 0, me, md, Position::After).unwrap();
        ni.pump().unwrap();
        assert_eq!(ni.stats.recv_count(), 0);

        node.shutdown().unwrap();
    }

    #[test]
    fn fail_nid_marks_peer_dead() {
        let node = Node::<LoopbackDriver>::new(Config::default()).unwrap();
        let ni = node.add_ni(Nid(1), LoopbackDriver::new(Nid(1))).unwrap();
        node.add_route(ni.id, NetId(7), Nid(2), 1).unwrap();
        node.fail_nid(ni.id, Nid(2)).unwrap();
        node.shutdown().unwrap();
    }

    #[test]
    fn unknown_ni_is_rejected() {
        let node = Node::<LoopbackDriver>::new(Config::default()).unwrap();
        assert!(node.fail_nid(NiId(99), Nid(2)).is_err());
    }
}
