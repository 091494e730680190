//! Multi-node in-process driver over [`lnet_core::channel`] (S4 "GET
//! round-trip", S5 "router path", S6 "AT early reply" integration
//! tests): each registered NID gets its own bounded channel, and `send`
//! looks the destination up in a shared registry instead of touching a
//! real socket.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use lnet_core::{channel, LnetError, Receiver, Result, Sender};
use lnet_wire::{Header, Nid};

use crate::driver::{LinkDriver, WireMessage};

/// Shared address book every [`ChannelDriver`] on a simulated network
/// registers with and sends through.
pub struct ChannelNetwork {
    registry: Mutex<HashMap<Nid, Sender<WireMessage>>>,
    down: Mutex<HashSet<Nid>>,
}

impl ChannelNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(ChannelNetwork { registry: Mutex::new(HashMap::new()), down: Mutex::new(HashSet::new()) })
    }

    /// Registers `nid` on this network and returns a driver bound to it.
    pub fn register(self: &Arc<Self>, nid: Nid, capacity: usize) -> ChannelDriver {
        let (tx, rx) = channel(capacity);
        self.registry.lock().unwrap().insert(nid, tx);
        ChannelDriver { self_nid: nid, network: self.clone(), receiver: rx }
    }

    /// Marks `nid` as unreachable network-wide, independent of any one
    /// driver's own fault injection.
    pub fn set_down(&self, nid: Nid, down: bool) {
        let mut set = self.down.lock().unwrap();
        if down {
            set.insert(nid);
        } else {
            set.remove(&nid);
        }
    }

    fn is_down(&self, nid: Nid) -> bool {
        self.down.lock().unwrap().contains(&nid)
    }
}

pub struct ChannelDriver {
    self_nid: Nid,
    network: Arc<ChannelNetwork>,
    receiver: Receiver<WireMessage>,
}

impl LinkDriver for ChannelDriver {
    fn send(&self, dest: Nid, header: Header, payload: Vec<u8>) -> Result<()> {
        if self.network.is_down(dest) {
            return Err(LnetError::unreachable(format!("{dest:?} is marked down")));
        }
        let registry = self.network.registry.lock().unwrap();
        let sender = registry
            .get(&dest)
            .ok_or_else(|| LnetError::unreachable(format!("no route to {dest:?}")))?
            .clone();
        drop(registry);
        sender
            .try_send((header, payload))
            .map_err(|_| LnetError::resource_exhausted(format!("{dest:?} inbound channel full")))
    }

    fn recv(&self) -> Option<WireMessage> {
        self.receiver.try_recv()
    }

    fn eager_recv(&self) -> Option<WireMessage> {
        self.recv()
    }

    fn query(&self, nid: Nid) -> bool {
        !self.network.is_down(nid) && self.network.registry.lock().unwrap().contains_key(&nid)
    }
}
