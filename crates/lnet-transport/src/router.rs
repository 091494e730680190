//! Remote-net routing table and gateway selection (§4.4 "Routing").

use std::collections::HashMap;

use lnet_wire::Nid;

use crate::ni::NiId;
use crate::peer::Peer;

/// Identifier of a remote network reachable only via a gateway peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NetId(pub u32);

#[derive(Clone, Copy, Debug)]
struct Route {
    gateway_nid: Nid,
    hops: u32,
}

/// Per-remote-net ring of routes plus a rotating footprint cursor, used
/// to spread load across equally-eligible gateways over successive
/// selections rather than always preferring the same one.
pub struct RouterTable {
    routes: HashMap<NetId, Vec<Route>>,
    footprint: HashMap<NetId, usize>,
}

impl RouterTable {
    pub fn new() -> Self {
        RouterTable { routes: HashMap::new(), footprint: HashMap::new() }
    }

    pub fn add_route(&mut self, net: NetId, gateway: Nid, hops: u32) {
        let routes = self.routes.entry(net).or_default();
        if !routes.iter().any(|r| r.gateway_nid == gateway) {
            routes.push(Route { gateway_nid: gateway, hops });
        }
    }

    pub fn del_route(&mut self, net: NetId, gateway: Nid) {
        if let Some(routes) = self.routes.get_mut(&net) {
            routes.retain(|r| r.gateway_nid != gateway);
        }
    }

    pub fn routes_for(&self, net: NetId) -> impl Iterator<Item = Nid> + '_ {
        self.routes.get(&net).into_iter().flatten().map(|r| r.gateway_nid)
    }

    /// Picks the best eligible gateway for `net`, per §4.4's ordering:
    /// fewest hops, then least peer-queued-bytes, then most peer
    /// tx-credits. Walks the route ring starting from the per-net
    /// footprint cursor (advanced on every call) so ties rotate across
    /// gateways instead of pinning to one.
    pub fn select_gateway<T>(
        &mut self,
        net: NetId,
        peers: &HashMap<Nid, Peer<T>>,
        source_ni: Option<NiId>,
    ) -> Option<Nid> {
        let n = self.routes.get(&net).map(|r| r.len()).unwrap_or(0);
        if n == 0 {
            return None;
        }
        let cursor = *self.footprint.entry(net).or_insert(0);

        let mut best: Option<(u32, u64, i64, Nid)> = None;
        for step in 0..n {
            let idx = (cursor + n - 1 - step) % n;
            let route = self.routes[&net][idx];
            let Some(peer) = peers.get(&route.gateway_nid) else { continue };
            if !peer.alive {
                continue;
            }
            if let Some(ni) = source_ni {
                if peer.ni != Some(ni) {
                    continue;
                }
            }
            if let Some(rs) = &peer.router {
                if rs.net_liveness.get(&net) == Some(&false) {
                    continue;
                }
            }
            let key = (route.hops, peer.queued_bytes, -peer.tx_credits.value());
            let better = match &best {
                None => true,
                Some((h, q, c, _)) => (key.0, key.1, key.2) < (*h, *q, *c),
            };
            if better {
                best = Some((key.0, key.1, key.2, route.gateway_nid));
            }
        }

        self.footprint.insert(net, (cursor + 1) % n);
        best.map(|(_, _, _, nid)| nid)
    }
}

impl Default for RouterTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn peer(nid: u64, queued_bytes: u64, credits: i64) -> Peer<u32> {
        let mut p: Peer<u32> = Peer::new(Nid(nid), None, credits, Instant::now());
        p.queued_bytes = queued_bytes;
        p
    }

    #[test]
    fn no_routes_returns_none() {
        let mut table = RouterTable::new();
        let peers = HashMap::new();
        assert_eq!(table.select_gateway(NetId(1), &peers, None), None);
    }

    #[test]
    fn prefers_fewest_hops() {
        let mut table = RouterTable::new();
        table.add_route(NetId(1), Nid(10), 2);
        table.add_route(NetId(1), Nid(11), 1);
        let mut peers = HashMap::new();
        peers.insert(Nid(10), peer(10, 0, 8));
        peers.insert(Nid(11), peer(11, 0, 8));
        assert_eq!(table.select_gateway(NetId(1), &peers, None), Some(Nid(11)));
    }

    #[test]
    fn dead_gateway_is_skipped() {
        let mut table = RouterTable::new();
        table.add_route(NetId(1), Nid(10), 1);
        table.add_route(NetId(1), Nid(11), 1);
        let mut peers = HashMap::new();
        let mut dead = peer(10, 0, 8);
        dead.alive = false;
        peers.insert(Nid(10), dead);
        peers.insert(Nid(11), peer(11, 0, 8));
        assert_eq!(table.select_gateway(NetId(1), &peers, None), Some(Nid(11)));
    }

    #[test]
    fn tie_breaks_on_queued_bytes_then_credits() {
        let mut table = RouterTable::new();
        table.add_route(NetId(1), Nid(10), 1);
        table.add_route(NetId(1), Nid(11), 1);
        let mut peers = HashMap::new();
        peers.insert(Nid(10), peer(10, 100, 8));
        peers.insert(Nid(11), peer(11, 5, 8));
        assert_eq!(table.select_gateway(NetId(1), &peers, None), Some(Nid(11)));
    }
}
