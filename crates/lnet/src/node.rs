//! Facade tying NI table, router, portal table, and services into one
//! lifecycle object (§6 "Node"), grounded on the teacher's `Runtime`
//! facade (`gvthread_runtime::runtime::Runtime`): own the long-lived
//! subsystems, spawn their background threads once at construction,
//! and expose one `shutdown()` that unwinds everything in order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lnet_core::Result;
use lnet_drivers::LinkDriver;
use lnet_rpc::{Handler, Service};
use lnet_transport::{Ni, NiId};
use lnet_wire::Nid;

use crate::config::{Config, ServiceConfig};

/// How often a background pump thread drains its NI's driver when the
/// driver has no blocking `recv` of its own (every concrete driver in
/// this workspace is non-blocking, per §6.1).
const PUMP_INTERVAL: Duration = Duration::from_millis(5);

struct NiEntry<D> {
    ni: Arc<Ni<D>>,
    pump: JoinHandle<()>,
}

/// A running node: a set of bound NIs, each pumped by its own
/// background thread, plus whatever request/reply services have been
/// started on top of them.
pub struct Node<D> {
    config: Config,
    next_ni_id: AtomicU32,
    nis: Mutex<HashMap<NiId, NiEntry<D>>>,
    services: Mutex<Vec<Arc<Service<D>>>>,
    stopping: Arc<AtomicBool>,
}

impl<D: LinkDriver + 'static> Node<D> {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Node {
            config,
            next_ni_id: AtomicU32::new(0),
            nis: Mutex::new(HashMap::new()),
            services: Mutex::new(Vec::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds a new NI to `nid` over `driver` and starts its pump
    /// thread. The NI's credit and partition sizing comes from this
    /// node's [`Config`].
    pub fn add_ni(&self, nid: Nid, driver: D) -> Result<Arc<Ni<D>>> {
        let id = NiId(self.next_ni_id.fetch_add(1, Ordering::Relaxed));
        let ni = Arc::new(Ni::new(
            id,
            nid,
            driver,
            self.config.max_cpt_partitions,
            self.config.max_portals,
            self.config.ni.peer_tx_credits,
            self.config.ni.peer_rtr_credits,
            self.config.ni.tx_credits,
            &self.config.router_buffer_tiers,
        ));

        let pump_ni = ni.clone();
        let stopping = self.stopping.clone();
        let pump = thread::Builder::new()
            .name(format!("lnet-pump-{}", id.0))
            .spawn(move || {
                while !stopping.load(Ordering::Relaxed) {
                    match pump_ni.pump() {
                        Ok(0) => thread::sleep(PUMP_INTERVAL),
                        Ok(_) => {}
                        Err(err) => {
                            log::warn!("pump error on NI {:?}: {err}", pump_ni.id);
                            thread::sleep(PUMP_INTERVAL);
                        }
                    }
                }
            })
            .expect("failed to spawn NI pump thread");

        self.nis.lock().unwrap().insert(id, NiEntry { ni: ni.clone(), pump });
        Ok(ni)
    }

    pub fn ni(&self, id: NiId) -> Option<Arc<Ni<D>>> {
        self.nis.lock().unwrap().get(&id).map(|e| e.ni.clone())
    }

    /// Starts a request/reply service on `ni`, translating the
    /// facade-level [`ServiceConfig`] into the `lnet_rpc::ServiceConfig`
    /// the service runtime actually consumes.
    pub fn add_service(
        &self,
        ni: Arc<Ni<D>>,
        config: ServiceConfig,
        handler: Arc<dyn Handler>,
    ) -> Result<Arc<Service<D>>> {
        config.validate()?;
        let mut config = config;
        config.nbufs = self.config.effective_group_size(config.nbufs);
        let rpc_config = config.into_rpc_config();
        let service = Arc::new(Service::new(ni, rpc_config, handler)?);
        self.services.lock().unwrap().push(service.clone());
        Ok(service)
    }

    pub fn services(&self) -> Vec<Arc<Service<D>>> {
        self.services.lock().unwrap().clone()
    }

    /// Stops every service, then every NI pump thread, in that order so
    /// no service thread is left reading from a dead NI.
    pub fn shutdown(&self) -> Result<()> {
        self.stopping.store(true, Ordering::Relaxed);
        for service in self.services.lock().unwrap().drain(..) {
            service.shutdown()?;
        }
        for (_, entry) in self.nis.lock().unwrap().drain() {
            let _ = entry.pump.join();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnet_drivers::LoopbackDriver;

    #[test]
    fn add_ni_binds_and_pumps() {
        let node = Node::<LoopbackDriver>::new(Config::default()).unwrap();
        let ni = node.add_ni(Nid(1), LoopbackDriver::new(Nid(1))).unwrap();
        assert_eq!(ni.nid, Nid(1));
        assert!(node.ni(ni.id).is_some());
        node.shutdown().unwrap();
    }
}
