//! Link driver contract (§6.1 "Driver contract").
//!
//! Grounded on the teacher's `IoBackend` trait: a small trait-object-safe
//! surface, documented with an explicit implementors list, that the rest
//! of the system programs against instead of any one transport.
//!
//! ## Implementors
//! - [`crate::loopback::LoopbackDriver`] — self-NID only, used for
//!   single-node scenarios.
//! - [`crate::channel_driver::ChannelDriver`] — multi-node in-process
//!   transport over an in-memory registry, used by integration tests.
//! - [`crate::fault::FaultInjectingDriver`] — decorator that drops
//!   traffic to specific NIDs on demand (`fail_nid`, §6.5).

use lnet_core::Result;
use lnet_wire::{Header, Nid};

/// A unit of wire traffic as handed to or received from a driver: a
/// decoded header plus its payload bytes.
pub type WireMessage = (Header, Vec<u8>);

/// The minimal surface a transport needs from a link.
///
/// Implementations are non-blocking: `send` either accepts the message
/// or reports a reason it could not (no route, link down), and `recv`/
/// `eager_recv` poll rather than block.
pub trait LinkDriver: Send + Sync {
    /// Hand a header and payload to the link for delivery to `dest`.
    fn send(&self, dest: Nid, header: Header, payload: Vec<u8>) -> Result<()>;

    /// Poll for the next fully received message addressed to this
    /// driver's bound NID, if any.
    fn recv(&self) -> Option<WireMessage>;

    /// Poll for a short message eagerly buffered below the link's eager
    /// threshold. Drivers with no eager/rendezvous distinction may
    /// implement this identically to [`LinkDriver::recv`]; the NI layer
    /// is what actually decides eager-vs-rendezvous handling per message
    /// size, not the driver.
    fn eager_recv(&self) -> Option<WireMessage>;

    /// Liveness probe: is `nid` currently reachable over this link?
    fn query(&self, nid: Nid) -> bool;
}
