//! # lnet-transport
//!
//! Credits, peers, routing, message lifecycle, and the NI send/receive
//! path (§4.2-§4.4, §6.1) built on top of `lnet-match`'s matching
//! engine and `lnet-drivers`' link abstraction.

pub mod credit;
pub mod message;
pub mod ni;
pub mod peer;
pub mod router;
pub mod router_buffer;
pub mod stats;

pub use credit::CreditPool;
pub use message::{Message, MessageHandle, MessageState};
pub use ni::{Ni, NiId};
pub use peer::{Peer, RouterPeerState};
pub use router::{NetId, RouterTable};
pub use router_buffer::RouterBufferPool;
pub use stats::NiStats;
