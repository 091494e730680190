//! # lnet-wire
//!
//! On-wire identifiers, the fixed message header (§6.2), and the RPC
//! envelope codec (§6.3). Nothing in this crate touches matching,
//! credits, or drivers — it only knows how to turn structured values
//! into bytes and back.

pub mod header;
pub mod ids;
pub mod rpc_envelope;

pub use header::{Header, MessageType, OpUnion, HEADER_LEN};
pub use ids::{Cookie, CookieMinter, Nid, Pid, ProcessId, WireHandle};
pub use rpc_envelope::{EnvelopeOpcode, EnvelopeStatus, RpcEnvelope, Segment, ENVELOPE_MAGIC, FLAG_AT_SUPPORT};
