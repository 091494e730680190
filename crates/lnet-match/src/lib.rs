//! # lnet-match
//!
//! The portal / match-entry matching engine (§3 "Portal / match-table",
//! §4.1 "Matching engine (C1)"): memory descriptors, match entries,
//! per-CPU-partition match tables, and the `attach_md` /
//! `match_incoming` / `match_against_blocked` operations built on them.
//!
//! Generic over `M`, the caller's own token type for an in-flight
//! message (`lnet-transport` plugs in its `Handle<Message>`); this crate
//! never interprets `M`, it only carries it through the pending queue.

pub mod engine;
pub mod event;
pub mod md;
pub mod me;
pub mod portal;

pub use engine::{AttachResult, IncomingMeta, MatchEngine, MatchOutcome, Op, Pending};
pub use event::{Event, EventKind, EventReceiver, EventSender, MdSnapshot};
pub use md::{Iov, KiovFragment, Md, MdHandle, MdOptions, Threshold};
pub use me::{Me, MeHandle, Position};
pub use portal::{PortalType, BUCKETS};
