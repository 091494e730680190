//! Request/reply service runtime built on top of the core fabric: rqbd
//! pools, the HP/normal dispatch queue, the adaptive-timeout machinery,
//! and difficult-reply tracking (§4.6).

pub mod queue;
pub mod reply;
pub mod rqbd;
pub mod service;
pub mod timeout;

pub use queue::{DualQueue, HPREQ_RATIO};
pub use reply::ReplyPool;
pub use rqbd::RqbdRing;
pub use service::{Handler, HandlerReply, IncomingRequest, Service, ServiceConfig};
pub use timeout::{AtEstimator, TimedList};
