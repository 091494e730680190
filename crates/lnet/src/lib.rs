//! # lnet
//!
//! Facade crate binding the matching engine (`lnet-match`), the
//! credit/routing/send-path layer (`lnet-transport`), the request/reply
//! service runtime (`lnet-rpc`), and the driver contract
//! (`lnet-drivers`) into one configurable [`Node`]: §6.4's
//! configuration surface and §6.5's control surface.
//!
//! Everything interesting about matching, credits, and service
//! scheduling lives in the crates above; this one is deliberately thin.

pub mod config;
pub mod control;
pub mod node;

pub use config::{Config, NiConfig, ServiceConfig};
pub use node::Node;

pub use lnet_core::{LnetError, Result};
pub use lnet_drivers::{ChannelDriver, ChannelNetwork, FaultInjectingDriver, LinkDriver, LoopbackDriver};
pub use lnet_match::{Iov, Md, MdOptions, Me, Position, Threshold};
pub use lnet_rpc::{Handler, HandlerReply, IncomingRequest, Service};
pub use lnet_transport::{NetId, Ni, NiId};
pub use lnet_wire::{Nid, Pid, ProcessId};
