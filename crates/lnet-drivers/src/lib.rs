//! # lnet-drivers
//!
//! The [`driver::LinkDriver`] contract (§6.1) and the in-process
//! implementations used both as real transports for single-process
//! deployments and as the harness for integration tests: loopback,
//! a multi-node in-memory network, and a fault-injecting decorator.

pub mod channel_driver;
pub mod driver;
pub mod fault;
pub mod loopback;

pub use channel_driver::{ChannelDriver, ChannelNetwork};
pub use driver::{LinkDriver, WireMessage};
pub use fault::FaultInjectingDriver;
pub use loopback::LoopbackDriver;
