//! # lnet-core
//!
//! Platform-agnostic primitives shared by every crate in the `lnet-rs`
//! message fabric: generic arena handles, a spinlock for short critical
//! sections, a bounded event channel, the error taxonomy, and a handful
//! of environment/rate-limiting helpers.
//!
//! Nothing in this crate knows about portals, peers, or the wire format
//! — those live in `lnet-match`, `lnet-transport`, and `lnet-wire`.

pub mod arena;
pub mod channel;
pub mod env;
pub mod error;
pub mod handle;
pub mod ratelimit;
pub mod spinlock;
pub mod switch;

pub use arena::Arena;
pub use channel::{channel, Receiver, Sender};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};
pub use error::{LnetError, Result};
pub use handle::Handle;
pub use ratelimit::RateLimiter;
pub use spinlock::{SpinLock, SpinLockGuard};
pub use switch::with_partition_switch;
