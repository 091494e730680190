//! Error taxonomy (§7).
//!
//! Plain enum + hand-written `Display`, the same shape the teacher uses
//! for `SchedError` and `KsvcError` — no `thiserror`, since neither
//! teacher crate pulls it in and the pattern needs nothing more.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LnetError {
    /// Bad portal index, null target, malformed header.
    InvalidArgument { detail: String },
    /// Wire-format violation, wrong destination NID, bad size.
    Protocol { detail: String },
    /// No alive route or no eligible source NI.
    Unreachable { detail: String },
    /// Payload exceeds MD length without TRUNCATE. The MD is not consumed.
    Overflow { rlength: u32, mlength: u32 },
    /// No MD matched and the portal is not lazy (or the op was a GET).
    NoMatch,
    /// MD used up; not itself an error, but modeled here so callers can
    /// distinguish "exhausted, now unlinking" from a genuine fault.
    Exhausted,
    /// RPC deadline exceeded.
    Timeout,
    /// Node or service is stopping; the message/request is finalized with
    /// this in place of its normal completion.
    Shutdown { detail: String },
    /// Allocation failed during message or buffer creation.
    ResourceExhausted { detail: String },
    /// A test hook (`fail_nid`) dropped the message intentionally.
    Simulated,
}

impl fmt::Display for LnetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { detail } => write!(f, "invalid argument: {detail}"),
            Self::Protocol { detail } => write!(f, "protocol error: {detail}"),
            Self::Unreachable { detail } => write!(f, "unreachable: {detail}"),
            Self::Overflow { rlength, mlength } => {
                write!(f, "overflow: rlength {rlength} > mlength {mlength} without TRUNCATE")
            }
            Self::NoMatch => write!(f, "no matching entry"),
            Self::Exhausted => write!(f, "memory descriptor exhausted"),
            Self::Timeout => write!(f, "timed out"),
            Self::Shutdown { detail } => write!(f, "shutdown: {detail}"),
            Self::ResourceExhausted { detail } => write!(f, "resource exhausted: {detail}"),
            Self::Simulated => write!(f, "simulated failure"),
        }
    }
}

impl std::error::Error for LnetError {}

pub type Result<T> = std::result::Result<T, LnetError>;

impl LnetError {
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidArgument { detail: detail.into() }
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol { detail: detail.into() }
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self::Unreachable { detail: detail.into() }
    }

    pub fn shutdown(detail: impl Into<String>) -> Self {
        Self::Shutdown { detail: detail.into() }
    }

    pub fn resource_exhausted(detail: impl Into<String>) -> Self {
        Self::ResourceExhausted { detail: detail.into() }
    }
}
