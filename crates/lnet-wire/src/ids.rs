//! Flat network identifiers (§3 "Identifiers").
//!
//! `Nid`/`Pid` follow the same `#[repr(transparent)]` newtype-with-
//! sentinel idiom as the teacher's `GVThreadId` and `CorrId`: a bare
//! integer, a reserved sentinel value, and cheap conversions.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 64-bit opaque network interface identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Nid(pub u64);

impl Nid {
    pub const ANY: Nid = Nid(u64::MAX);

    #[inline]
    pub const fn is_any(&self) -> bool {
        self.0 == Self::ANY.0
    }

    /// Matches `other` if this is a concrete NID equal to `other`, or if
    /// either side is the `ANY` wildcard.
    #[inline]
    pub fn matches(&self, other: Nid) -> bool {
        self.is_any() || other.is_any() || *self == other
    }
}

impl fmt::Debug for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() { write!(f, "Nid(ANY)") } else { write!(f, "Nid({:#x})", self.0) }
    }
}

/// 32-bit process identifier. High bit is the USERFLAG.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pid(pub u32);

impl Pid {
    pub const ANY: Pid = Pid(u32::MAX);
    pub const USERFLAG: u32 = 1 << 31;

    #[inline]
    pub const fn is_any(&self) -> bool {
        self.0 == Self::ANY.0
    }

    #[inline]
    pub const fn is_user(&self) -> bool {
        self.0 & Self::USERFLAG != 0
    }

    #[inline]
    pub const fn with_user_flag(self, user: bool) -> Pid {
        if user { Pid(self.0 | Self::USERFLAG) } else { Pid(self.0 & !Self::USERFLAG) }
    }

    #[inline]
    pub fn matches(&self, other: Pid) -> bool {
        self.is_any() || other.is_any() || *self == other
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() { write!(f, "Pid(ANY)") } else { write!(f, "Pid({:#x})", self.0) }
    }
}

/// A (NID, PID) pair naming a process on a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ProcessId {
    pub nid: Nid,
    pub pid: Pid,
}

impl ProcessId {
    pub const ANY: ProcessId = ProcessId { nid: Nid::ANY, pid: Pid::ANY };

    pub const fn new(nid: Nid, pid: Pid) -> Self {
        ProcessId { nid, pid }
    }

    pub fn matches(&self, other: ProcessId) -> bool {
        self.nid.matches(other.nid) && self.pid.matches(other.pid)
    }
}

/// Opaque 64-bit cookie minted monotonically at allocation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Cookie(pub u64);

impl Cookie {
    pub const NONE: Cookie = Cookie(0);

    #[inline]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() { write!(f, "Cookie(NONE)") } else { write!(f, "Cookie({:#x})", self.0) }
    }
}

/// Monotonic per-NI cookie minter. Grounded on the teacher's
/// `SlotAllocator::next_fresh` CAS-loop pattern, specialized to mint
/// ever-increasing cookies instead of recycled slot indices (cookies must
/// never repeat, since a stale remote reference must never resolve to a
/// newer allocation).
pub struct CookieMinter {
    next: AtomicU64,
}

impl CookieMinter {
    pub fn new() -> Self {
        // Cookie 0 is reserved as COOKIE_NONE; start minting at 1.
        CookieMinter { next: AtomicU64::new(1) }
    }

    pub fn mint(&self) -> Cookie {
        Cookie(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CookieMinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Two cookies identifying an object across nodes: which interface
/// allocated it, and which object on that interface.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WireHandle {
    pub interface_cookie: Cookie,
    pub object_cookie: Cookie,
}

impl WireHandle {
    pub const NONE: WireHandle = WireHandle { interface_cookie: Cookie::NONE, object_cookie: Cookie::NONE };

    pub const fn is_none(&self) -> bool {
        self.interface_cookie.is_none() && self.object_cookie.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nid_any_matches_everything() {
        assert!(Nid::ANY.matches(Nid(5)));
        assert!(Nid(5).matches(Nid::ANY));
        assert!(!Nid(5).matches(Nid(6)));
    }

    #[test]
    fn pid_user_flag() {
        let p = Pid(3).with_user_flag(true);
        assert!(p.is_user());
        assert_eq!(p.with_user_flag(false).0, 3);
    }

    #[test]
    fn cookie_minter_never_repeats() {
        let minter = CookieMinter::new();
        let a = minter.mint();
        let b = minter.mint();
        assert_ne!(a, b);
        assert!(!a.is_none());
    }

    #[test]
    fn process_id_wildcard_match() {
        let any = ProcessId::ANY;
        let concrete = ProcessId::new(Nid(1), Pid(2));
        assert!(any.matches(concrete));
        assert!(concrete.matches(any));
    }
}
