//! Match entry (§3 "Match entry").

use lnet_core::Handle;
use lnet_wire::{Nid, Pid};

use crate::md::MdHandle;

/// Where a newly attached ME lands in its match-table list, and (for
/// wildcard portals) whether it is replicated to every CPU partition or
/// posted only to the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    Before,
    After,
    Local,
}

#[derive(Clone, Copy, Debug)]
pub struct Me {
    pub nid: Nid,
    pub pid: Pid,
    pub match_bits: u64,
    pub ignore_bits: u64,
    pub op_put: bool,
    pub op_get: bool,
    pub portal_index: u32,
    pub md: Option<MdHandle>,
}

impl Me {
    pub fn new(nid: Nid, pid: Pid, match_bits: u64, ignore_bits: u64, portal_index: u32) -> Self {
        Me { nid, pid, match_bits, ignore_bits, op_put: true, op_get: true, portal_index, md: None }
    }

    /// A wildcard ME accepts any sender; a unique ME names exactly one.
    pub fn is_wildcard(&self) -> bool {
        self.nid.is_any() && self.pid.is_any()
    }

    pub fn matches_sender(&self, nid: Nid, pid: Pid) -> bool {
        self.nid.matches(nid) && self.pid.matches(pid)
    }

    pub fn matches_bits(&self, incoming: u64) -> bool {
        (self.match_bits ^ incoming) & !self.ignore_bits == 0
    }
}

pub type MeHandle = Handle<Me>;
