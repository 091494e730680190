//! Memory descriptor (§3 "Memory descriptor").

use lnet_core::Handle;

/// A scatter/gather region registered for matching. `Bytes` fragments are
/// plain owned buffers (the only kind exercised by the in-process drivers
/// this workspace ships); `Kiov` fragments model the page-based variant as
/// opaque `(page_id, offset, len)` tags with no backing memory, since no
/// driver here needs real page pinning.
#[derive(Clone, Debug)]
pub enum Iov {
    Bytes(Vec<Vec<u8>>),
    Kiov(Vec<KiovFragment>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KiovFragment {
    pub page_id: u64,
    pub offset: u32,
    pub len: u32,
}

impl Iov {
    pub fn total_len(&self) -> u32 {
        match self {
            Iov::Bytes(frags) => frags.iter().map(|f| f.len() as u32).sum(),
            Iov::Kiov(frags) => frags.iter().map(|f| f.len).sum(),
        }
    }

    pub fn niov(&self) -> u32 {
        match self {
            Iov::Bytes(frags) => frags.len() as u32,
            Iov::Kiov(frags) => frags.len() as u32,
        }
    }
}

/// Per-MD option flags (§3: "options bitset").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MdOptions {
    pub op_put: bool,
    pub op_get: bool,
    pub manage_remote: bool,
    pub max_size: bool,
    pub truncate: bool,
    pub ack_disable: bool,
    pub auto_unlink: bool,
}

impl MdOptions {
    pub fn accepts(&self, op: crate::engine::Op) -> bool {
        match op {
            crate::engine::Op::Put => self.op_put,
            crate::engine::Op::Get => self.op_get,
        }
    }
}

/// `threshold`: a signed match-commit counter, or `Inf` (never decremented,
/// per the Open Question decision recorded in DESIGN.md).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Threshold {
    Finite(i64),
    Inf,
}

impl Threshold {
    pub fn decrement(&mut self) {
        if let Threshold::Finite(n) = self {
            *n -= 1;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Threshold::Finite(n) if *n <= 0)
    }
}

#[derive(Clone)]
pub struct Md {
    pub iov: Iov,
    pub offset: u32,
    pub max_size: Option<u32>,
    pub options: MdOptions,
    pub threshold: Threshold,
    pub refcount: u32,
    /// Set once unlink has been requested (explicitly or via AUTO_UNLINK);
    /// the MD is released by the arena only once refcount also reaches 0.
    pub unlink_pending: bool,
    pub event_queue: Option<lnet_core::Sender<crate::event::Event>>,
}

impl std::fmt::Debug for Md {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Md")
            .field("offset", &self.offset)
            .field("max_size", &self.max_size)
            .field("options", &self.options)
            .field("threshold", &self.threshold)
            .field("refcount", &self.refcount)
            .field("unlink_pending", &self.unlink_pending)
            .field("has_event_queue", &self.event_queue.is_some())
            .finish()
    }
}

impl Md {
    pub fn new(iov: Iov, options: MdOptions, threshold: Threshold) -> Self {
        Md {
            iov,
            offset: 0,
            max_size: None,
            options,
            threshold,
            refcount: 0,
            unlink_pending: false,
            event_queue: None,
        }
    }

    pub fn length(&self) -> u32 {
        self.iov.total_len()
    }

    pub fn niov(&self) -> u32 {
        self.iov.niov()
    }

    pub fn is_exhausted(&self) -> bool {
        self.threshold.is_exhausted()
    }

    /// True once the arena slot backing this MD is safe to release.
    pub fn is_releasable(&self) -> bool {
        self.unlink_pending && self.refcount == 0
    }

    pub fn emit(&self, event: crate::event::Event) {
        if let Some(q) = &self.event_queue {
            // Silent drop when the queue is full or closed is normative (§9).
            let _ = q.try_send(event);
        }
    }

    /// Scatter `data` into the iov starting at scatter-gather `offset`,
    /// spanning fragments as needed. No-op on `Kiov`, which has no real
    /// backing memory in this workspace's in-process drivers.
    pub fn write_at(&mut self, offset: u32, data: &[u8]) {
        let Iov::Bytes(frags) = &mut self.iov else { return };
        let mut skip = offset as usize;
        let mut data = data;
        for frag in frags.iter_mut() {
            if data.is_empty() {
                break;
            }
            if skip >= frag.len() {
                skip -= frag.len();
                continue;
            }
            let start = skip;
            skip = 0;
            let room = frag.len() - start;
            let n = room.min(data.len());
            frag[start..start + n].copy_from_slice(&data[..n]);
            data = &data[n..];
        }
    }

    /// Gather `len` bytes out of the iov starting at `offset`. No-op
    /// (empty) on `Kiov`.
    pub fn read_at(&self, offset: u32, len: u32) -> Vec<u8> {
        let Iov::Bytes(frags) = &self.iov else { return Vec::new() };
        let mut out = Vec::with_capacity(len as usize);
        let mut skip = offset as usize;
        let mut remaining = len as usize;
        for frag in frags {
            if remaining == 0 {
                break;
            }
            if skip >= frag.len() {
                skip -= frag.len();
                continue;
            }
            let start = skip;
            skip = 0;
            let n = (frag.len() - start).min(remaining);
            out.extend_from_slice(&frag[start..start + n]);
            remaining -= n;
        }
        out
    }
}

pub type MdHandle = Handle<Md>;
