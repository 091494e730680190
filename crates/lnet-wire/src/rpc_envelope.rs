//! Length-prefixed RPC request/reply envelope (§6.3).
//!
//! Carried as the payload of a PUT/REPLY message once the RPC service
//! layer (`lnet-rpc`) is in play. Unlike the fixed-size `Header`, the
//! envelope has a fixed preamble followed by a variable number of typed
//! segments, so it is framed with an explicit segment count and a
//! length-prefixed body per segment — the same "preamble + vector of
//! length-prefixed blobs" shape the teacher uses for `ksvc`'s submission
//! batches.

use crate::ids::WireHandle;
use lnet_core::error::{LnetError, Result};

pub const ENVELOPE_MAGIC: u32 = 0x4C4E_4554; // "LNET"
const PREAMBLE_LEN: usize = 48;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum EnvelopeOpcode {
    Request = 1,
    Reply = 2,
    Error = 3,
}

impl EnvelopeOpcode {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            1 => Ok(EnvelopeOpcode::Request),
            2 => Ok(EnvelopeOpcode::Reply),
            3 => Ok(EnvelopeOpcode::Error),
            other => Err(LnetError::protocol(format!("unknown envelope opcode {other}"))),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u16)]
pub enum EnvelopeStatus {
    Ok = 0,
    Dropped = 1,
    ServerBusy = 2,
    Unsupported = 3,
    /// Not the final answer: a deadline extension from the adaptive-
    /// timeout estimator. Carries no segments; `timeout` holds the
    /// granted extension in seconds.
    Extended = 4,
}

impl EnvelopeStatus {
    fn from_u16(v: u16) -> Result<Self> {
        match v {
            0 => Ok(EnvelopeStatus::Ok),
            1 => Ok(EnvelopeStatus::Dropped),
            2 => Ok(EnvelopeStatus::ServerBusy),
            3 => Ok(EnvelopeStatus::Unsupported),
            4 => Ok(EnvelopeStatus::Extended),
            other => Err(LnetError::protocol(format!("unknown envelope status {other}"))),
        }
    }
}

/// One typed, length-prefixed segment of the envelope body (a bulk
/// buffer description, a status blob, etc). Segments are opaque bytes
/// at this layer; `lnet-rpc` interprets `kind`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Segment {
    pub kind: u32,
    pub bytes: Vec<u8>,
}

/// Per-segment byte-swab bit: set when that segment's contents need
/// endian correction on decode (the originator encodes host-native for
/// bulk segments it knows are fixed-width and swabs only if the peer's
/// byte order differs; opaque payloads are carried as-is).
pub type SwabMask = u32;

/// Client advertises willingness to have its deadline silently extended
/// by an early reply (§4.6 "Adaptive timeouts").
pub const FLAG_AT_SUPPORT: u16 = 1 << 0;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RpcEnvelope {
    pub opcode: EnvelopeOpcode,
    pub status: EnvelopeStatus,
    pub transno: u64,
    pub xid: u64,
    pub handle: WireHandle,
    pub timeout: u32,
    pub service_time: u32,
    pub swab_mask: SwabMask,
    /// Bitset of `FLAG_*` values; occupies what used to be reserved
    /// preamble padding, so the wire size is unchanged.
    pub flags: u16,
    pub segments: Vec<Segment>,
}

impl RpcEnvelope {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PREAMBLE_LEN + self.segments.iter().map(|s| 8 + s.bytes.len()).sum::<usize>());
        buf.extend_from_slice(&ENVELOPE_MAGIC.to_le_bytes());
        buf.extend_from_slice(&(self.opcode as u32).to_le_bytes());
        buf.extend_from_slice(&(self.status as u16).to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.transno.to_le_bytes());
        buf.extend_from_slice(&self.xid.to_le_bytes());
        buf.extend_from_slice(&self.handle.interface_cookie.0.to_le_bytes());
        buf.extend_from_slice(&self.handle.object_cookie.0.to_le_bytes());
        buf.extend_from_slice(&self.timeout.to_le_bytes());
        buf.extend_from_slice(&self.service_time.to_le_bytes());
        buf.extend_from_slice(&self.swab_mask.to_le_bytes());
        buf.extend_from_slice(&(self.segments.len() as u32).to_le_bytes());
        for seg in &self.segments {
            buf.extend_from_slice(&seg.kind.to_le_bytes());
            buf.extend_from_slice(&(seg.bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(&seg.bytes);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PREAMBLE_LEN {
            return Err(LnetError::protocol(format!(
                "rpc envelope shorter than preamble: {} < {PREAMBLE_LEN}",
                buf.len()
            )));
        }
        let mut off = 0usize;
        let u16_at = |o: usize| u16::from_le_bytes(buf[o..o + 2].try_into().unwrap());
        let u32_at = |o: usize| u32::from_le_bytes(buf[o..o + 4].try_into().unwrap());
        let u64_at = |o: usize| u64::from_le_bytes(buf[o..o + 8].try_into().unwrap());

        let magic = u32_at(off);
        off += 4;
        if magic != ENVELOPE_MAGIC {
            return Err(LnetError::protocol(format!("bad envelope magic {magic:#x}")));
        }
        let opcode = EnvelopeOpcode::from_u32(u32_at(off))?;
        off += 4;
        let status = EnvelopeStatus::from_u16(u16_at(off))?;
        off += 2;
        let flags = u16_at(off);
        off += 2;
        let transno = u64_at(off);
        off += 8;
        let xid = u64_at(off);
        off += 8;
        let interface_cookie = u64_at(off);
        off += 8;
        let object_cookie = u64_at(off);
        off += 8;
        let timeout = u32_at(off);
        off += 4;
        let service_time = u32_at(off);
        off += 4;
        let swab_mask = u32_at(off);
        off += 4;
        let segment_count = u32_at(off) as usize;
        off += 4;
        debug_assert_eq!(off, PREAMBLE_LEN);

        let mut segments = Vec::with_capacity(segment_count);
        for _ in 0..segment_count {
            if off + 8 > buf.len() {
                return Err(LnetError::protocol("truncated segment header"));
            }
            let kind = u32_at(off);
            off += 4;
            let len = u32_at(off) as usize;
            off += 4;
            if off + len > buf.len() {
                return Err(LnetError::protocol("truncated segment body"));
            }
            segments.push(Segment { kind, bytes: buf[off..off + len].to_vec() });
            off += len;
        }

        Ok(RpcEnvelope {
            opcode,
            status,
            transno,
            xid,
            handle: WireHandle {
                interface_cookie: crate::ids::Cookie(interface_cookie),
                object_cookie: crate::ids::Cookie(object_cookie),
            },
            timeout,
            service_time,
            swab_mask,
            flags,
            segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Cookie;

    fn sample() -> RpcEnvelope {
        RpcEnvelope {
            opcode: EnvelopeOpcode::Request,
            status: EnvelopeStatus::Ok,
            transno: 42,
            xid: 7,
            handle: WireHandle { interface_cookie: Cookie(1), object_cookie: Cookie(2) },
            timeout: 5_000,
            service_time: 0,
            swab_mask: 0,
            flags: FLAG_AT_SUPPORT,
            segments: vec![
                Segment { kind: 1, bytes: vec![1, 2, 3, 4] },
                Segment { kind: 2, bytes: vec![] },
            ],
        }
    }

    #[test]
    fn roundtrip_with_segments() {
        let env = sample();
        let buf = env.encode();
        let decoded = RpcEnvelope::decode(&buf).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn roundtrip_no_segments() {
        let mut env = sample();
        env.segments.clear();
        env.opcode = EnvelopeOpcode::Reply;
        assert_eq!(RpcEnvelope::decode(&env.encode()).unwrap(), env);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut buf = sample().encode();
        buf[0] = 0xff;
        assert!(RpcEnvelope::decode(&buf).is_err());
    }

    #[test]
    fn truncated_segment_rejected() {
        let mut buf = sample().encode();
        buf.truncate(buf.len() - 2);
        assert!(RpcEnvelope::decode(&buf).is_err());
    }
}
