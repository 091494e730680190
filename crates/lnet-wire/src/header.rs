//! Fixed 72-byte wire header (§6.2).
//!
//! All multi-byte fields are little-endian on the wire regardless of
//! host endianness, so encode/decode is hand-written rather than a
//! `repr(C)` transmute — the same "plain fixed-layout struct shared
//! between components" idiom the teacher uses for `SubmitEntry`, but
//! with an explicit byte-level codec since this one actually crosses a
//! network link.

use crate::ids::{Cookie, Nid, Pid, WireHandle};
use lnet_core::error::{LnetError, Result};

pub const HEADER_LEN: usize = 72;
const OP_UNION_LEN: usize = 40;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum MessageType {
    Put = 1,
    Get = 2,
    Reply = 3,
    Ack = 4,
    Hello = 5,
}

impl MessageType {
    fn from_u32(v: u32) -> Result<Self> {
        match v {
            1 => Ok(MessageType::Put),
            2 => Ok(MessageType::Get),
            3 => Ok(MessageType::Reply),
            4 => Ok(MessageType::Ack),
            5 => Ok(MessageType::Hello),
            other => Err(LnetError::protocol(format!("unknown wire message type {other}"))),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpUnion {
    Put { ack_wmd: WireHandle, match_bits: u64, hdr_data: u64, ptl_index: u32, offset: u32 },
    Get { return_wmd: WireHandle, match_bits: u64, ptl_index: u32, src_offset: u32, sink_length: u32 },
    Reply { dst_wmd: WireHandle },
    Ack { dst_wmd: WireHandle, match_bits: u64, mlength: u32 },
    Hello { opaque: [u8; OP_UNION_LEN] },
}

impl OpUnion {
    fn encode(&self, buf: &mut [u8; OP_UNION_LEN]) {
        buf.fill(0);
        match *self {
            OpUnion::Put { ack_wmd, match_bits, hdr_data, ptl_index, offset } => {
                buf[0..8].copy_from_slice(&ack_wmd.interface_cookie.0.to_le_bytes());
                buf[8..16].copy_from_slice(&ack_wmd.object_cookie.0.to_le_bytes());
                buf[16..24].copy_from_slice(&match_bits.to_le_bytes());
                buf[24..32].copy_from_slice(&hdr_data.to_le_bytes());
                buf[32..36].copy_from_slice(&ptl_index.to_le_bytes());
                buf[36..40].copy_from_slice(&offset.to_le_bytes());
            }
            OpUnion::Get { return_wmd, match_bits, ptl_index, src_offset, sink_length } => {
                buf[0..8].copy_from_slice(&return_wmd.interface_cookie.0.to_le_bytes());
                buf[8..16].copy_from_slice(&return_wmd.object_cookie.0.to_le_bytes());
                buf[16..24].copy_from_slice(&match_bits.to_le_bytes());
                buf[24..28].copy_from_slice(&ptl_index.to_le_bytes());
                buf[28..32].copy_from_slice(&src_offset.to_le_bytes());
                buf[32..36].copy_from_slice(&sink_length.to_le_bytes());
            }
            OpUnion::Reply { dst_wmd } => {
                buf[0..8].copy_from_slice(&dst_wmd.interface_cookie.0.to_le_bytes());
                buf[8..16].copy_from_slice(&dst_wmd.object_cookie.0.to_le_bytes());
            }
            OpUnion::Ack { dst_wmd, match_bits, mlength } => {
                buf[0..8].copy_from_slice(&dst_wmd.interface_cookie.0.to_le_bytes());
                buf[8..16].copy_from_slice(&dst_wmd.object_cookie.0.to_le_bytes());
                buf[16..24].copy_from_slice(&match_bits.to_le_bytes());
                buf[24..28].copy_from_slice(&mlength.to_le_bytes());
            }
            OpUnion::Hello { opaque } => buf.copy_from_slice(&opaque),
        }
    }

    fn decode(ty: MessageType, buf: &[u8; OP_UNION_LEN]) -> Self {
        let u64_at = |o: usize| u64::from_le_bytes(buf[o..o + 8].try_into().unwrap());
        let u32_at = |o: usize| u32::from_le_bytes(buf[o..o + 4].try_into().unwrap());
        let wmd_at = |o: usize| WireHandle {
            interface_cookie: Cookie(u64_at(o)),
            object_cookie: Cookie(u64_at(o + 8)),
        };
        match ty {
            MessageType::Put => OpUnion::Put {
                ack_wmd: wmd_at(0),
                match_bits: u64_at(16),
                hdr_data: u64_at(24),
                ptl_index: u32_at(32),
                offset: u32_at(36),
            },
            MessageType::Get => OpUnion::Get {
                return_wmd: wmd_at(0),
                match_bits: u64_at(16),
                ptl_index: u32_at(24),
                src_offset: u32_at(28),
                sink_length: u32_at(32),
            },
            MessageType::Reply => OpUnion::Reply { dst_wmd: wmd_at(0) },
            MessageType::Ack => OpUnion::Ack { dst_wmd: wmd_at(0), match_bits: u64_at(16), mlength: u32_at(24) },
            MessageType::Hello => OpUnion::Hello { opaque: *buf },
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Header {
    pub msg_type: MessageType,
    pub payload_length: u32,
    pub dest_nid: Nid,
    pub src_nid: Nid,
    pub dest_pid: Pid,
    pub src_pid: Pid,
    pub op: OpUnion,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&(self.msg_type as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.payload_length.to_le_bytes());
        buf[8..16].copy_from_slice(&self.dest_nid.0.to_le_bytes());
        buf[16..24].copy_from_slice(&self.src_nid.0.to_le_bytes());
        buf[24..28].copy_from_slice(&self.dest_pid.0.to_le_bytes());
        buf[28..32].copy_from_slice(&self.src_pid.0.to_le_bytes());
        let mut op_buf = [0u8; OP_UNION_LEN];
        self.op.encode(&mut op_buf);
        buf[32..72].copy_from_slice(&op_buf);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(LnetError::protocol(format!(
                "header too short: {} < {HEADER_LEN}",
                buf.len()
            )));
        }
        let u32_at = |o: usize| u32::from_le_bytes(buf[o..o + 4].try_into().unwrap());
        let u64_at = |o: usize| u64::from_le_bytes(buf[o..o + 8].try_into().unwrap());
        let msg_type = MessageType::from_u32(u32_at(0))?;
        let payload_length = u32_at(4);
        let dest_nid = Nid(u64_at(8));
        let src_nid = Nid(u64_at(16));
        let dest_pid = Pid(u32_at(24));
        let src_pid = Pid(u32_at(28));
        let mut op_buf = [0u8; OP_UNION_LEN];
        op_buf.copy_from_slice(&buf[32..72]);
        let op = OpUnion::decode(msg_type, &op_buf);

        match msg_type {
            MessageType::Ack | MessageType::Get if payload_length != 0 => {
                return Err(LnetError::protocol("ACK/GET must carry zero payload_length"));
            }
            _ => {}
        }

        Ok(Header { msg_type, payload_length, dest_nid, src_nid, dest_pid, src_pid, op })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_put() -> Header {
        Header {
            msg_type: MessageType::Put,
            payload_length: 128,
            dest_nid: Nid(1),
            src_nid: Nid(2),
            dest_pid: Pid(7),
            src_pid: Pid(8),
            op: OpUnion::Put {
                ack_wmd: WireHandle { interface_cookie: Cookie(9), object_cookie: Cookie(10) },
                match_bits: 0x42,
                hdr_data: 0xdead_beef,
                ptl_index: 4,
                offset: 0,
            },
        }
    }

    #[test]
    fn roundtrip_put() {
        let h = sample_put();
        let buf = h.encode();
        assert_eq!(buf.len(), HEADER_LEN);
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn roundtrip_get_reply_ack() {
        let get = Header {
            msg_type: MessageType::Get,
            payload_length: 0,
            dest_nid: Nid(1),
            src_nid: Nid(2),
            dest_pid: Pid::ANY,
            src_pid: Pid(1),
            op: OpUnion::Get {
                return_wmd: WireHandle::NONE,
                match_bits: 7,
                ptl_index: 3,
                src_offset: 0,
                sink_length: 64,
            },
        };
        assert_eq!(Header::decode(&get.encode()).unwrap(), get);

        let reply = Header {
            msg_type: MessageType::Reply,
            payload_length: 64,
            dest_nid: Nid(2),
            src_nid: Nid(1),
            dest_pid: Pid(1),
            src_pid: Pid(2),
            op: OpUnion::Reply { dst_wmd: WireHandle { interface_cookie: Cookie(1), object_cookie: Cookie(2) } },
        };
        assert_eq!(Header::decode(&reply.encode()).unwrap(), reply);

        let ack = Header {
            msg_type: MessageType::Ack,
            payload_length: 0,
            dest_nid: Nid(2),
            src_nid: Nid(1),
            dest_pid: Pid(1),
            src_pid: Pid(2),
            op: OpUnion::Ack {
                dst_wmd: WireHandle { interface_cookie: Cookie(3), object_cookie: Cookie(4) },
                match_bits: 0x42,
                mlength: 128,
            },
        };
        assert_eq!(Header::decode(&ack.encode()).unwrap(), ack);
    }

    #[test]
    fn ack_with_nonzero_payload_is_protocol_error() {
        let mut h = sample_put();
        h.msg_type = MessageType::Ack;
        h.payload_length = 1;
        h.op = OpUnion::Ack { dst_wmd: WireHandle::NONE, match_bits: 0, mlength: 0 };
        assert!(Header::decode(&h.encode()).is_err());
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(Header::decode(&[0u8; 10]).is_err());
    }
}
