//! Protocol framing: the outer proto header and the message header.
//!
//! All multi-byte fields are big-endian. The outer header carries the
//! protocol version, the frame type (info text or binary message) and a
//! 48-bit body size; the message header carries the operation flags,
//! result code, generation, TTLs and the field/operation counts.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Protocol version spoken by this client.
pub const PROTO_VERSION: u8 = 2;

/// Frame type: text info request/response.
pub const PROTO_TYPE_INFO: u8 = 1;

/// Frame type: binary message (read/write/delete/operate).
pub const PROTO_TYPE_MESSAGE: u8 = 3;

/// Byte length of the outer proto header.
pub const PROTO_HEADER_LEN: usize = 8;

/// Byte length of the message header.
pub const MSG_HEADER_LEN: usize = 22;

/// Upper bound on a frame body; larger declared sizes are rejected as
/// malformed before any allocation happens.
pub const PROTO_SIZE_MAX: u64 = 128 * 1024 * 1024;

/// info1: this is a read.
pub const INFO1_READ: u8 = 0x01;
/// info1: read all bins, no per-bin operations follow.
pub const INFO1_GET_ALL: u8 = 0x02;

/// info2: this is a write.
pub const INFO2_WRITE: u8 = 0x01;
/// info2: delete the record.
pub const INFO2_DELETE: u8 = 0x02;
/// info2: the generation field carries an expected generation.
pub const INFO2_GENERATION: u8 = 0x04;

/// Field type: namespace name.
pub const FIELD_NAMESPACE: u8 = 0;
/// Field type: set name.
pub const FIELD_SET: u8 = 1;
/// Field type: key value (tag byte + payload).
pub const FIELD_KEY: u8 = 2;
/// Field type: precomputed 20-byte digest.
pub const FIELD_DIGEST: u8 = 4;

/// Outer frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoHeader {
    pub version: u8,
    pub msg_type: u8,
    /// Body length in bytes, excluding this header.
    pub size: u64,
}

impl ProtoHeader {
    pub fn new(msg_type: u8, size: u64) -> Self {
        Self {
            version: PROTO_VERSION,
            msg_type,
            size,
        }
    }

    /// Append the 8-byte header to `buf`.
    pub fn write(&self, buf: &mut BytesMut) {
        let word = ((self.version as u64) << 56)
            | ((self.msg_type as u64) << 48)
            | (self.size & 0xFFFF_FFFF_FFFF);
        buf.put_u64(word);
    }

    /// Parse an 8-byte header.
    pub fn read(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < PROTO_HEADER_LEN {
            return Err(Error::Malformed("short proto header".into()));
        }
        let word = buf.get_u64();
        let header = Self {
            version: (word >> 56) as u8,
            msg_type: (word >> 48) as u8,
            size: word & 0xFFFF_FFFF_FFFF,
        };
        if header.version != PROTO_VERSION {
            return Err(Error::Malformed(format!(
                "unsupported protocol version {}",
                header.version
            )));
        }
        if header.size > PROTO_SIZE_MAX {
            return Err(Error::Malformed(format!(
                "declared frame size {} exceeds limit",
                header.size
            )));
        }
        Ok(header)
    }
}

/// Message header, immediately following the proto header in a
/// [`PROTO_TYPE_MESSAGE`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgHeader {
    pub info1: u8,
    pub info2: u8,
    pub info3: u8,
    pub result_code: u8,
    /// Record generation: expected generation on requests with
    /// [`INFO2_GENERATION`], current generation on responses.
    pub generation: u32,
    /// Record TTL: expiration seconds on writes, remaining TTL on reads.
    pub record_ttl: u32,
    /// Transaction deadline hint for the server, milliseconds.
    pub transaction_ttl: u32,
    pub n_fields: u16,
    pub n_ops: u16,
}

impl MsgHeader {
    /// Append the 22-byte header to `buf`.
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(MSG_HEADER_LEN as u8);
        buf.put_u8(self.info1);
        buf.put_u8(self.info2);
        buf.put_u8(self.info3);
        buf.put_u8(0); // unused
        buf.put_u8(self.result_code);
        buf.put_u32(self.generation);
        buf.put_u32(self.record_ttl);
        buf.put_u32(self.transaction_ttl);
        buf.put_u16(self.n_fields);
        buf.put_u16(self.n_ops);
    }

    /// Parse a 22-byte header.
    pub fn read(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < MSG_HEADER_LEN {
            return Err(Error::Malformed("short message header".into()));
        }
        let header_sz = buf.get_u8();
        if header_sz as usize != MSG_HEADER_LEN {
            return Err(Error::Malformed(format!(
                "unexpected message header size {}",
                header_sz
            )));
        }
        let info1 = buf.get_u8();
        let info2 = buf.get_u8();
        let info3 = buf.get_u8();
        let _unused = buf.get_u8();
        let result_code = buf.get_u8();
        Ok(Self {
            info1,
            info2,
            info3,
            result_code,
            generation: buf.get_u32(),
            record_ttl: buf.get_u32(),
            transaction_ttl: buf.get_u32(),
            n_fields: buf.get_u16(),
            n_ops: buf.get_u16(),
        })
    }
}
