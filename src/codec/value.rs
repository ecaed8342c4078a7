//! Particle encoding: typed values to and from wire bytes.
//!
//! A particle is a type tag, an explicit 32-bit payload length and the
//! payload bytes. Lengths are explicit rather than terminator-derived, so
//! string and blob payloads may contain any byte value. `decode` is the
//! exact inverse of `encode` for every representable value.

use crate::digest::{KeyDigest, DIGEST_LEN};
use crate::error::{Error, Result};
use crate::types::{BlobKind, Value};
use bytes::{Buf, BufMut, BytesMut};

/// Payload length in bytes for a value's canonical encoding.
pub fn payload_len(v: &Value) -> usize {
    match v {
        Value::Null => 0,
        Value::Int(_) | Value::Float(_) | Value::Timestamp(_) => 8,
        Value::Str(s) => s.len(),
        Value::Blob(b) | Value::LanguageBlob(_, b) => b.len(),
        Value::Digest(_) => DIGEST_LEN,
    }
}

/// Append a value's canonical payload bytes (no tag, no length).
pub fn write_payload(v: &Value, buf: &mut BytesMut) {
    match v {
        Value::Null => {}
        Value::Int(i) => buf.put_i64(*i),
        Value::Float(f) => buf.put_f64(*f),
        Value::Timestamp(t) => buf.put_i64(*t),
        Value::Str(s) => buf.put_slice(s.as_bytes()),
        Value::Blob(b) | Value::LanguageBlob(_, b) => buf.put_slice(b),
        Value::Digest(d) => buf.put_slice(d.as_bytes()),
    }
}

/// Append a full particle: tag, payload length, payload.
pub fn encode(v: &Value, buf: &mut BytesMut) {
    buf.put_u8(v.particle_type());
    buf.put_u32(payload_len(v) as u32);
    write_payload(v, buf);
}

/// Parse a full particle written by [`encode`].
pub fn decode(buf: &mut BytesMut) -> Result<Value> {
    if buf.remaining() < 5 {
        return Err(Error::Malformed("short particle header".into()));
    }
    let tag = buf.get_u8();
    let len = buf.get_u32() as usize;
    read_payload(tag, len, buf)
}

/// Parse a payload whose tag and length were carried elsewhere (message
/// fields and operation entries declare them in their own envelopes).
pub fn read_payload(tag: u8, len: usize, buf: &mut BytesMut) -> Result<Value> {
    if buf.remaining() < len {
        return Err(Error::Malformed(format!(
            "declared particle length {} exceeds remaining {}",
            len,
            buf.remaining()
        )));
    }
    let value = match tag {
        0 => {
            if len != 0 {
                return Err(Error::Malformed("null particle with payload".into()));
            }
            Value::Null
        }
        1 => Value::Int(read_i64(len, buf)?),
        2 => {
            if len != 8 {
                return Err(Error::Malformed("float particle must be 8 bytes".into()));
            }
            Value::Float(buf.get_f64())
        }
        3 => {
            let bytes = buf.copy_to_bytes(len);
            let s = String::from_utf8(bytes.to_vec())
                .map_err(|e| Error::Malformed(format!("invalid utf-8 string: {}", e)))?;
            Value::Str(s)
        }
        4 => Value::Blob(buf.copy_to_bytes(len).to_vec()),
        5 => Value::Timestamp(read_i64(len, buf)?),
        6 => {
            if len != DIGEST_LEN {
                return Err(Error::Malformed(format!(
                    "digest particle must be {} bytes",
                    DIGEST_LEN
                )));
            }
            let mut bytes = [0u8; DIGEST_LEN];
            buf.copy_to_slice(&mut bytes);
            Value::Digest(KeyDigest::from_bytes(bytes))
        }
        7 => Value::LanguageBlob(BlobKind::Java, buf.copy_to_bytes(len).to_vec()),
        8 => Value::LanguageBlob(BlobKind::CSharp, buf.copy_to_bytes(len).to_vec()),
        9 => Value::LanguageBlob(BlobKind::Python, buf.copy_to_bytes(len).to_vec()),
        10 => Value::LanguageBlob(BlobKind::Ruby, buf.copy_to_bytes(len).to_vec()),
        other => {
            // Unknown tags are errors, never silently coerced.
            return Err(Error::Malformed(format!("unknown particle type {}", other)));
        }
    };
    Ok(value)
}

fn read_i64(len: usize, buf: &mut BytesMut) -> Result<i64> {
    if len != 8 {
        return Err(Error::Malformed(format!(
            "integer particle must be 8 bytes, got {}",
            len
        )));
    }
    Ok(buf.get_i64())
}
