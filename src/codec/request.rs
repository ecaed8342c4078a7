//! Request message builders.
//!
//! Each builder writes a complete frame (proto header, message header,
//! fields, operations) into a caller-supplied buffer in one pass, sized
//! up front so the buffer grows at most once.

use crate::codec::proto::{
    MsgHeader, ProtoHeader, FIELD_DIGEST, FIELD_KEY, FIELD_NAMESPACE, FIELD_SET, INFO1_GET_ALL,
    INFO1_READ, INFO2_DELETE, INFO2_GENERATION, INFO2_WRITE, MSG_HEADER_LEN, PROTO_TYPE_MESSAGE,
};
use crate::codec::value as value_codec;
use crate::digest::{KeyDigest, DIGEST_LEN};
use crate::error::{Error, Result};
use crate::types::{Bin, Operation, OperationKind, Value, WriteParams, MAX_BIN_NAME_LEN};
use bytes::{BufMut, BytesMut};

/// How the target record is addressed: by set + key value, or by a
/// precomputed digest.
#[derive(Debug, Clone, Copy)]
pub enum KeyRef<'a> {
    Key { set: &'a str, key: &'a Value },
    Digest(&'a KeyDigest),
}

/// Build a read request. `bins: None` reads all bins.
pub fn read(
    buf: &mut BytesMut,
    namespace: &str,
    key: KeyRef<'_>,
    bins: Option<&[&str]>,
    timeout_ms: u32,
) -> Result<()> {
    let mut info1 = INFO1_READ;
    let mut ops_len = 0;
    let mut n_ops = 0u16;
    match bins {
        None => info1 |= INFO1_GET_ALL,
        Some(names) => {
            for name in names {
                check_bin_name(name)?;
                ops_len += op_entry_len(name.len(), 0);
            }
            n_ops = names.len() as u16;
        }
    }

    let header = MsgHeader {
        info1,
        transaction_ttl: timeout_ms,
        n_fields: field_count(&key),
        n_ops,
        ..Default::default()
    };
    write_frame(buf, namespace, key, header, ops_len, |buf| {
        if let Some(names) = bins {
            for name in names {
                write_op_entry(buf, OperationKind::Read.wire_code(), name, &Value::Null);
            }
        }
    });
    Ok(())
}

/// Build a write (put) request.
pub fn write(
    buf: &mut BytesMut,
    namespace: &str,
    key: KeyRef<'_>,
    bins: &[Bin],
    params: &WriteParams,
    timeout_ms: u32,
) -> Result<()> {
    let ops_len: usize = bins
        .iter()
        .map(|b| op_entry_len(b.name.as_str().len(), value_codec::payload_len(&b.value)))
        .sum();

    let header = write_header(params, timeout_ms, field_count(&key), bins.len() as u16);
    write_frame(buf, namespace, key, header, ops_len, |buf| {
        for bin in bins {
            write_op_entry(
                buf,
                OperationKind::Write.wire_code(),
                bin.name.as_str(),
                &bin.value,
            );
        }
    });
    Ok(())
}

/// Build a delete request.
pub fn delete(
    buf: &mut BytesMut,
    namespace: &str,
    key: KeyRef<'_>,
    params: &WriteParams,
    timeout_ms: u32,
) -> Result<()> {
    let mut header = write_header(params, timeout_ms, field_count(&key), 0);
    header.info2 |= INFO2_DELETE;
    write_frame(buf, namespace, key, header, 0, |_| {});
    Ok(())
}

/// Build a compound operate request. Operation order is preserved on the
/// wire; the server applies the sequence in order.
pub fn operate(
    buf: &mut BytesMut,
    namespace: &str,
    key: KeyRef<'_>,
    ops: &[Operation],
    params: &WriteParams,
    timeout_ms: u32,
) -> Result<()> {
    if ops.is_empty() {
        return Err(Error::Client("operate requires at least one operation".into()));
    }
    let ops_len: usize = ops
        .iter()
        .map(|op| op_entry_len(op.bin.as_str().len(), value_codec::payload_len(&op.value)))
        .sum();

    let mut header = write_header(params, timeout_ms, field_count(&key), ops.len() as u16);
    if ops.iter().any(|op| op.kind == OperationKind::Read) {
        header.info1 |= INFO1_READ;
    }
    if !ops
        .iter()
        .any(|op| matches!(op.kind, OperationKind::Write | OperationKind::Add))
    {
        // Pure-read operate: not a write after all.
        header.info2 &= !(INFO2_WRITE | INFO2_GENERATION);
    }
    write_frame(buf, namespace, key, header, ops_len, |buf| {
        for op in ops {
            write_op_entry(buf, op.kind.wire_code(), op.bin.as_str(), &op.value);
        }
    });
    Ok(())
}

fn write_header(params: &WriteParams, timeout_ms: u32, n_fields: u16, n_ops: u16) -> MsgHeader {
    let mut header = MsgHeader {
        info2: INFO2_WRITE,
        record_ttl: params.expiration_secs,
        transaction_ttl: timeout_ms,
        n_fields,
        n_ops,
        ..Default::default()
    };
    if let Some(generation) = params.generation {
        header.info2 |= INFO2_GENERATION;
        header.generation = generation;
    }
    header
}

fn field_count(key: &KeyRef<'_>) -> u16 {
    match key {
        KeyRef::Key { .. } => 3, // namespace, set, key
        KeyRef::Digest(_) => 2,  // namespace, digest
    }
}

fn fields_len(namespace: &str, key: &KeyRef<'_>) -> usize {
    let per_field = 4 + 1; // size + type
    match key {
        KeyRef::Key { set, key } => {
            3 * per_field
                + namespace.len()
                + set.len()
                + 1 // key particle tag
                + value_codec::payload_len(key)
        }
        KeyRef::Digest(_) => 2 * per_field + namespace.len() + DIGEST_LEN,
    }
}

fn write_fields(buf: &mut BytesMut, namespace: &str, key: &KeyRef<'_>) {
    write_field(buf, FIELD_NAMESPACE, namespace.as_bytes());
    match key {
        KeyRef::Key { set, key } => {
            write_field(buf, FIELD_SET, set.as_bytes());
            // Key field: particle tag byte followed by the payload.
            buf.put_u32(1 + 1 + value_codec::payload_len(key) as u32);
            buf.put_u8(FIELD_KEY);
            buf.put_u8(key.particle_type());
            value_codec::write_payload(key, buf);
        }
        KeyRef::Digest(d) => {
            write_field(buf, FIELD_DIGEST, d.as_bytes());
        }
    }
}

fn write_field(buf: &mut BytesMut, field_type: u8, data: &[u8]) {
    buf.put_u32(1 + data.len() as u32);
    buf.put_u8(field_type);
    buf.put_slice(data);
}

/// Byte length of one operation entry.
fn op_entry_len(name_len: usize, payload_len: usize) -> usize {
    4 + 4 + name_len + payload_len
}

fn write_op_entry(buf: &mut BytesMut, op_code: u8, name: &str, value: &Value) {
    let payload = value_codec::payload_len(value);
    buf.put_u32((4 + name.len() + payload) as u32);
    buf.put_u8(op_code);
    buf.put_u8(value.particle_type());
    buf.put_u8(0); // version
    buf.put_u8(name.len() as u8);
    buf.put_slice(name.as_bytes());
    value_codec::write_payload(value, buf);
}

fn write_frame(
    buf: &mut BytesMut,
    namespace: &str,
    key: KeyRef<'_>,
    header: MsgHeader,
    ops_len: usize,
    write_ops: impl FnOnce(&mut BytesMut),
) {
    let body_len = MSG_HEADER_LEN + fields_len(namespace, &key) + ops_len;
    buf.reserve(8 + body_len);
    ProtoHeader::new(PROTO_TYPE_MESSAGE, body_len as u64).write(buf);
    header.write(buf);
    write_fields(buf, namespace, &key);
    write_ops(buf);
}

fn check_bin_name(name: &str) -> Result<()> {
    if name.len() > MAX_BIN_NAME_LEN {
        return Err(Error::Client(format!(
            "bin name '{}' exceeds {} bytes",
            name, MAX_BIN_NAME_LEN
        )));
    }
    Ok(())
}
