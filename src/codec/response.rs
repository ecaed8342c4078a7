//! Response message parsing.
//!
//! Parses the body of a `PROTO_TYPE_MESSAGE` frame (the proto header has
//! already been consumed by the connection's framed read) into the result
//! code, generation counter and returned bin sequence. Bins are sliced out
//! of the single contiguous network read.

use crate::codec::proto::MsgHeader;
use crate::codec::value as value_codec;
use crate::error::{Error, Result, ResultCode};
use crate::types::{Bin, BinName, Record};
use bytes::{Buf, BytesMut};

/// A parsed response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub result: ResultCode,
    pub generation: u32,
    pub expiration: u32,
    pub bins: Vec<Bin>,
}

impl ResponseFrame {
    /// Convert into the caller-visible record.
    pub fn into_record(self) -> Record {
        Record {
            bins: self.bins,
            generation: self.generation,
            expiration: self.expiration,
        }
    }
}

/// Parse a response body.
///
/// Fails with [`Error::Malformed`] whenever a declared length exceeds the
/// remaining buffer; the caller discards the connection as broken in that
/// case.
pub fn parse(buf: &mut BytesMut) -> Result<ResponseFrame> {
    let header = MsgHeader::read(buf)?;

    // Responses may echo fields (namespace, digest); skip them.
    for _ in 0..header.n_fields {
        skip_entry(buf, "field")?;
    }

    let mut bins = Vec::with_capacity(header.n_ops as usize);
    for _ in 0..header.n_ops {
        bins.push(read_bin_op(buf)?);
    }

    Ok(ResponseFrame {
        result: ResultCode::from_u8(header.result_code),
        generation: header.generation,
        expiration: header.record_ttl,
        bins,
    })
}

fn skip_entry(buf: &mut BytesMut, what: &str) -> Result<()> {
    if buf.remaining() < 4 {
        return Err(Error::Malformed(format!("short {} envelope", what)));
    }
    let size = buf.get_u32() as usize;
    if buf.remaining() < size {
        return Err(Error::Malformed(format!(
            "{} size {} exceeds remaining {}",
            what,
            size,
            buf.remaining()
        )));
    }
    buf.advance(size);
    Ok(())
}

fn read_bin_op(buf: &mut BytesMut) -> Result<Bin> {
    if buf.remaining() < 4 {
        return Err(Error::Malformed("short op envelope".into()));
    }
    let size = buf.get_u32() as usize;
    if size < 4 || buf.remaining() < size {
        return Err(Error::Malformed(format!(
            "op size {} invalid for remaining {}",
            size,
            buf.remaining()
        )));
    }
    let _op = buf.get_u8();
    let particle_type = buf.get_u8();
    let _version = buf.get_u8();
    let name_len = buf.get_u8() as usize;
    if size < 4 + name_len {
        return Err(Error::Malformed("op name exceeds op envelope".into()));
    }
    let name_bytes = buf.copy_to_bytes(name_len);
    let name = std::str::from_utf8(&name_bytes)
        .map_err(|_| Error::Malformed("bin name is not utf-8".into()))?
        .to_string();

    let payload_len = size - 4 - name_len;
    let value = value_codec::read_payload(particle_type, payload_len, buf)?;

    Ok(Bin {
        name: BinName::new(name).map_err(|_| Error::Malformed("bin name too long".into()))?,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use bytes::BufMut;

    fn build_body(result_code: u8, generation: u32, bins: &[(&str, Value)]) -> BytesMut {
        let mut buf = BytesMut::new();
        let header = MsgHeader {
            result_code,
            generation,
            record_ttl: 120,
            n_fields: 0,
            n_ops: bins.len() as u16,
            ..Default::default()
        };
        header.write(&mut buf);
        for (name, value) in bins {
            let payload = value_codec::payload_len(value);
            buf.put_u32((4 + name.len() + payload) as u32);
            buf.put_u8(1); // op: read
            buf.put_u8(value.particle_type());
            buf.put_u8(0);
            buf.put_u8(name.len() as u8);
            buf.put_slice(name.as_bytes());
            value_codec::write_payload(value, &mut buf);
        }
        buf
    }

    #[test]
    fn test_parse_success_with_bins() {
        let mut body = build_body(
            0,
            7,
            &[("count", Value::Int(42)), ("name", Value::from("zed"))],
        );
        let frame = parse(&mut body).unwrap();
        assert_eq!(frame.result, ResultCode::Ok);
        assert_eq!(frame.generation, 7);
        assert_eq!(frame.expiration, 120);
        assert_eq!(frame.bins.len(), 2);
        assert_eq!(frame.bins[0].value, Value::Int(42));
        assert_eq!(frame.bins[1].name.as_str(), "name");
    }

    #[test]
    fn test_parse_error_code_no_bins() {
        let mut body = build_body(2, 0, &[]);
        let frame = parse(&mut body).unwrap();
        assert_eq!(frame.result, ResultCode::NotFound);
        assert!(frame.bins.is_empty());
    }

    #[test]
    fn test_truncated_op_rejected() {
        let mut body = build_body(0, 1, &[("a", Value::Int(1))]);
        let cut = body.len() - 3;
        body.truncate(cut);
        assert!(matches!(parse(&mut body), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_op_size_overflow_rejected() {
        let mut buf = BytesMut::new();
        let header = MsgHeader {
            n_ops: 1,
            ..Default::default()
        };
        header.write(&mut buf);
        buf.put_u32(1000); // declared size far beyond the body
        buf.put_u8(1);
        assert!(parse(&mut buf).is_err());
    }

    #[test]
    fn test_fields_are_skipped() {
        let mut buf = BytesMut::new();
        let header = MsgHeader {
            result_code: 0,
            generation: 3,
            n_fields: 1,
            n_ops: 0,
            ..Default::default()
        };
        header.write(&mut buf);
        buf.put_u32(5);
        buf.put_u8(0); // namespace field
        buf.put_slice(b"test");
        let frame = parse(&mut buf).unwrap();
        assert_eq!(frame.generation, 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_into_record() {
        let mut body = build_body(0, 9, &[("b", Value::from("v"))]);
        let record = parse(&mut body).unwrap().into_record();
        assert_eq!(record.generation, 9);
        assert_eq!(record.bin("b"), Some(&Value::Str("v".into())));
    }
}
