//! Info protocol codec.
//!
//! The info interface is a text protocol under the same outer framing:
//! the request body is newline-separated value names, the response body is
//! one `name\tvalue\n` line per requested name.

use crate::codec::proto::{ProtoHeader, PROTO_TYPE_INFO};
use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Build an info request frame for the given value names.
pub fn request(buf: &mut BytesMut, names: &[&str]) {
    let body_len: usize = names.iter().map(|n| n.len() + 1).sum();
    buf.reserve(8 + body_len);
    ProtoHeader::new(PROTO_TYPE_INFO, body_len as u64).write(buf);
    for name in names {
        buf.put_slice(name.as_bytes());
        buf.put_u8(b'\n');
    }
}

/// Parse an info response body into `(name, value)` pairs.
pub fn parse_response(body: &[u8]) -> Result<Vec<(String, String)>> {
    let text = std::str::from_utf8(body)
        .map_err(|_| Error::Malformed("info response is not utf-8".into()))?;

    let mut pairs = Vec::new();
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((name, value)) => pairs.push((name.to_string(), value.to_string())),
            // A name the server does not know comes back bare.
            None => pairs.push((line.to_string(), String::new())),
        }
    }
    Ok(pairs)
}

/// Find one value in a parsed info response.
pub fn find<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}
