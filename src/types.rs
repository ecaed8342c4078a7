//! Core data model: typed values, bins, operations and write parameters.

use crate::digest::KeyDigest;
use crate::error::{Error, Result};
use std::fmt;

/// Maximum byte length of a bin name.
pub const MAX_BIN_NAME_LEN: usize = 31;

/// Origin language of a serialized blob, preserved for cross-client
/// interoperability. The server treats all of these as opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Java,
    CSharp,
    Python,
    Ruby,
}

/// A typed value, used both as a record key and as a bin value.
///
/// Each variant maps to exactly one wire tag; the tag fully determines
/// which payload is valid. String and blob payloads carry an explicit
/// length on the wire, so embedded NUL bytes are preserved. Ownership is
/// plain Rust move semantics: a value owns its payload and releases it on
/// drop, exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value.
    Null,
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Opaque byte blob.
    Blob(Vec<u8>),
    /// Timestamp, seconds since the epoch.
    Timestamp(i64),
    /// A 20-byte key digest stored as a value.
    Digest(KeyDigest),
    /// Blob serialized by another client language.
    LanguageBlob(BlobKind, Vec<u8>),
}

impl Value {
    /// Wire tag for this value's type.
    pub fn particle_type(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Blob(_) => 4,
            Value::Timestamp(_) => 5,
            Value::Digest(_) => 6,
            Value::LanguageBlob(BlobKind::Java, _) => 7,
            Value::LanguageBlob(BlobKind::CSharp, _) => 8,
            Value::LanguageBlob(BlobKind::Python, _) => 9,
            Value::LanguageBlob(BlobKind::Ruby, _) => 10,
        }
    }

    /// Whether this is the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
            Value::Blob(v) => write!(f, "blob[{}]", v.len()),
            Value::Timestamp(v) => write!(f, "ts:{}", v),
            Value::Digest(d) => write!(f, "{}", d),
            Value::LanguageBlob(kind, v) => write!(f, "{:?}-blob[{}]", kind, v.len()),
        }
    }
}

/// A validated bin name, at most [`MAX_BIN_NAME_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinName(String);

impl BinName {
    /// Validate and wrap a bin name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_BIN_NAME_LEN {
            return Err(Error::Client(format!(
                "bin name '{}' exceeds {} bytes",
                name, MAX_BIN_NAME_LEN
            )));
        }
        Ok(BinName(name))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BinName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named value within a record.
///
/// Bin names are expected to be unique within one request; duplicates are
/// a caller error and are not checked here.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    pub name: BinName,
    pub value: Value,
}

impl Bin {
    /// Create a bin, validating the name length.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Ok(Bin {
            name: BinName::new(name)?,
            value: value.into(),
        })
    }
}

/// Kind of a single operation within a compound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Read the bin's current value.
    Read,
    /// Replace the bin's value.
    Write,
    /// Add to an integer bin.
    Add,
}

impl OperationKind {
    /// Wire code for this operation kind.
    pub fn wire_code(&self) -> u8 {
        match self {
            OperationKind::Read => 1,
            OperationKind::Write => 2,
            OperationKind::Add => 5,
        }
    }
}

/// One step of a compound (multi-bin) request. The server applies the
/// operations of a request strictly in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub bin: BinName,
    pub kind: OperationKind,
    pub value: Value,
}

impl Operation {
    /// Read the named bin.
    pub fn read(bin: impl Into<String>) -> Result<Self> {
        Ok(Operation {
            bin: BinName::new(bin)?,
            kind: OperationKind::Read,
            value: Value::Null,
        })
    }

    /// Write a value into the named bin.
    pub fn write(bin: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Ok(Operation {
            bin: BinName::new(bin)?,
            kind: OperationKind::Write,
            value: value.into(),
        })
    }

    /// Add an integer to the named bin.
    pub fn add(bin: impl Into<String>, delta: i64) -> Result<Self> {
        Ok(Operation {
            bin: BinName::new(bin)?,
            kind: OperationKind::Add,
            value: Value::Int(delta),
        })
    }
}

/// Durability/retry behavior selected by the caller for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Fire-and-forget: the transaction completes as soon as the request
    /// is on the wire, no server acknowledgment is awaited.
    Async,
    /// Single attempt, no retry on transient failure.
    OneShot,
    /// Bounded retries on transient failure (count is a config knob).
    Retry,
    /// Retry until the transaction deadline in pursuit of a durable commit.
    Assured,
}

/// Extended write controls: optimistic-concurrency check, expiration and
/// write policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteParams {
    /// Expected record generation. `None` disables the check and the
    /// server performs an unconditional write.
    pub generation: Option<u32>,

    /// Record expiration in seconds from now; 0 means no expiration.
    pub expiration_secs: u32,

    /// Retry/durability policy for this write.
    pub policy: WritePolicy,
}

impl Default for WriteParams {
    fn default() -> Self {
        Self {
            generation: None,
            expiration_secs: 0,
            policy: WritePolicy::Retry,
        }
    }
}

impl WriteParams {
    /// Default parameters: no generation check, no expiration, policy Retry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the record's generation to equal `generation`.
    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Set record expiration in seconds from now.
    pub fn with_expiration(mut self, secs: u32) -> Self {
        self.expiration_secs = secs;
        self
    }

    /// Set the write policy.
    pub fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Response payload delivered to the caller. Writes return a record with
/// no bins but a populated generation counter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Returned bins, in server order.
    pub bins: Vec<Bin>,

    /// The record's generation after the operation.
    pub generation: u32,

    /// Remaining record TTL as reported by the server, seconds.
    pub expiration: u32,
}

impl Record {
    /// Look up a returned bin by name.
    pub fn bin(&self, name: &str) -> Option<&Value> {
        self.bins
            .iter()
            .find(|b| b.name.as_str() == name)
            .map(|b| &b.value)
    }
}

/// A seed host: name (or address literal) and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub name: String,
    pub port: u16,
}

impl Host {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Host {
            name: name.into(),
            port,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}
