//! Error types and wire result codes for the client.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result code carried in every response message.
///
/// The numeric values are fixed by the wire protocol. Codes split into two
/// families: transient conditions the transaction engine retries internally,
/// and definitive outcomes surfaced to the caller verbatim (retrying them
/// would not change the answer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// The operation succeeded.
    Ok,
    /// Unclassified server-side failure.
    Unknown,
    /// The record does not exist.
    NotFound,
    /// The expected generation did not match the record's generation.
    Generation,
    /// A request parameter was invalid.
    Parameter,
    /// The record already exists (create-only write).
    KeyExists,
    /// The bin already exists (create-only bin write).
    BinExists,
    /// The node's view of the cluster disagrees with the request's;
    /// partition ownership has likely moved.
    ClusterKeyMismatch,
    /// The target partition has no space left.
    PartitionOutOfSpace,
    /// The server gave up on the transaction before completing it.
    ServerTimeout,
    /// The feature is not available on this deployment.
    FeatureUnavailable,
    /// The service is temporarily unavailable.
    Unavailable,
    /// The operation cannot be applied to the bin's value type.
    IncompatibleType,
    /// The record is too large to store.
    RecordTooBig,
    /// Another transaction holds the record hot.
    KeyBusy,
    /// A code this client version does not know; preserved verbatim.
    Other(u8),
}

impl ResultCode {
    /// Decode a wire result code.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ResultCode::Ok,
            1 => ResultCode::Unknown,
            2 => ResultCode::NotFound,
            3 => ResultCode::Generation,
            4 => ResultCode::Parameter,
            5 => ResultCode::KeyExists,
            6 => ResultCode::BinExists,
            7 => ResultCode::ClusterKeyMismatch,
            8 => ResultCode::PartitionOutOfSpace,
            9 => ResultCode::ServerTimeout,
            10 => ResultCode::FeatureUnavailable,
            11 => ResultCode::Unavailable,
            12 => ResultCode::IncompatibleType,
            13 => ResultCode::RecordTooBig,
            14 => ResultCode::KeyBusy,
            other => ResultCode::Other(other),
        }
    }

    /// Encode to the wire representation.
    pub fn as_u8(&self) -> u8 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::Unknown => 1,
            ResultCode::NotFound => 2,
            ResultCode::Generation => 3,
            ResultCode::Parameter => 4,
            ResultCode::KeyExists => 5,
            ResultCode::BinExists => 6,
            ResultCode::ClusterKeyMismatch => 7,
            ResultCode::PartitionOutOfSpace => 8,
            ResultCode::ServerTimeout => 9,
            ResultCode::FeatureUnavailable => 10,
            ResultCode::Unavailable => 11,
            ResultCode::IncompatibleType => 12,
            ResultCode::RecordTooBig => 13,
            ResultCode::KeyBusy => 14,
            ResultCode::Other(v) => *v,
        }
    }

    /// Whether this code indicates success.
    pub fn is_ok(&self) -> bool {
        matches!(self, ResultCode::Ok)
    }

    /// Whether this code is a transient condition worth retrying.
    ///
    /// Transient codes consume retry budget and re-route the transaction.
    /// Everything else is a definitive answer surfaced to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResultCode::Unknown
                | ResultCode::ClusterKeyMismatch
                | ResultCode::PartitionOutOfSpace
                | ResultCode::ServerTimeout
                | ResultCode::Unavailable
        )
    }

    /// Whether this code means the node no longer owns the partition and
    /// the partition map should be refreshed.
    pub fn invalidates_partition_map(&self) -> bool {
        matches!(self, ResultCode::ClusterKeyMismatch)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultCode::Ok => "ok",
            ResultCode::Unknown => "unknown server error",
            ResultCode::NotFound => "record not found",
            ResultCode::Generation => "generation mismatch",
            ResultCode::Parameter => "invalid parameter",
            ResultCode::KeyExists => "key already exists",
            ResultCode::BinExists => "bin already exists",
            ResultCode::ClusterKeyMismatch => "cluster key mismatch",
            ResultCode::PartitionOutOfSpace => "partition out of space",
            ResultCode::ServerTimeout => "server-side timeout",
            ResultCode::FeatureUnavailable => "feature unavailable",
            ResultCode::Unavailable => "service unavailable",
            ResultCode::IncompatibleType => "incompatible value type",
            ResultCode::RecordTooBig => "record too big",
            ResultCode::KeyBusy => "key busy",
            ResultCode::Other(v) => return write!(f, "result code {}", v),
        };
        f.write_str(s)
    }
}

/// Main error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A definitive server outcome (not-found, generation mismatch, ...).
    /// Never produced for transient codes; those are retried internally.
    #[error("server error: {0}")]
    Server(ResultCode),

    /// The per-transaction deadline elapsed. Always terminal; a response
    /// arriving after the deadline is discarded.
    #[error("transaction timed out")]
    Timeout,

    /// Client-side failure (bad argument, no usable nodes, exhaustion).
    #[error("client error: {0}")]
    Client(String),

    /// Network communication errors.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// The peer sent bytes that do not parse as a protocol message.
    /// The receiving connection is discarded as broken.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The cluster handle was closed while this transaction was in flight,
    /// or a new transaction was issued after close began.
    #[error("cluster closed")]
    ClusterClosed,

    /// The retry budget was exhausted by consecutive transient failures.
    #[error("retries exhausted after {attempts} attempts, last: {code}")]
    MaxRetriesExceeded { code: ResultCode, attempts: u32 },
}

impl Error {
    /// Whether this error reports an elapsed transaction deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

/// Network communication errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// Connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to send a request.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a response.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Host name could not be resolved or parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
