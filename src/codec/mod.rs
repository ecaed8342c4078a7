//! Wire protocol codec.
//!
//! Pure, allocation-light (de)serialization of the binary message format.
//! Requests are written into a caller-supplied growable buffer; responses
//! are parsed out of the single contiguous network read. Nothing in this
//! module performs I/O.

pub mod info;
pub mod proto;
pub mod request;
pub mod response;
pub mod value;
