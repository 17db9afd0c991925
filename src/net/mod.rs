//! Wire protocol, request handling, and the client/server endpoints.
//!
//! The protocol is one transaction per TCP connection: a fixed 256-byte
//! textual request header, a raw little-endian offsets payload, then a
//! fixed 256-byte response header and a raw little-endian counts payload.
//! The textual headers keep captures easy to read while all bulk data
//! stays binary.

pub mod client;
pub mod connection;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;

/// Exact size of the request header frame
pub const REQUEST_HEADER_SIZE: usize = 256;

/// Exact size of the response header frame
pub const RESPONSE_HEADER_SIZE: usize = 256;

/// Most offset ranges accepted in one request
pub const MAX_INTERVALS: u32 = 1 << 20;

/// Longest accepted accession, in bytes
pub const MAX_ACCESSION_LEN: usize = 128;

/// Bytes per offset record and per counts record on the wire
pub const RECORD_SIZE: usize = 8;
