//! Memcache meta protocol implementation for client use.
//!
//! This crate encodes the `mg`/`ms`/`md`/`ma` command family and parses the
//! framed responses. It is transport-free: the encoder appends bytes to a
//! caller-owned buffer, and the parser consumes bytes from one, reporting
//! [`ParseError::Incomplete`] until a full frame is available.
//!
//! # Example
//!
//! ```
//! use protocol_meta::{Request, Response, ReturnCode};
//!
//! // Encode a SET command
//! let mut buf = Vec::new();
//! Request::set("bar", "foo", None).encode(&mut buf);
//! assert_eq!(buf, b"ms bar 3 \r\nfoo\r\n");
//!
//! // Parse the response
//! let (response, consumed) = Response::parse(b"HD\r\n").unwrap();
//! assert_eq!(response.code, ReturnCode::Stored);
//! assert_eq!(consumed, 4);
//! ```

mod error;
mod request;
mod response;

pub use error::ParseError;
pub use request::{
    key_is_valid, Flags, Request, StorageMode, Ttl, MAX_KEY_LEN, RELATIVE_TTL_CUTOFF_SECS,
};
pub use response::{Response, ReturnCode, MAX_LINE_LEN};
