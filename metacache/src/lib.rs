//! Asynchronous memcached client speaking the meta protocol (`mg`/`ms`/`md`/`ma`).
//!
//! A [`Client`] is a cheap, cloneable handle over a single multiplexed TCP
//! connection. Requests flow through a bounded queue into a [`Connection`]
//! engine task, which pipelines them onto the socket and pairs responses to
//! callers strictly first-in-first-out. The transport is pluggable: anything
//! `AsyncRead + AsyncWrite` works, which tests use to drive the engine over
//! in-memory pipes.
//!
//! All key parameters accept `impl AsRef<[u8]>`; values go through the
//! [`CacheValue`] trait, with implementations for integers (ASCII decimal,
//! usable with `increment`/`decrement`), strings, and raw bytes.
//!
//! # Example
//!
//! ```no_run
//! use metacache::{Client, Config};
//!
//! async fn example() -> Result<(), metacache::Error> {
//!     let config = Config::new("127.0.0.1", 11211);
//!     let (client, mut conn) = Client::connect(&config).await?;
//!     tokio::spawn(async move { conn.run().await });
//!
//!     client.set("hello", String::from("world"), None).await?;
//!     let value: Option<String> = client.get("hello").await?;
//!     assert_eq!(value.as_deref(), Some("world"));
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod conn;
mod value;

pub use client::{Client, ClientBuilder, CommandResult};
pub use config::{Config, DEFAULT_MAX_VALUE_SIZE, DEFAULT_QUEUE_CAPACITY};
pub use conn::{CommandKind, Connection};
pub use value::{CacheValue, DecodeError};

#[cfg(feature = "metrics")]
pub use client::{ClientMetrics, VerbMetrics};

pub use protocol_meta::{ParseError, ReturnCode, Ttl};

use std::io;

/// Errors returned by the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key is empty, too long, or contains whitespace or control bytes.
    /// Nothing was written to the wire.
    #[error("invalid key")]
    InvalidKey,

    /// The key was not present (or, for `replace`/`append`/`prepend`, not
    /// present to modify).
    #[error("key not found")]
    KeyNotFound,

    /// `add` found the key already stored.
    #[error("key already exists")]
    KeyExists,

    /// The encoded value exceeds the configured maximum. Nothing was written
    /// to the wire.
    #[error("value exceeds {limit} bytes")]
    ValueTooLarge { limit: usize },

    /// The server answered with a code this command does not expect
    /// (including server `ERROR` lines). The connection stays usable.
    #[error("unexpected return code: {0}")]
    UnexpectedReturnCode(ReturnCode),

    /// The server sent bytes that do not parse as a response frame. This
    /// terminates the connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The stored bytes could not be decoded into the requested type.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// An arithmetic result was requested into a non-numeric type.
    #[error("type mismatch: arithmetic requires a numeric value type")]
    TypeMismatch,

    /// The connection terminated before this request completed; the cause is
    /// attached.
    #[error("connection shut down: {0}")]
    ConnectionShutdown(String),

    /// [`Connection::run`] was invoked more than once.
    #[error("connection is already running")]
    AlreadyRunning,

    /// I/O error on the transport. This terminates the connection.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
