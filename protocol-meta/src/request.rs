//! Client-side request encoding for the memcache meta protocol.
//!
//! Every command is a single line of the form `<verb> <key> [tokens]\r\n`,
//! with `ms` additionally carrying a length-prefixed value block. Flag tokens
//! are rendered in a fixed order so encodings are byte-stable.

use std::io::Write;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Maximum key size in bytes (memcached limit).
pub const MAX_KEY_LEN: usize = 250;

/// Relative TTLs above this many seconds are reinterpreted by the server as
/// absolute Unix timestamps (30 days).
pub const RELATIVE_TTL_CUTOFF_SECS: u64 = 30 * 86400;

/// Returns true if `key` is sendable: non-empty, within [`MAX_KEY_LEN`], and
/// free of whitespace, control bytes, and DEL.
pub fn key_is_valid(key: &[u8]) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return false;
    }
    key.iter().all(|&b| b > b' ' && b != 0x7f)
}

/// Item expiry carried by the `T` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Never expires (`T0`).
    Indefinite,
    /// Expires at the given instant. Rendered as seconds-from-now when the
    /// request is encoded, so time spent queued does not shorten the TTL.
    ExpiresAt(Instant),
}

impl Ttl {
    /// Expiry `d` from now.
    #[inline]
    pub fn after(d: Duration) -> Self {
        Ttl::ExpiresAt(Instant::now() + d)
    }

    /// The `T` token value at this moment.
    ///
    /// Remaining time is rounded up and clamped to at least one second. Past
    /// the 30-day cutoff the server reads the value as an absolute Unix
    /// timestamp, so larger remainders are rendered against the wall clock.
    fn render_secs(&self) -> u64 {
        match self {
            Ttl::Indefinite => 0,
            Ttl::ExpiresAt(at) => {
                let remaining = at.saturating_duration_since(Instant::now());
                let mut secs = remaining.as_secs();
                if remaining.subsec_nanos() > 0 {
                    secs += 1;
                }
                let secs = secs.max(1);
                if secs > RELATIVE_TTL_CUTOFF_SECS {
                    let epoch = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs();
                    epoch + secs
                } else {
                    secs
                }
            }
        }
    }
}

/// Storage mode selector, rendered as the `M` family of tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Store only if the key does not exist (`MEa`).
    Add,
    /// Append to an existing value (`MEe`).
    Append,
    /// Prepend to an existing value (`MEp`).
    Prepend,
    /// Store only if the key exists (`MEr`).
    Replace,
    /// Arithmetic increment (`MI`).
    Increment,
    /// Arithmetic decrement (`MD`).
    Decrement,
}

impl StorageMode {
    #[inline]
    fn token(&self) -> &'static [u8] {
        match self {
            StorageMode::Add => b"MEa",
            StorageMode::Append => b"MEe",
            StorageMode::Prepend => b"MEp",
            StorageMode::Replace => b"MEr",
            StorageMode::Increment => b"MI",
            StorageMode::Decrement => b"MD",
        }
    }
}

/// Per-command flag set.
///
/// Tokens render in a fixed order (`v`, `T`, `M*`, `J`, `D`) so a given flag
/// set always produces the same bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// Request a value block in the response (`v`).
    pub return_value: bool,
    /// Time-to-live (`T<seconds>`).
    pub ttl: Option<Ttl>,
    /// Storage mode (`MEa`/`MEe`/`MEp`/`MEr` or `MI`/`MD`).
    pub mode: Option<StorageMode>,
    /// Seed value for arithmetic on a missing key (`J<u64>`).
    pub initial: Option<u64>,
    /// Arithmetic step (`D<u64>`).
    pub delta: Option<u64>,
}

impl Flags {
    /// Append the flag tokens to `buf`.
    ///
    /// With `lead` every token is preceded by a space (`mg`/`ma` lines, where
    /// tokens follow the key directly); without it tokens are only separated
    /// from each other (`ms` lines, where the length field already ends in a
    /// space).
    fn encode(&self, buf: &mut Vec<u8>, lead: bool) {
        let mut first = true;
        if self.return_value {
            sep(buf, &mut first, lead);
            buf.push(b'v');
        }
        if let Some(ttl) = self.ttl {
            sep(buf, &mut first, lead);
            write!(buf, "T{}", ttl.render_secs()).unwrap();
        }
        if let Some(mode) = self.mode {
            sep(buf, &mut first, lead);
            buf.extend_from_slice(mode.token());
        }
        if let Some(initial) = self.initial {
            sep(buf, &mut first, lead);
            write!(buf, "J{}", initial).unwrap();
        }
        if let Some(delta) = self.delta {
            sep(buf, &mut first, lead);
            write!(buf, "D{}", delta).unwrap();
        }
    }
}

#[inline]
fn sep(buf: &mut Vec<u8>, first: &mut bool, lead: bool) {
    if lead || !*first {
        buf.push(b' ');
    }
    *first = false;
}

/// A meta protocol request.
///
/// Keys and values are owned so requests can sit in a queue between
/// construction and encoding.
#[derive(Debug, Clone)]
pub enum Request {
    /// `ms <key> <valuelen> <flags>\r\n<value>\r\n` - set family. Plain set
    /// carries no mode token; add/append/prepend/replace select one.
    Set {
        key: Bytes,
        value: Bytes,
        flags: Flags,
    },
    /// `mg <key> <flags>\r\n` - also used for touch (a `T` flag and no `v`).
    Get { key: Bytes, flags: Flags },
    /// `md <key>\r\n`
    Delete { key: Bytes },
    /// `ma <key> <flags>\r\n` - increment/decrement.
    Arithmetic { key: Bytes, flags: Flags },
}

impl Request {
    /// Create a plain SET request.
    #[inline]
    pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>, ttl: Option<Ttl>) -> Self {
        Request::Set {
            key: key.into(),
            value: value.into(),
            flags: Flags {
                ttl,
                ..Flags::default()
            },
        }
    }

    /// Create an ADD request (store only if the key does not exist).
    #[inline]
    pub fn add(key: impl Into<Bytes>, value: impl Into<Bytes>, ttl: Option<Ttl>) -> Self {
        Self::store(key, value, StorageMode::Add, ttl)
    }

    /// Create a REPLACE request (store only if the key exists).
    #[inline]
    pub fn replace(key: impl Into<Bytes>, value: impl Into<Bytes>, ttl: Option<Ttl>) -> Self {
        Self::store(key, value, StorageMode::Replace, ttl)
    }

    /// Create an APPEND request.
    #[inline]
    pub fn append(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::store(key, value, StorageMode::Append, None)
    }

    /// Create a PREPEND request.
    #[inline]
    pub fn prepend(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::store(key, value, StorageMode::Prepend, None)
    }

    #[inline]
    fn store(
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        mode: StorageMode,
        ttl: Option<Ttl>,
    ) -> Self {
        Request::Set {
            key: key.into(),
            value: value.into(),
            flags: Flags {
                ttl,
                mode: Some(mode),
                ..Flags::default()
            },
        }
    }

    /// Create a GET request asking for the value block.
    #[inline]
    pub fn get(key: impl Into<Bytes>) -> Self {
        Request::Get {
            key: key.into(),
            flags: Flags {
                return_value: true,
                ..Flags::default()
            },
        }
    }

    /// Create a TOUCH request: a get-shaped line carrying only the new TTL,
    /// expecting no value block back.
    #[inline]
    pub fn touch(key: impl Into<Bytes>, ttl: Ttl) -> Self {
        Request::Get {
            key: key.into(),
            flags: Flags {
                ttl: Some(ttl),
                ..Flags::default()
            },
        }
    }

    /// Create a DELETE request.
    #[inline]
    pub fn delete(key: impl Into<Bytes>) -> Self {
        Request::Delete { key: key.into() }
    }

    /// Create an INCREMENT request. The new value is returned.
    #[inline]
    pub fn increment(
        key: impl Into<Bytes>,
        delta: u64,
        initial: Option<u64>,
        ttl: Option<Ttl>,
    ) -> Self {
        Self::arithmetic(key, StorageMode::Increment, delta, initial, ttl)
    }

    /// Create a DECREMENT request. The new value is returned.
    #[inline]
    pub fn decrement(
        key: impl Into<Bytes>,
        delta: u64,
        initial: Option<u64>,
        ttl: Option<Ttl>,
    ) -> Self {
        Self::arithmetic(key, StorageMode::Decrement, delta, initial, ttl)
    }

    #[inline]
    fn arithmetic(
        key: impl Into<Bytes>,
        mode: StorageMode,
        delta: u64,
        initial: Option<u64>,
        ttl: Option<Ttl>,
    ) -> Self {
        Request::Arithmetic {
            key: key.into(),
            flags: Flags {
                return_value: true,
                ttl,
                mode: Some(mode),
                initial,
                delta: Some(delta),
            },
        }
    }

    /// The key this request addresses.
    #[inline]
    pub fn key(&self) -> &[u8] {
        match self {
            Request::Set { key, .. }
            | Request::Get { key, .. }
            | Request::Delete { key }
            | Request::Arithmetic { key, .. } => key,
        }
    }

    /// Append this request's wire encoding to `buf`.
    ///
    /// TTL flags are rendered against the clock at this call, not at request
    /// construction.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Request::Set { key, value, flags } => {
                buf.extend_from_slice(b"ms ");
                buf.extend_from_slice(key);
                write!(buf, " {} ", value.len()).unwrap();
                flags.encode(buf, false);
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(value);
                buf.extend_from_slice(b"\r\n");
            }
            Request::Get { key, flags } => {
                buf.extend_from_slice(b"mg ");
                buf.extend_from_slice(key);
                flags.encode(buf, true);
                buf.extend_from_slice(b"\r\n");
            }
            Request::Delete { key } => {
                buf.extend_from_slice(b"md ");
                buf.extend_from_slice(key);
                buf.extend_from_slice(b"\r\n");
            }
            Request::Arithmetic { key, flags } => {
                buf.extend_from_slice(b"ma ");
                buf.extend_from_slice(key);
                flags.encode(buf, true);
                buf.extend_from_slice(b"\r\n");
            }
        }
    }
}
