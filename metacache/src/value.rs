//! Typed translation between caller values and wire bytes.

use bytes::Bytes;

/// Error decoding a stored value into a caller type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The stored bytes are not valid UTF-8.
    #[error("invalid utf-8")]
    InvalidUtf8,
    /// The stored bytes are not a decimal number in range for the target type.
    #[error("invalid number")]
    InvalidNumber,
}

/// A value type that can be stored in and fetched from the cache.
///
/// Integer implementations use ASCII decimal on the wire, which is what the
/// server's arithmetic commands operate on; [`CacheValue::NUMERIC`] marks
/// them as eligible results for `increment`/`decrement`.
pub trait CacheValue: Sized {
    /// Whether this type is an ASCII decimal number the server can do
    /// arithmetic on.
    const NUMERIC: bool = false;

    /// Encode this value for storage.
    fn to_bytes(&self) -> Bytes;

    /// Decode a stored value.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError>;
}

macro_rules! numeric_cache_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl CacheValue for $t {
                const NUMERIC: bool = true;

                fn to_bytes(&self) -> Bytes {
                    Bytes::from(self.to_string().into_bytes())
                }

                fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
                    std::str::from_utf8(data)
                        .map_err(|_| DecodeError::InvalidUtf8)?
                        .parse()
                        .map_err(|_| DecodeError::InvalidNumber)
                }
            }
        )*
    };
}

numeric_cache_value!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl CacheValue for String {
    fn to_bytes(&self) -> Bytes {
        Bytes::from(self.clone().into_bytes())
    }

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        std::str::from_utf8(data)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }
}

impl CacheValue for Vec<u8> {
    fn to_bytes(&self) -> Bytes {
        Bytes::from(self.clone())
    }

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        Ok(data.to_vec())
    }
}

impl CacheValue for Bytes {
    fn to_bytes(&self) -> Bytes {
        self.clone()
    }

    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        Ok(Bytes::copy_from_slice(data))
    }
}
