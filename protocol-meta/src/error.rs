//! Error types for meta protocol parsing.

/// Error type for meta protocol parsing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Need more data to complete parsing.
    /// This is not a fatal error - the caller should buffer more data and retry.
    #[error("incomplete data")]
    Incomplete,

    /// Invalid protocol format.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Invalid number format.
    #[error("invalid number")]
    InvalidNumber,
}

impl ParseError {
    /// Returns true if this error indicates more data is needed.
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::Incomplete)
    }
}
