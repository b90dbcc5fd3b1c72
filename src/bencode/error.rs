use thiserror::Error;

/// Errors that can occur during bencode decoding.
///
/// # Examples
///
/// ```
/// use torrify::bencode::{decode, BencodeError};
///
/// assert!(matches!(decode(b"i42"), Err(BencodeError::UnexpectedEof)));
/// assert!(matches!(decode(b"i007e"), Err(BencodeError::InvalidInteger(_))));
/// assert!(matches!(decode(b"i42eextra"), Err(BencodeError::TrailingData)));
/// ```
#[derive(Debug, Error)]
pub enum BencodeError {
    /// Input ended before a complete value was parsed.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Integer is malformed (e.g., has leading zeros, is empty, or overflows).
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Byte string length prefix is not a valid number.
    #[error("invalid string length")]
    InvalidStringLength,

    /// Encountered an unexpected character while parsing.
    #[error("unexpected character: {0}")]
    UnexpectedChar(char),

    /// Extra data exists after the bencode value.
    #[error("trailing data after value")]
    TrailingData,

    /// Recursion limit (64 levels) exceeded to prevent stack overflow.
    #[error("nesting too deep")]
    NestingTooDeep,

    /// The outer dictionary carries no `info` entry.
    #[error("no info dictionary present")]
    MissingInfo,
}
