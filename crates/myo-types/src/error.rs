//! Error types for protocol encoding and decoding in myo-types.

use thiserror::Error;

/// Errors that can occur when encoding or decoding Myo protocol data.
///
/// These are protocol errors: a malformed code, frame, or payload always
/// indicates a programming error or a protocol-version mismatch, so callers
/// should never retry on them.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A characteristic short code was not exactly four hex digits.
    #[error("Invalid characteristic code '{0}': expected 4 hex digits")]
    InvalidCodeFormat(String),

    /// An EMG notification frame had the wrong length.
    #[error("Invalid EMG frame length: expected {expected} bytes, got {actual}")]
    InvalidFrameLength {
        /// Required frame size.
        expected: usize,
        /// Actual frame size received.
        actual: usize,
    },

    /// A read payload was shorter than its fixed layout requires.
    #[error("Truncated payload: expected at least {expected} bytes, got {actual}")]
    TruncatedPayload {
        /// Minimum payload size.
        expected: usize,
        /// Actual payload size received.
        actual: usize,
    },

    /// A field held a value outside its closed set.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl ParseError {
    /// Create a truncated payload error.
    pub fn truncated(expected: usize, actual: usize) -> Self {
        Self::TruncatedPayload { expected, actual }
    }
}

/// Result type alias using myo-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
