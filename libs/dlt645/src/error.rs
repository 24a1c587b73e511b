//! Codec error types

use thiserror::Error;

/// Errors raised while encoding frames or parameter values.
///
/// Parsing never produces these; a malformed frame is reported through
/// [`crate::FrameParseResult`] instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Invalid data identifier '{0}': expected 8 hex characters")]
    InvalidIdentifier(String),

    #[error("Invalid device address '{0}': expected 12 hex characters")]
    InvalidAddress(String),

    #[error("Payload too long: {0} bytes (max 255)")]
    PayloadTooLong(usize),

    #[error("Unsupported field literal '{0}'")]
    UnsupportedField(String),

    #[error("{kind} value {value} out of range [{min}, {max}]")]
    OutOfRange {
        kind: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{kind} value {value} exceeds {decimals} decimal places")]
    PrecisionExceeded {
        kind: &'static str,
        value: f64,
        decimals: u32,
    },

    #[error("{kind} value is not a finite number")]
    InvalidValue { kind: &'static str },

    #[error("{kind} value {value} does not fit in {width} bytes")]
    EncodedOverflow {
        kind: &'static str,
        value: f64,
        width: usize,
    },

    #[error("{kind} expects {expected} bytes, got {actual}")]
    LengthMismatch {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, CodecError>;
