//! Codec error types

use canhil_core::CanError;
use thiserror::Error;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while packing or unpacking signals
#[derive(Debug, Error, Clone)]
pub enum CodecError {
    /// Bit length of 0, more than 64, or a span crossing the payload end
    #[error(
        "signal '{signal}' does not fit the payload: start bit {start_bit}, \
         {bit_length} bits, payload {payload_bits} bits"
    )]
    BitRangeExceeded {
        signal: String,
        start_bit: u16,
        bit_length: u8,
        payload_bits: usize,
    },

    /// Payload shorter than the declared DLC
    #[error("payload too short: expected {expected} bytes, got {actual}")]
    PayloadTooShort { expected: usize, actual: usize },
}

impl From<CodecError> for CanError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::BitRangeExceeded { .. } => CanError::Config(err.to_string()),
            CodecError::PayloadTooShort { .. } => CanError::Value(err.to_string()),
        }
    }
}
