//! Error types for encoding and decoding replicated data

use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while encoding or decoding instructions
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode: {0}")]
    Encode(String),

    #[error("Failed to decode: {0}")]
    Decode(String),
}
