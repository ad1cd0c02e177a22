//! Error types for SMSG Core.

use thiserror::Error;

/// Core errors that can occur while decoding or building primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Structural validation errors for envelopes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    #[error("ttl of {got} periods outside allowed range {min}..={max}")]
    InvalidTtl { got: u32, min: u32, max: u32 },

    #[error("envelope of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("paid envelope has no funding transaction")]
    MissingFunding,

    #[error("free envelope carries a funding transaction")]
    UnexpectedFunding,

    #[error("empty ciphertext")]
    EmptyCiphertext,
}
