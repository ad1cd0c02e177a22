//! Error types for sealing and key protection.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The integrity tag did not verify: wrong key or corrupted data.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// No private key was supplied (e.g. key storage is locked).
    #[error("missing private key")]
    MissingKey,

    /// Malformed key material.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Passphrase key derivation error.
    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] smsg_core::CoreError),
}

/// Result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
