//! Error types for the messaging engine.

use smsg_core::{Address, CoreError, ValidationError};
use smsg_crypto::CryptoError;
use smsg_net::NetError;
use smsg_store::StoreError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum SmsgError {
    /// The address is not a wallet address held locally.
    #[error("unknown address: {0}")]
    UnknownAddress(Address),

    /// A private key could not be decoded or is not acceptable here.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A public key does not hash to the address it was given for.
    #[error("public key does not match address {0}")]
    KeyMismatch(Address),

    /// No public key is known for the recipient.
    #[error("no public key known for recipient {0}")]
    UnknownRecipientKey(Address),

    /// The private key needed is not available.
    #[error("private key not available")]
    MissingKey,

    /// Decryption failed: wrong key or corrupted data.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A funding commitment pays less than the required fee.
    #[error("insufficient fee: required {required}, paid {paid}")]
    InsufficientFee { required: u64, paid: u64 },

    /// The funding account cannot cover the amount.
    #[error("insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    /// The ledger refused or dropped a transaction.
    #[error("transaction rejected: {0}")]
    NetworkRejected(String),

    /// Requested time-to-live outside the accepted range.
    #[error("invalid ttl: {got} (must be {min}..={max})")]
    InvalidTtl { got: u32, min: u32, max: u32 },

    /// Message exceeds the size limit for its kind.
    #[error("message too large: {size} bytes exceeds limit {limit}")]
    MessageTooLarge { size: usize, limit: usize },

    /// The wallet is locked.
    #[error("wallet is locked")]
    WalletLocked,

    /// The wallet passphrase is wrong.
    #[error("incorrect passphrase")]
    IncorrectPassphrase,

    /// The wallet is already encrypted.
    #[error("wallet is already encrypted")]
    WalletAlreadyEncrypted,

    /// The wallet is not encrypted, so it cannot be locked or unlocked.
    #[error("wallet is not encrypted")]
    WalletNotEncrypted,

    /// Envelope validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Network error.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// Other cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// Other encoding failure.
    #[error("encoding error: {0}")]
    Core(CoreError),

    /// Internal state guard was poisoned.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<CryptoError> for SmsgError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::AuthenticationFailed => SmsgError::AuthenticationFailed,
            CryptoError::MissingKey => SmsgError::MissingKey,
            CryptoError::Core(core) => core.into(),
            other => SmsgError::Crypto(other),
        }
    }
}

impl From<CoreError> for SmsgError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidKey(reason) => SmsgError::InvalidKey(reason),
            other => SmsgError::Core(other),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SmsgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_errors_map_onto_taxonomy() {
        assert!(matches!(
            SmsgError::from(CryptoError::AuthenticationFailed),
            SmsgError::AuthenticationFailed
        ));
        assert!(matches!(
            SmsgError::from(CryptoError::MissingKey),
            SmsgError::MissingKey
        ));
        assert!(matches!(
            SmsgError::from(CryptoError::Core(CoreError::InvalidKey("bad".into()))),
            SmsgError::InvalidKey(_)
        ));
        assert!(matches!(
            SmsgError::from(CryptoError::KeyDerivation("x".into())),
            SmsgError::Crypto(_)
        ));
    }
}
