//! Error types for keychain and keystore operations.

use dslcrypt_core::{CryptoError, DatasetId, ObjectId};
use dslcrypt_store::StoreError;
use thiserror::Error;

/// Errors that can occur during key hierarchy operations.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Crypto engine error, including authentication failures.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The object store rejected or failed a transaction.
    #[error("transaction error: {0}")]
    Transaction(#[from] StoreError),

    /// Rotation at a txg not past the newest entry.
    #[error("txg {txg} is not after the newest key at txg {max}")]
    InvalidTxgOrder { txg: u64, max: u64 },

    /// No entry is effective at `txg`.
    #[error("keychain {kcobj} has no key for txg {txg}")]
    NoApplicableKey { kcobj: ObjectId, txg: u64 },

    #[error("keychain {0} is not loaded")]
    NotLoaded(ObjectId),

    #[error("dataset {0} is not indexed")]
    NotIndexed(DatasetId),

    #[error("keychain {0} is already loaded")]
    AlreadyLoaded(ObjectId),

    #[error("dataset {0} is already indexed")]
    AlreadyIndexed(DatasetId),

    /// Other holders still reference the keychain.
    #[error("keychain {kcobj} is busy ({holds} holds)")]
    Busy { kcobj: ObjectId, holds: usize },

    /// Persistent state violates a keychain invariant.
    #[error("corrupted keychain: {0}")]
    Corrupted(String),

    /// Malformed administrative command.
    #[error("invalid command: {0}")]
    Command(String),
}

impl KeyError {
    /// Whether this is the "wrong key or corrupted record" condition.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Crypto(CryptoError::AuthenticationFailed))
    }
}

/// Result type for key hierarchy operations.
pub type Result<T> = std::result::Result<T, KeyError>;
