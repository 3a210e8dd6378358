//! Error types for the crypto core.

use thiserror::Error;

/// Errors from the algorithm table, the crypto engine, and record decoding.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Algorithm id outside the table, or a meta-value (`inherit`/`on`)
    /// that was not resolved before reaching the table.
    #[error("invalid encryption algorithm: {0}")]
    InvalidAlgorithm(u64),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid iv length: expected {expected}, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("buffer length mismatch: expected {expected}, got {actual}")]
    BufferLength { expected: usize, actual: usize },

    /// The message exceeds what the mode can seal under one nonce.
    #[error("message too long: {actual} bytes, {crypt} allows at most {max}")]
    MessageTooLong {
        crypt: &'static str,
        max: u64,
        actual: usize,
    },

    /// MAC did not verify: wrong wrapping key, corruption, or tampering.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The cipher provider failed for a reason other than authentication.
    #[error("crypto provider error: {0}")]
    Provider(String),

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("malformed key record: {0}")]
    MalformedRecord(String),
}

/// Result type for crypto core operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
