//! Error types for the encryption layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur during encryption operations.
///
/// Only sequencing and structural failures are represented here. A blob that
/// fails authentication is reported through
/// [`DecryptOutcome::Failed`](crate::DecryptOutcome::Failed) instead.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("no encryption key: derive or install a key first")]
    UninitializedKey,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("field value too large to encrypt: {field_len} bytes (max {max})")]
    FieldTooLarge { field_len: usize, max: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
