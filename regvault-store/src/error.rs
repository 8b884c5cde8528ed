//! Storage and integration error types.

use regvault_crypto::CryptoError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from persisting, loading, or migrating records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("encryption self-test failed for key {0}")]
    SelfTestFailed(String),

    #[error("refusing to persist records left unencrypted at positions {0:?}")]
    PartialEncryption(Vec<usize>),

    #[error("refusing to overwrite records with unreadable fields at positions {0:?}")]
    UnreadableRecords(Vec<usize>),

    #[error("key derivation task failed: {0}")]
    Join(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
