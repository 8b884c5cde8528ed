//! Field-level encryption for RegVault records.
//!
//! Provides:
//! - Argon2id key derivation from caller-supplied secret material
//! - ChaCha20-Poly1305 authenticated encryption of individual field values
//! - Record-level encryption of a configurable set of sensitive fields
//! - A key lifecycle service with snapshot semantics for in-flight operations
//!
//! # Architecture
//!
//! [`EncryptionService`] holds at most one key at a time. Deriving or
//! installing a key replaces it. Work is done by [`KeyHandle`], an immutable
//! snapshot of the key; the service methods are thin wrappers that capture
//! the current handle and delegate.
//!
//! Decryption never fails loudly on bad data. A blob that does not
//! authenticate yields [`DecryptOutcome::Failed`], and record/batch
//! operations report such fields and entries instead of aborting. Only
//! sequencing problems (no key yet) and derivation failures are `Err`.

mod blob;
mod cipher;
pub mod config;
mod error;
mod key;
pub mod record;
mod service;

pub use blob::EncryptedBlob;
pub use cipher::{
    decrypt, decrypt_string, encrypt, encrypt_string, generate_nonce, EncryptedData, ALGORITHM,
    NONCE_SIZE, TAG_SIZE,
};
pub use config::EncryptionConfig;
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
pub use record::{
    BatchResult, DecryptedRecord, Record, RecordEncryption, DECRYPTION_FAILED_MARKER,
    ENCRYPTED_AT_ATTR, ENCRYPTED_FLAG, VERSION_ATTR,
};
pub use service::{DecryptOutcome, EncryptionService, KeyHandle};
