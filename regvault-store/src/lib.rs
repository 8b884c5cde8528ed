//! Encrypted record persistence for RegVault.
//!
//! # Architecture
//!
//! - [`RecordStore`]: ordered record sequences under string keys
//!   ([`MemoryStore`] in process, [`FileStore`] on disk)
//! - [`SecureRecords`]: wraps a store so saves encrypt and loads decrypt,
//!   and derives the session key on login
//! - [`Diagnostics`]: reports key and data state, forces key
//!   re-initialization, and migrates legacy plaintext records behind a
//!   timestamped backup
//!
//! Both front ends share one [`EncryptionService`](regvault_crypto::EncryptionService)
//! passed in at construction.

mod config;
mod diagnostics;
mod error;
mod secure;
mod store;

pub use config::StoreConfig;
pub use diagnostics::{DiagnosticReport, Diagnostics, MigrationReport};
pub use error::{StoreError, StoreResult};
pub use secure::{LoadedRecords, SaveReport, SecureRecords};
pub use store::{FileStore, MemoryStore, RecordStore};
