//! Transparent encryption around a [`RecordStore`].
//!
//! Saves encrypt before writing and loads decrypt after reading. The caller's
//! in-memory records are borrowed, never modified, so they stay plaintext.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::RecordStore;
use regvault_crypto::{EncryptionService, KeyHandle, Record};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Derives a key for `secret` off the async executor, then self-tests it.
///
/// Argon2 is deliberately slow, so derivation runs on the blocking pool.
pub(crate) async fn establish_key(
    service: Arc<EncryptionService>,
    secret: &str,
) -> StoreResult<Arc<KeyHandle>> {
    let secret = secret.to_string();
    let handle = tokio::task::spawn_blocking(move || service.derive_key(&secret))
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;

    if !handle.self_test() {
        warn!(key = %handle.fingerprint(), "encryption self-test failed");
        return Err(StoreError::SelfTestFailed(handle.fingerprint().to_string()));
    }
    info!(key = %handle.fingerprint(), "encryption ready");
    Ok(handle)
}

/// Outcome of [`SecureRecords::save_records`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    /// Positions written without encryption (only possible when
    /// [`StoreConfig::allow_plaintext_fallback`] is set).
    pub plaintext_fallbacks: Vec<usize>,
}

/// Outcome of [`SecureRecords::load_records`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadedRecords {
    pub records: Vec<Value>,
    /// Positions and field names that could not be decrypted with the
    /// current key. Those fields hold the decryption-failed marker, and
    /// [`SecureRecords::save_records`] refuses to write them back.
    pub unreadable: Vec<(usize, Vec<String>)>,
}

impl LoadedRecords {
    pub fn is_clean(&self) -> bool {
        self.unreadable.is_empty()
    }
}

/// Encrypting front for a record store.
pub struct SecureRecords<S> {
    service: Arc<EncryptionService>,
    store: Arc<S>,
    config: StoreConfig,
}

impl<S: RecordStore> SecureRecords<S> {
    pub fn new(service: Arc<EncryptionService>, store: Arc<S>, config: StoreConfig) -> Self {
        Self {
            service,
            store,
            config,
        }
    }

    pub fn service(&self) -> &Arc<EncryptionService> {
        &self.service
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Authentication-success hook: derives the session key from `secret`
    /// and verifies it with a self-test. Returns the key fingerprint.
    pub async fn on_login(&self, secret: &str) -> StoreResult<String> {
        let handle = establish_key(Arc::clone(&self.service), secret).await?;
        Ok(handle.fingerprint().to_string())
    }

    /// Encrypts `records` and writes them under the records key.
    ///
    /// Fails with [`StoreError::UnreadableRecords`] when a sensitive field
    /// still holds the decryption-failed marker, whatever the fallback
    /// policy.
    pub fn save_records(&self, records: &[Value]) -> StoreResult<SaveReport> {
        let handle = self.service.snapshot()?;

        let sensitive = &handle.config().sensitive_fields;
        let unreadable: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                Record::try_from((*entry).clone())
                    .is_ok_and(|record| !record.unreadable_fields(sensitive).is_empty())
            })
            .map(|(index, _)| index)
            .collect();
        if !unreadable.is_empty() {
            warn!(positions = ?unreadable, "refusing to save records with unreadable fields");
            return Err(StoreError::UnreadableRecords(unreadable));
        }

        let batch = handle.encrypt_records(records);

        if !batch.fallbacks.is_empty() {
            if !self.config.allow_plaintext_fallback {
                return Err(StoreError::PartialEncryption(batch.fallbacks));
            }
            warn!(
                positions = ?batch.fallbacks,
                "persisting records that could not be encrypted"
            );
        }

        self.store.save(&self.config.records_key, &batch.records)?;
        debug!(count = batch.records.len(), "saved encrypted records");
        Ok(SaveReport {
            saved: batch.records.len(),
            plaintext_fallbacks: batch.fallbacks,
        })
    }

    /// Reads the stored records and decrypts them. A missing key in storage
    /// reads as an empty sequence.
    pub fn load_records(&self) -> StoreResult<LoadedRecords> {
        let handle = self.service.snapshot()?;
        let Some(stored) = self.store.load(&self.config.records_key)? else {
            return Ok(LoadedRecords::default());
        };
        let batch = handle.decrypt_records(&stored);
        debug!(
            count = batch.records.len(),
            unreadable = batch.unreadable.len(),
            "loaded records"
        );
        Ok(LoadedRecords {
            records: batch.records,
            unreadable: batch.unreadable,
        })
    }
}
