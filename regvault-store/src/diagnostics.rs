//! Key state inspection, forced re-initialization and legacy data migration.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::secure::establish_key;
use crate::store::RecordStore;
use chrono::Utc;
use regvault_crypto::{EncryptionService, Record};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Snapshot of encryption health for the stored records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    pub key_present: bool,
    pub key_fingerprint: Option<String>,
    pub self_test_passed: bool,
    pub total_records: usize,
    pub encrypted_records: usize,
    pub plaintext_records: usize,
    /// Entries that are not records at all.
    pub malformed_entries: usize,
    /// Backup keys of earlier migrations, oldest first.
    pub backups: Vec<String>,
}

impl DiagnosticReport {
    /// Whether any stored record still needs [`Diagnostics::migrate`].
    pub fn needs_migration(&self) -> bool {
        self.plaintext_records > 0
    }
}

/// Result of [`Diagnostics::migrate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Where the pre-migration data was copied. `None` when there was
    /// nothing to migrate.
    pub backup_key: Option<String>,
    pub migrated: usize,
    pub already_encrypted: usize,
    /// Positions left in their original form.
    pub fallbacks: Vec<usize>,
}

/// Inspects and repairs the encryption state of a record store.
pub struct Diagnostics<S> {
    service: Arc<EncryptionService>,
    store: Arc<S>,
    config: StoreConfig,
}

impl<S: RecordStore> Diagnostics<S> {
    pub fn new(service: Arc<EncryptionService>, store: Arc<S>, config: StoreConfig) -> Self {
        Self {
            service,
            store,
            config,
        }
    }

    pub fn report(&self) -> StoreResult<DiagnosticReport> {
        let handle = self.service.snapshot().ok();
        let key_fingerprint = handle.as_ref().map(|h| h.fingerprint().to_string());
        let self_test_passed = handle.as_ref().is_some_and(|h| h.self_test());

        let records = self
            .store
            .load(&self.config.records_key)?
            .unwrap_or_default();

        let mut encrypted_records = 0;
        let mut plaintext_records = 0;
        let mut malformed_entries = 0;
        for entry in &records {
            match Record::try_from(entry.clone()) {
                Ok(record) if record.is_encrypted() => encrypted_records += 1,
                Ok(_) => plaintext_records += 1,
                Err(_) => malformed_entries += 1,
            }
        }

        let prefix = self.config.backup_prefix();
        let mut backups: Vec<String> = self
            .store
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect();
        backups.sort_by_key(|key| key[prefix.len()..].parse::<i64>().unwrap_or(i64::MAX));

        Ok(DiagnosticReport {
            key_present: key_fingerprint.is_some(),
            key_fingerprint,
            self_test_passed,
            total_records: records.len(),
            encrypted_records,
            plaintext_records,
            malformed_entries,
            backups,
        })
    }

    /// Forces key derivation for `secret` and runs the self-test. Returns the
    /// new key fingerprint.
    pub async fn reinitialize(&self, secret: &str) -> StoreResult<String> {
        let handle = establish_key(Arc::clone(&self.service), secret).await?;
        Ok(handle.fingerprint().to_string())
    }

    /// Encrypts every stored record that lacks the `_encrypted` flag.
    ///
    /// The untouched sequence is first copied to a fresh timestamped backup
    /// key; the migrated sequence is written only after the backup succeeds.
    /// Fails without touching storage when no key is present, or when the
    /// fallback policy forbids leaving entries unencrypted. Nothing is
    /// written when every record is already flagged.
    pub fn migrate(&self) -> StoreResult<MigrationReport> {
        let handle = self.service.snapshot()?;
        let records = self
            .store
            .load(&self.config.records_key)?
            .unwrap_or_default();

        let mut already_encrypted = 0;
        let mut pending = 0;
        let mut malformed = Vec::new();
        for (index, entry) in records.iter().enumerate() {
            match Record::try_from(entry.clone()) {
                Ok(record) if record.is_encrypted() => already_encrypted += 1,
                Ok(_) => pending += 1,
                Err(_) => malformed.push(index),
            }
        }

        if pending == 0 {
            info!(already_encrypted, "nothing to migrate");
            return Ok(MigrationReport {
                backup_key: None,
                migrated: 0,
                already_encrypted,
                fallbacks: malformed,
            });
        }

        let batch = handle.encrypt_records(&records);
        if !batch.fallbacks.is_empty() && !self.config.allow_plaintext_fallback {
            warn!(positions = ?batch.fallbacks, "migration aborted, entries would stay unencrypted");
            return Err(StoreError::PartialEncryption(batch.fallbacks));
        }

        let backup_key = self.unused_backup_key()?;
        self.store.save(&backup_key, &records)?;
        self.store.save(&self.config.records_key, &batch.records)?;

        let migrated = records.len() - already_encrypted - batch.fallbacks.len();
        info!(
            backup = %backup_key,
            migrated,
            already_encrypted,
            fallbacks = batch.fallbacks.len(),
            "record migration complete"
        );

        Ok(MigrationReport {
            backup_key: Some(backup_key),
            migrated,
            already_encrypted,
            fallbacks: batch.fallbacks,
        })
    }

    /// Backup key for the current time, moved forward one millisecond at a
    /// time past any key already in the store.
    fn unused_backup_key(&self) -> StoreResult<String> {
        let existing = self.store.keys()?;
        let mut millis = Utc::now().timestamp_millis();
        loop {
            let key = self.config.backup_key(millis);
            if !existing.contains(&key) {
                return Ok(key);
            }
            millis += 1;
        }
    }
}
