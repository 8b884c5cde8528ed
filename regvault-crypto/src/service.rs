//! The field encryption service and its key lifecycle.
//!
//! [`EncryptionService`] is either uninitialized (no key) or keyed. Every key
//! lives in an immutable [`KeyHandle`]; replacing the key swaps the handle,
//! and each operation runs against the handle it captured when it started.
//! An operation that is already running is therefore never affected by a
//! concurrent [`EncryptionService::derive_key`].

use crate::blob::EncryptedBlob;
use crate::cipher::{self, ALGORITHM};
use crate::config::EncryptionConfig;
use crate::error::{CryptoError, CryptoResult};
use crate::key::{self, DerivedKey, Salt};
use crate::record::{
    has_content, is_failure_marker, BatchResult, DecryptedRecord, Record, RecordEncryption,
    DECRYPTION_FAILED_MARKER, ENCRYPTED_AT_ATTR, ENCRYPTED_FLAG, VERSION_ATTR,
};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Plaintext used by [`KeyHandle::self_test`].
const SELF_TEST_PROBE: &str = "regvault self-test: ção, 名前, 🔐";

/// Outcome of decrypting a single field value.
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptOutcome {
    /// The value was a blob and decrypted cleanly.
    Decrypted(String),
    /// The value was not a blob and is returned untouched.
    Passthrough(Value),
    /// The value was a blob that could not be decrypted (wrong key, corrupt
    /// or tampered data, unsupported algorithm).
    Failed(String),
}

impl DecryptOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Text suitable for display. Failures render as
    /// [`DECRYPTION_FAILED_MARKER`], which is never real data.
    pub fn display_text(&self) -> String {
        match self {
            Self::Decrypted(s) => s.clone(),
            Self::Passthrough(Value::String(s)) => s.clone(),
            Self::Passthrough(Value::Null) => String::new(),
            Self::Passthrough(other) => other.to_string(),
            Self::Failed(_) => DECRYPTION_FAILED_MARKER.to_string(),
        }
    }
}

/// An immutable key plus the configuration it operates under.
///
/// Obtained from [`EncryptionService::snapshot`]; all field and record
/// operations are implemented here.
pub struct KeyHandle {
    key: DerivedKey,
    config: Arc<EncryptionConfig>,
    fingerprint: String,
}

impl KeyHandle {
    fn new(key: DerivedKey, config: Arc<EncryptionConfig>) -> Self {
        let fingerprint = key.fingerprint();
        Self {
            key,
            config,
            fingerprint,
        }
    }

    /// Loggable key identifier. See [`DerivedKey::fingerprint`].
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    /// Encrypts a string with a fresh nonce.
    pub fn encrypt_str(&self, plaintext: &str) -> CryptoResult<EncryptedBlob> {
        if plaintext.len() > self.config.max_field_len {
            return Err(CryptoError::FieldTooLarge {
                field_len: plaintext.len(),
                max: self.config.max_field_len,
            });
        }
        let data = cipher::encrypt_string(&self.key, plaintext)?;
        Ok(EncryptedBlob::new(data))
    }

    /// Encrypts a non-empty string value into its blob form. Any other value
    /// (empty string, null, numbers, objects) is returned unchanged.
    pub fn encrypt_value(&self, value: &Value) -> CryptoResult<Value> {
        match value {
            Value::String(s) if !s.is_empty() => Ok(self.encrypt_str(s)?.to_value()),
            other => Ok(other.clone()),
        }
    }

    /// Decrypts a blob value. Never fails: values without blob shape pass
    /// through and bad blobs are reported as [`DecryptOutcome::Failed`].
    pub fn decrypt_value(&self, value: &Value) -> DecryptOutcome {
        if !EncryptedBlob::looks_like_blob(value) {
            return DecryptOutcome::Passthrough(value.clone());
        }

        let blob: EncryptedBlob = match serde_json::from_value(value.clone()) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("malformed encrypted blob: {e}");
                return DecryptOutcome::Failed(format!("malformed blob: {e}"));
            }
        };

        if blob.algorithm != ALGORITHM {
            warn!("unsupported blob algorithm {}", blob.algorithm);
            return DecryptOutcome::Failed(format!("unsupported algorithm: {}", blob.algorithm));
        }

        match cipher::decrypt_string(&self.key, &blob.data) {
            Ok(plaintext) => DecryptOutcome::Decrypted(plaintext),
            Err(e) => {
                warn!(key = %self.fingerprint, "field decryption failed: {e}");
                DecryptOutcome::Failed(e.to_string())
            }
        }
    }

    /// Encrypts every present, non-empty sensitive field.
    ///
    /// The record is only flagged `_encrypted` when all of them succeed.
    /// Otherwise the original record comes back as
    /// [`RecordEncryption::Partial`] with the failing field names.
    pub fn encrypt_record(&self, record: &Record) -> RecordEncryption {
        let mut encrypted = record.clone();
        let mut failed_fields = Vec::new();

        for field in &self.config.sensitive_fields {
            let Some(value) = record.get(field) else {
                continue;
            };
            if !has_content(value) {
                continue;
            }
            if is_failure_marker(Some(value)) {
                warn!(field = %field, "refusing to encrypt the decryption-failed marker");
                failed_fields.push(field.clone());
                continue;
            }
            match self.encrypt_value(value) {
                Ok(sealed) => {
                    encrypted.insert(field.clone(), sealed);
                }
                Err(e) => {
                    warn!(field = %field, "field encryption failed: {e}");
                    failed_fields.push(field.clone());
                }
            }
        }

        if !failed_fields.is_empty() {
            return RecordEncryption::Partial {
                record: record.clone(),
                failed_fields,
            };
        }

        encrypted.insert(ENCRYPTED_FLAG, Value::Bool(true));
        encrypted.insert(
            VERSION_ATTR,
            Value::String(self.config.format_version.clone()),
        );
        encrypted.insert(
            ENCRYPTED_AT_ATTR,
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        RecordEncryption::Complete(encrypted)
    }

    /// Decrypts a record flagged `_encrypted` and strips the bookkeeping
    /// attributes. Unflagged records are returned as they are.
    pub fn decrypt_record(&self, record: &Record) -> DecryptedRecord {
        if !record.is_encrypted() {
            return DecryptedRecord {
                record: record.clone(),
                failed_fields: Vec::new(),
            };
        }

        let mut plain = record.clone();
        let mut failed_fields = Vec::new();

        for field in &self.config.sensitive_fields {
            let Some(value) = record.get(field) else {
                continue;
            };
            match self.decrypt_value(value) {
                DecryptOutcome::Decrypted(text) => {
                    plain.insert(field.clone(), Value::String(text));
                }
                DecryptOutcome::Passthrough(_) => {}
                DecryptOutcome::Failed(_) => {
                    plain.insert(
                        field.clone(),
                        Value::String(DECRYPTION_FAILED_MARKER.to_string()),
                    );
                    failed_fields.push(field.clone());
                }
            }
        }

        plain.strip_bookkeeping();
        DecryptedRecord {
            record: plain,
            failed_fields,
        }
    }

    /// Encrypts a sequence of records in order.
    ///
    /// Entries that are not objects, or whose encryption is partial, are kept
    /// in their original form and reported in [`BatchResult::fallbacks`].
    /// Records already flagged `_encrypted` are left alone.
    pub fn encrypt_records(&self, records: &[Value]) -> BatchResult {
        let mut result = BatchResult::with_capacity(records.len());

        for (index, entry) in records.iter().enumerate() {
            let record = match Record::try_from(entry.clone()) {
                Ok(record) => record,
                Err(_) => {
                    warn!(index, "skipping encryption of non-object entry");
                    result.records.push(entry.clone());
                    result.fallbacks.push(index);
                    continue;
                }
            };

            if record.is_encrypted() {
                result.records.push(entry.clone());
                continue;
            }

            match self.encrypt_record(&record) {
                RecordEncryption::Complete(sealed) => result.records.push(sealed.into_value()),
                RecordEncryption::Partial { failed_fields, .. } => {
                    warn!(index, ?failed_fields, "record left unencrypted");
                    result.records.push(entry.clone());
                    result.fallbacks.push(index);
                }
            }
        }

        debug!(
            total = records.len(),
            fallbacks = result.fallbacks.len(),
            "encrypted record batch"
        );
        result
    }

    /// Decrypts a sequence of records in order. Non-object entries are kept
    /// in their original form and reported in [`BatchResult::fallbacks`].
    pub fn decrypt_records(&self, records: &[Value]) -> BatchResult {
        let mut result = BatchResult::with_capacity(records.len());

        for (index, entry) in records.iter().enumerate() {
            match Record::try_from(entry.clone()) {
                Ok(record) => {
                    let decrypted = self.decrypt_record(&record);
                    if !decrypted.is_clean() {
                        warn!(
                            index,
                            failed_fields = ?decrypted.failed_fields,
                            "record decrypted with unreadable fields"
                        );
                        result.unreadable.push((index, decrypted.failed_fields));
                    }
                    result.records.push(decrypted.record.into_value());
                }
                Err(_) => {
                    warn!(index, "skipping decryption of non-object entry");
                    result.records.push(entry.clone());
                    result.fallbacks.push(index);
                }
            }
        }

        debug!(
            total = records.len(),
            fallbacks = result.fallbacks.len(),
            unreadable = result.unreadable.len(),
            "decrypted record batch"
        );
        result
    }

    /// Round-trips a fixed probe string under this key.
    pub fn self_test(&self) -> bool {
        let blob = match self.encrypt_str(SELF_TEST_PROBE) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("self-test encryption failed: {e}");
                return false;
            }
        };
        match self.decrypt_value(&blob.to_value()) {
            DecryptOutcome::Decrypted(text) => text == SELF_TEST_PROBE,
            _ => false,
        }
    }
}

/// Owns the current key and exposes the field/record operations.
///
/// Construct one per session and share it (usually behind an `Arc`) with the
/// components that persist and inspect records.
pub struct EncryptionService {
    config: Arc<EncryptionConfig>,
    current: RwLock<Option<Arc<KeyHandle>>>,
}

impl EncryptionService {
    pub fn new(config: EncryptionConfig) -> Self {
        Self {
            config: Arc::new(config),
            current: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &EncryptionConfig {
        &self.config
    }

    /// Derives a key from `secret` and makes it current.
    ///
    /// The salt comes from the secret and the configured seed, so the same
    /// secret always yields the same key. When the secret is a user
    /// identifier such as an email address the key is only as strong as that
    /// identifier is hard to guess. On failure the previous key (if any)
    /// stays in place.
    pub fn derive_key(&self, secret: &str) -> CryptoResult<Arc<KeyHandle>> {
        let salt = Salt::from_identifier(secret, &self.config.salt_seed);
        let key = key::derive_key(secret, &salt, &self.config.kdf)?;
        Ok(self.install_key(key))
    }

    /// Makes externally derived key material current.
    pub fn install_key(&self, key: DerivedKey) -> Arc<KeyHandle> {
        let handle = Arc::new(KeyHandle::new(key, Arc::clone(&self.config)));
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&handle));

        match previous {
            Some(old) => info!(
                old = %old.fingerprint(),
                new = %handle.fingerprint(),
                "encryption key replaced"
            ),
            None => info!(key = %handle.fingerprint(), "encryption key installed"),
        }
        handle
    }

    pub fn has_key(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The current key handle. Operations started from it keep using it even
    /// if the service key is replaced meanwhile.
    pub fn snapshot(&self) -> CryptoResult<Arc<KeyHandle>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CryptoError::UninitializedKey)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> CryptoResult<EncryptedBlob> {
        self.snapshot()?.encrypt_str(plaintext)
    }

    pub fn encrypt_value(&self, value: &Value) -> CryptoResult<Value> {
        self.snapshot()?.encrypt_value(value)
    }

    pub fn decrypt_value(&self, value: &Value) -> CryptoResult<DecryptOutcome> {
        Ok(self.snapshot()?.decrypt_value(value))
    }

    pub fn encrypt_record(&self, record: &Record) -> CryptoResult<RecordEncryption> {
        Ok(self.snapshot()?.encrypt_record(record))
    }

    pub fn decrypt_record(&self, record: &Record) -> CryptoResult<DecryptedRecord> {
        Ok(self.snapshot()?.decrypt_record(record))
    }

    pub fn encrypt_records(&self, records: &[Value]) -> CryptoResult<BatchResult> {
        Ok(self.snapshot()?.encrypt_records(records))
    }

    pub fn decrypt_records(&self, records: &[Value]) -> CryptoResult<BatchResult> {
        Ok(self.snapshot()?.decrypt_records(records))
    }

    /// Health check after key (re)derivation. `false` without a key.
    pub fn self_test(&self) -> bool {
        match self.snapshot() {
            Ok(handle) => handle.self_test(),
            Err(_) => {
                debug!("self-test requested without a key");
                false
            }
        }
    }
}

impl Default for EncryptionService {
    fn default() -> Self {
        Self::new(EncryptionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_random_key;
    use serde_json::json;

    fn keyed() -> EncryptionService {
        let service = EncryptionService::new(EncryptionConfig::for_tests());
        service.install_key(generate_random_key());
        service
    }

    #[test]
    fn starts_uninitialized() {
        let service = EncryptionService::new(EncryptionConfig::for_tests());
        assert!(!service.has_key());
        assert!(!service.self_test());
        assert!(matches!(
            service.snapshot(),
            Err(CryptoError::UninitializedKey)
        ));
    }

    #[test]
    fn install_makes_keyed() {
        let service = keyed();
        assert!(service.has_key());
        assert!(service.self_test());
    }

    #[test]
    fn snapshot_survives_replacement() {
        let service = keyed();
        let before = service.snapshot().unwrap();
        let blob = before.encrypt_value(&json!("held")).unwrap();

        service.install_key(generate_random_key());

        assert_eq!(
            before.decrypt_value(&blob),
            DecryptOutcome::Decrypted("held".into())
        );
        assert!(service.decrypt_value(&blob).unwrap().is_failed());
    }

    #[test]
    fn oversized_field_rejected() {
        let service = keyed();
        let big = "x".repeat(service.config().max_field_len + 1);
        let err = service.encrypt_str(&big).unwrap_err();
        assert!(matches!(err, CryptoError::FieldTooLarge { .. }));
    }

    #[test]
    fn unsupported_algorithm_fails() {
        let service = keyed();
        let mut blob = service.encrypt_value(&json!("x")).unwrap();
        blob["algorithm"] = json!("AES-GCM");
        let outcome = service.decrypt_value(&blob).unwrap();
        assert!(matches!(outcome, DecryptOutcome::Failed(reason) if reason.contains("AES-GCM")));
    }

    #[test]
    fn corrupt_encoding_fails_rather_than_passing_through() {
        let service = keyed();
        let value = json!({ "ciphertext": "%%%", "nonce": "%%%" });
        assert!(service.decrypt_value(&value).unwrap().is_failed());
    }

    #[test]
    fn display_text_variants() {
        assert_eq!(DecryptOutcome::Decrypted("a".into()).display_text(), "a");
        assert_eq!(DecryptOutcome::Passthrough(json!("b")).display_text(), "b");
        assert_eq!(DecryptOutcome::Passthrough(json!(3)).display_text(), "3");
        assert_eq!(DecryptOutcome::Passthrough(Value::Null).display_text(), "");
        assert_eq!(
            DecryptOutcome::Failed("x".into()).display_text(),
            DECRYPTION_FAILED_MARKER
        );
    }

    #[test]
    fn failed_derivation_keeps_previous_key() {
        let service = keyed();
        let before = service.snapshot().unwrap().fingerprint().to_string();
        assert!(service.derive_key("").is_err());
        assert_eq!(service.snapshot().unwrap().fingerprint(), before);
    }
}
