//! Save/load through the encrypting front end.

use pretty_assertions::assert_eq;
use regvault_crypto::{
    CryptoError, EncryptedBlob, EncryptionConfig, EncryptionService, DECRYPTION_FAILED_MARKER,
    ENCRYPTED_FLAG,
};
use regvault_store::{MemoryStore, RecordStore, SecureRecords, StoreConfig, StoreError};
use serde_json::{json, Value};
use std::sync::Arc;

fn candidates() -> Vec<Value> {
    vec![
        json!({
            "id": 1,
            "fullName": "Ana Lima",
            "dateOfBirth": "1988-02-03",
            "observation": "Night shift only",
            "referenceName": "Carlos Lima",
            "course": "Nursing",
        }),
        json!({
            "id": 2,
            "fullName": "Bruno Costa",
            "dateOfBirth": "1995-11-30",
            "course": "Welding",
        }),
    ]
}

fn secure_records(config: StoreConfig) -> SecureRecords<MemoryStore> {
    let service = Arc::new(EncryptionService::new(EncryptionConfig::for_tests()));
    SecureRecords::new(service, Arc::new(MemoryStore::new()), config)
}

#[tokio::test]
async fn login_then_round_trip() {
    let secure = secure_records(StoreConfig::default());
    let fingerprint = secure.on_login("ana@clinic.org").await.unwrap();
    assert_eq!(fingerprint.len(), 16);

    let records = candidates();
    let report = secure.save_records(&records).unwrap();
    assert_eq!(report.saved, 2);
    assert!(report.plaintext_fallbacks.is_empty());

    // Caller's copy is untouched
    assert_eq!(records, candidates());

    let stored = secure.store().load("candidates").unwrap().unwrap();
    for record in &stored {
        assert_eq!(record[ENCRYPTED_FLAG], json!(true));
        assert!(EncryptedBlob::from_value(&record["fullName"]).is_some());
        assert!(record.get("course").is_some());
    }
    assert!(!serde_json::to_string(&stored).unwrap().contains("Ana Lima"));

    assert_eq!(secure.load_records().unwrap().records, records);
}

#[tokio::test]
async fn save_without_login_fails() {
    let secure = secure_records(StoreConfig::default());
    let err = secure.save_records(&candidates()).unwrap_err();
    assert!(matches!(err, StoreError::Crypto(CryptoError::UninitializedKey)));
    assert!(secure.store().keys().unwrap().is_empty());
}

#[tokio::test]
async fn empty_storage_loads_empty() {
    let secure = secure_records(StoreConfig::default());
    secure.on_login("ana@clinic.org").await.unwrap();
    assert!(secure.load_records().unwrap().records.is_empty());
}

#[tokio::test]
async fn login_with_empty_secret_fails() {
    let secure = secure_records(StoreConfig::default());
    let err = secure.on_login("").await.unwrap_err();
    assert!(matches!(err, StoreError::Crypto(CryptoError::KeyDerivation(_))));
    assert!(!secure.service().has_key());
}

#[tokio::test]
async fn other_user_sees_markers_not_plaintext() {
    let service = Arc::new(EncryptionService::new(EncryptionConfig::for_tests()));
    let store = Arc::new(MemoryStore::new());
    let secure = SecureRecords::new(Arc::clone(&service), Arc::clone(&store), StoreConfig::default());

    secure.on_login("ana@clinic.org").await.unwrap();
    secure.save_records(&candidates()).unwrap();

    secure.on_login("intruder@clinic.org").await.unwrap();
    let loaded = secure.load_records().unwrap();
    assert_eq!(loaded.records.len(), 2);
    assert_eq!(loaded.records[0]["fullName"], json!(DECRYPTION_FAILED_MARKER));
    assert_eq!(loaded.records[0]["course"], json!("Nursing"));
    assert!(!loaded.is_clean());
    assert_eq!(loaded.unreadable.len(), 2);
    assert_eq!(loaded.unreadable[0].0, 0);
    assert_eq!(loaded.unreadable[1].1, vec!["fullName".to_string(), "dateOfBirth".to_string()]);
}

#[tokio::test]
async fn strict_config_refuses_plaintext_fallback() {
    let config = StoreConfig {
        allow_plaintext_fallback: false,
        ..StoreConfig::default()
    };
    let secure = secure_records(config);
    secure.on_login("ana@clinic.org").await.unwrap();

    let mut records = candidates();
    records.push(json!("corrupted entry"));
    let err = secure.save_records(&records).unwrap_err();
    assert!(matches!(err, StoreError::PartialEncryption(ref positions) if positions == &vec![2]));
    assert!(secure.store().load("candidates").unwrap().is_none());
}

#[tokio::test]
async fn lenient_config_persists_fallback_in_place() {
    let secure = secure_records(StoreConfig::default());
    secure.on_login("ana@clinic.org").await.unwrap();

    let mut records = candidates();
    records.insert(1, json!(null));
    let report = secure.save_records(&records).unwrap();
    assert_eq!(report.plaintext_fallbacks, vec![1]);
    assert_eq!(secure.load_records().unwrap().records, records);
}

#[tokio::test]
async fn records_read_under_wrong_key_cannot_overwrite_ciphertext() {
    let secure = secure_records(StoreConfig::default());
    secure.on_login("ana@clinic.org").await.unwrap();
    secure.save_records(&candidates()).unwrap();
    let sealed = secure.store().load("candidates").unwrap();

    secure.on_login("other@clinic.org").await.unwrap();
    let loaded = secure.load_records().unwrap();
    let err = secure.save_records(&loaded.records).unwrap_err();
    assert!(matches!(err, StoreError::UnreadableRecords(ref positions) if positions == &vec![0, 1]));
    assert_eq!(secure.store().load("candidates").unwrap(), sealed);

    secure.on_login("ana@clinic.org").await.unwrap();
    let restored = secure.load_records().unwrap();
    assert!(restored.is_clean());
    assert_eq!(restored.records, candidates());
}

#[tokio::test]
async fn failure_marker_refused_even_in_unflagged_record() {
    let secure = secure_records(StoreConfig::default());
    secure.on_login("ana@clinic.org").await.unwrap();

    let mut records = candidates();
    records[1]["observation"] = json!(DECRYPTION_FAILED_MARKER);
    let err = secure.save_records(&records).unwrap_err();
    assert!(matches!(err, StoreError::UnreadableRecords(ref positions) if positions == &vec![1]));
    assert!(secure.store().load("candidates").unwrap().is_none());
}
