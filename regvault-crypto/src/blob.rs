//! The stored form of a single encrypted field value.
//!
//! A blob is kept inline in the record as a JSON object:
//!
//! ```json
//! {
//!   "ciphertext": "<base64>",
//!   "nonce": "<base64, 12 bytes>",
//!   "algorithm": "ChaCha20-Poly1305",
//!   "encryptedAt": "2026-10-19T12:00:00Z"
//! }
//! ```

use crate::cipher::{EncryptedData, ALGORITHM, NONCE_SIZE};
use crate::error::CryptoError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An encrypted field value. Meaningless without the exact key that made it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BlobWire", into = "BlobWire")]
pub struct EncryptedBlob {
    pub data: EncryptedData,
    pub algorithm: String,
    pub encrypted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobWire {
    ciphertext: String,
    nonce: String,
    #[serde(default = "default_algorithm")]
    algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encrypted_at: Option<DateTime<Utc>>,
}

fn default_algorithm() -> String {
    ALGORITHM.to_string()
}

impl TryFrom<BlobWire> for EncryptedBlob {
    type Error = CryptoError;

    fn try_from(wire: BlobWire) -> Result<Self, Self::Error> {
        let nonce_bytes = STANDARD
            .decode(&wire.nonce)
            .map_err(|e| CryptoError::Decryption(format!("invalid nonce encoding: {e}")))?;
        let nonce: [u8; NONCE_SIZE] = nonce_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::Decryption(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                nonce_bytes.len()
            ))
        })?;
        let ciphertext = STANDARD
            .decode(&wire.ciphertext)
            .map_err(|e| CryptoError::Decryption(format!("invalid ciphertext encoding: {e}")))?;

        Ok(Self {
            data: EncryptedData { nonce, ciphertext },
            algorithm: wire.algorithm,
            encrypted_at: wire.encrypted_at,
        })
    }
}

impl From<EncryptedBlob> for BlobWire {
    fn from(blob: EncryptedBlob) -> Self {
        Self {
            ciphertext: STANDARD.encode(&blob.data.ciphertext),
            nonce: STANDARD.encode(blob.data.nonce),
            algorithm: blob.algorithm,
            encrypted_at: blob.encrypted_at,
        }
    }
}

impl EncryptedBlob {
    /// Wraps freshly produced ciphertext, stamping the current time.
    pub fn new(data: EncryptedData) -> Self {
        Self {
            data,
            algorithm: ALGORITHM.to_string(),
            encrypted_at: Some(Utc::now()),
        }
    }

    /// Whether `value` has the shape of a blob (an object carrying both
    /// `ciphertext` and `nonce`). Says nothing about whether it decodes.
    pub fn looks_like_blob(value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|obj| obj.contains_key("ciphertext") && obj.contains_key("nonce"))
    }

    /// Parses a blob out of a JSON value. Returns `None` for anything that is
    /// not a well-formed blob.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !Self::looks_like_blob(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        // A struct of strings always serializes.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::encrypt;
    use crate::key::generate_random_key;
    use serde_json::json;

    #[test]
    fn json_shape() {
        let key = generate_random_key();
        let blob = EncryptedBlob::new(encrypt(&key, b"x").unwrap());
        let value = blob.to_value();

        let obj = value.as_object().unwrap();
        assert!(obj["ciphertext"].is_string());
        assert!(obj["nonce"].is_string());
        assert_eq!(obj["algorithm"], ALGORITHM);
        assert!(obj["encryptedAt"].is_string());
    }

    #[test]
    fn value_round_trip() {
        let key = generate_random_key();
        let blob = EncryptedBlob::new(encrypt(&key, b"x").unwrap());
        assert_eq!(EncryptedBlob::from_value(&blob.to_value()), Some(blob));
    }

    #[test]
    fn missing_fields_are_not_blobs() {
        assert!(EncryptedBlob::from_value(&json!("plain")).is_none());
        assert!(EncryptedBlob::from_value(&json!({ "ciphertext": "AAAA" })).is_none());
        assert!(EncryptedBlob::from_value(&json!({ "nonce": "AAAA" })).is_none());
        assert!(EncryptedBlob::from_value(&Value::Null).is_none());
    }

    #[test]
    fn wrong_nonce_length_is_not_a_blob() {
        let value = json!({ "ciphertext": "AAAA", "nonce": "AAAA" });
        assert!(EncryptedBlob::looks_like_blob(&value));
        assert!(EncryptedBlob::from_value(&value).is_none());
    }

    #[test]
    fn algorithm_and_timestamp_optional_on_read() {
        let value = json!({
            "ciphertext": STANDARD.encode([0u8; 20]),
            "nonce": STANDARD.encode([0u8; NONCE_SIZE]),
        });
        let blob = EncryptedBlob::from_value(&value).unwrap();
        assert_eq!(blob.algorithm, ALGORITHM);
        assert!(blob.encrypted_at.is_none());
    }
}
