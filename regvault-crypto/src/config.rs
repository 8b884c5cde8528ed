//! Encryption service configuration.

use crate::error::{CryptoError, CryptoResult};
use crate::key::KdfParams;
use serde::{Deserialize, Serialize};

/// Configuration for the field encryption service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Application constant mixed into the identifier-derived salt.
    pub salt_seed: String,

    /// Argon2id cost parameters.
    pub kdf: KdfParams,

    /// Record fields that are encrypted at rest.
    pub sensitive_fields: Vec<String>,

    /// Stamped into `_encryptionVersion` on encrypted records.
    pub format_version: String,

    /// Largest string value (in bytes) accepted for field encryption.
    pub max_field_len: usize,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            salt_seed: "regvault-field-encryption-v1".to_string(),
            kdf: KdfParams::default(),
            sensitive_fields: vec![
                "fullName".to_string(),
                "dateOfBirth".to_string(),
                "observation".to_string(),
                "referenceName".to_string(),
            ],
            format_version: "1.0".to_string(),
            max_field_len: 64 * 1024,
        }
    }
}

impl EncryptionConfig {
    /// Loads a config from JSON. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> CryptoResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Same defaults with the cheapest KDF parameters, for tests.
    pub fn for_tests() -> Self {
        Self {
            kdf: KdfParams::minimal(),
            ..Self::default()
        }
    }

    pub fn is_sensitive(&self, field: &str) -> bool {
        self.sensitive_fields.iter().any(|f| f == field)
    }

    pub fn validate(&self) -> CryptoResult<()> {
        if self.salt_seed.is_empty() {
            return Err(CryptoError::Config("salt_seed must not be empty".into()));
        }
        if self.sensitive_fields.is_empty() {
            return Err(CryptoError::Config(
                "at least one sensitive field is required".into(),
            ));
        }
        if self.max_field_len == 0 {
            return Err(CryptoError::Config("max_field_len must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EncryptionConfig::default();
        assert_eq!(config.format_version, "1.0");
        assert_eq!(config.sensitive_fields.len(), 4);
        assert!(config.is_sensitive("dateOfBirth"));
        assert!(!config.is_sensitive("email"));
        assert_eq!(config.kdf, KdfParams::default());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            EncryptionConfig::from_json_str(r#"{ "sensitive_fields": ["cpf"] }"#).unwrap();
        assert_eq!(config.sensitive_fields, vec!["cpf".to_string()]);
        assert_eq!(config.salt_seed, EncryptionConfig::default().salt_seed);
    }

    #[test]
    fn empty_field_list_rejected() {
        let err = EncryptionConfig::from_json_str(r#"{ "sensitive_fields": [] }"#).unwrap_err();
        assert!(matches!(err, CryptoError::Config(_)));
    }

    #[test]
    fn malformed_json_rejected() {
        let err = EncryptionConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, CryptoError::Serialization(_)));
    }
}
