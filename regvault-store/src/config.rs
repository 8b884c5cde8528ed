//! Persistence configuration.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};

/// Configuration for encrypted record persistence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Storage key the record sequence lives under. Backups use
    /// `<records_key>_backup_<unix millis>`.
    pub records_key: String,

    /// Whether a save may persist records whose encryption fell back to
    /// plaintext. When false such a save fails and nothing is written.
    pub allow_plaintext_fallback: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            records_key: "candidates".to_string(),
            allow_plaintext_fallback: true,
        }
    }
}

impl StoreConfig {
    /// Loads a config from JSON. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> StoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        crate::store::validate_key(&config.records_key)
            .map_err(|_| StoreError::Config(format!("bad records_key {:?}", config.records_key)))?;
        Ok(config)
    }

    /// Prefix shared by every backup of the record sequence.
    pub fn backup_prefix(&self) -> String {
        format!("{}_backup_", self.records_key)
    }

    /// Backup key for the given Unix timestamp in milliseconds.
    pub fn backup_key(&self, timestamp_millis: i64) -> String {
        format!("{}{timestamp_millis}", self.backup_prefix())
    }
}
