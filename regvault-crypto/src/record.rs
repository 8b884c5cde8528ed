//! Application records and the results of encrypting or decrypting them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Set to `true` on records whose sensitive fields hold blobs.
pub const ENCRYPTED_FLAG: &str = "_encrypted";

/// Format version stamped on encrypted records.
pub const VERSION_ATTR: &str = "_encryptionVersion";

/// RFC 3339 time at which the record was encrypted.
pub const ENCRYPTED_AT_ATTR: &str = "_encryptedAt";

/// Shown in place of a field that could not be decrypted. Display only.
pub const DECRYPTION_FAILED_MARKER: &str = "[decryption failed]";

/// A record: a JSON object with a mix of sensitive and ordinary fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Whether the record carries `_encrypted: true`.
    pub fn is_encrypted(&self) -> bool {
        matches!(self.0.get(ENCRYPTED_FLAG), Some(Value::Bool(true)))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Fields among `sensitive` whose value is the decryption-failed marker.
    /// Such a record came out of a failed decryption and must not be
    /// written back over its ciphertext.
    pub fn unreadable_fields(&self, sensitive: &[String]) -> Vec<String> {
        sensitive
            .iter()
            .filter(|field| is_failure_marker(self.0.get(field.as_str())))
            .cloned()
            .collect()
    }

    /// Removes the three bookkeeping attributes.
    pub(crate) fn strip_bookkeeping(&mut self) {
        self.0.remove(ENCRYPTED_FLAG);
        self.0.remove(VERSION_ATTR);
        self.0.remove(ENCRYPTED_AT_ATTR);
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = Value;

    /// Fails (handing the value back) for anything that is not a JSON object.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.into_value()
    }
}

pub(crate) fn is_failure_marker(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::String(s)) if s == DECRYPTION_FAILED_MARKER)
}

/// Whether a field value counts as present for encryption purposes.
pub(crate) fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Result of [`EncryptionService::encrypt_record`](crate::EncryptionService::encrypt_record).
#[derive(Clone, Debug, PartialEq)]
pub enum RecordEncryption {
    /// Every sensitive field was encrypted and the record is flagged.
    Complete(Record),
    /// At least one field failed. `record` is the unmodified plaintext
    /// record; the caller decides whether it may be persisted.
    Partial {
        record: Record,
        failed_fields: Vec<String>,
    },
}

impl RecordEncryption {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    pub fn into_record(self) -> Record {
        match self {
            Self::Complete(record) | Self::Partial { record, .. } => record,
        }
    }
}

/// Result of [`EncryptionService::decrypt_record`](crate::EncryptionService::decrypt_record).
#[derive(Clone, Debug, PartialEq)]
pub struct DecryptedRecord {
    /// The plain record. Fields listed in `failed_fields` hold
    /// [`DECRYPTION_FAILED_MARKER`] and must not be written back.
    pub record: Record,
    pub failed_fields: Vec<String>,
}

impl DecryptedRecord {
    pub fn is_clean(&self) -> bool {
        self.failed_fields.is_empty()
    }
}

/// Output of a batch operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchResult {
    /// Same length and order as the input.
    pub records: Vec<Value>,
    /// Indices of entries that fell back to their original form.
    pub fallbacks: Vec<usize>,
    /// Decryption only: index and failed field names of every record that
    /// came back holding [`DECRYPTION_FAILED_MARKER`].
    pub unreadable: Vec<(usize, Vec<String>)>,
}

impl BatchResult {
    pub(crate) fn with_capacity(len: usize) -> Self {
        Self {
            records: Vec::with_capacity(len),
            ..Self::default()
        }
    }

    /// Whether every entry went through without a fallback or an
    /// unreadable field.
    pub fn is_clean(&self) -> bool {
        self.fallbacks.is_empty() && self.unreadable.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encrypted_flag_must_be_boolean_true() {
        let flagged = Record::try_from(json!({ "_encrypted": true })).unwrap();
        let stringy = Record::try_from(json!({ "_encrypted": "true" })).unwrap();
        let unflagged = Record::try_from(json!({ "name": "x" })).unwrap();
        assert!(flagged.is_encrypted());
        assert!(!stringy.is_encrypted());
        assert!(!unflagged.is_encrypted());
    }

    #[test]
    fn non_objects_are_not_records() {
        assert_eq!(Record::try_from(json!("oops")), Err(json!("oops")));
        assert_eq!(Record::try_from(json!([1, 2])), Err(json!([1, 2])));
    }

    #[test]
    fn strip_removes_only_bookkeeping() {
        let mut record = Record::try_from(json!({
            "_encrypted": true,
            "_encryptionVersion": "1.0",
            "_encryptedAt": "2026-01-01T00:00:00Z",
            "city": "Recife",
        }))
        .unwrap();
        record.strip_bookkeeping();
        assert_eq!(record.into_value(), json!({ "city": "Recife" }));
    }

    #[test]
    fn unreadable_fields_only_reports_sensitive_markers() {
        let record = Record::try_from(json!({
            "fullName": DECRYPTION_FAILED_MARKER,
            "observation": "fine",
            "note": DECRYPTION_FAILED_MARKER,
        }))
        .unwrap();
        let sensitive = vec!["fullName".to_string(), "observation".to_string()];
        assert_eq!(record.unreadable_fields(&sensitive), vec!["fullName".to_string()]);
    }

    #[test]
    fn content_check() {
        assert!(!has_content(&Value::Null));
        assert!(!has_content(&json!("")));
        assert!(has_content(&json!("a")));
        assert!(has_content(&json!(0)));
    }
}
