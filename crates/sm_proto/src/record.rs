//! Decrypted entity model.
//!
//! Produced by `codec` from a raw response; immutable after decode in the
//! sense that a refetch builds a fresh graph rather than mutating this one.
//! Updates are expressed by re-encrypting `SecretRecord::data_json` and
//! posting, never by editing a decoded graph in place.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tagged field of a record. Standard fields are addressed by `type`,
/// custom fields by `label` (falling back to `type`). This is the explicit
/// field collection — there is no by-name accessor synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordField {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// The record data JSON as it exists inside the AEAD ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct RecordData {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub record_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub fields: Vec<RecordField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom: Vec<RecordField>,
}

#[derive(Debug, Clone)]
pub struct SecretRecord {
    pub uid: String,
    pub revision: i64,
    /// Decrypted 32-byte record key; wraps field/file material.
    pub record_key: [u8; 32],
    pub title: String,
    pub record_type: String,
    pub notes: String,
    pub fields: Vec<RecordField>,
    pub custom: Vec<RecordField>,
    pub files: Vec<SecretFile>,
    /// Owning folder, when the record arrived nested under one.
    pub folder_uid: Option<String>,
}

impl SecretRecord {
    /// Standard field lookup by type (`login`, `password`, `url`, ...).
    pub fn field(&self, field_type: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.field_type == field_type)
    }

    /// Custom field lookup: label first, then type.
    pub fn custom_field(&self, label: &str) -> Option<&RecordField> {
        self.custom
            .iter()
            .find(|f| f.label.as_deref() == Some(label))
            .or_else(|| self.custom.iter().find(|f| f.field_type == label))
    }

    /// First value of a standard field, if any.
    pub fn field_value(&self, field_type: &str) -> Option<&Value> {
        self.field(field_type).and_then(|f| f.value.first())
    }

    /// Attached file lookup by name or title.
    pub fn file(&self, name: &str) -> Option<&SecretFile> {
        self.files
            .iter()
            .find(|f| f.name == name || f.title.as_deref() == Some(name))
    }

    /// Serialise the record data back to the JSON the server stores.
    /// Used by update operations before re-encrypting under the record key.
    pub fn data_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let data = RecordData {
            title: self.title.clone(),
            record_type: self.record_type.clone(),
            notes: if self.notes.is_empty() { None } else { Some(self.notes.clone()) },
            fields: self.fields.clone(),
            custom: self.custom.clone(),
        };
        serde_json::to_vec(&data)
    }
}

#[derive(Debug, Clone)]
pub struct SecretFolder {
    pub uid: String,
    pub parent_uid: Option<String>,
    pub name: String,
    /// Decrypted 32-byte folder key.
    pub folder_key: [u8; 32],
    /// Records owned by this folder; also flattened into the overall list.
    pub records: Vec<SecretRecord>,
}

#[derive(Debug, Clone)]
pub struct SecretFile {
    pub uid: String,
    /// Decrypted 32-byte file key; the download ciphertext decrypts under it.
    pub file_key: [u8; 32],
    pub name: String,
    pub title: Option<String>,
    pub url: String,
    pub thumbnail_url: Option<String>,
    /// Full decrypted metadata JSON (size, mime type, ...).
    pub metadata: Value,
}

impl SecretFile {
    /// Metadata object handed out by the notation `file` selector —
    /// a reference for a later download, never the file bytes.
    pub fn reference(&self) -> Value {
        serde_json::json!({
            "fileUid": self.uid,
            "name": self.name,
            "title": self.title,
            "url": self.url,
            "thumbnailUrl": self.thumbnail_url,
            "metadata": self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> SecretRecord {
        SecretRecord {
            uid: "uid1".into(),
            revision: 3,
            record_key: [7u8; 32],
            title: "Prod DB".into(),
            record_type: "databaseCredentials".into(),
            notes: "primary".into(),
            fields: vec![
                RecordField {
                    field_type: "login".into(),
                    label: None,
                    value: vec![Value::String("admin".into())],
                    required: None,
                },
                RecordField {
                    field_type: "url".into(),
                    label: None,
                    value: vec![
                        Value::String("https://a.example".into()),
                        Value::String("https://b.example".into()),
                    ],
                    required: None,
                },
            ],
            custom: vec![RecordField {
                field_type: "text".into(),
                label: Some("region".into()),
                value: vec![Value::String("us-east-1".into())],
                required: None,
            }],
            files: vec![],
            folder_uid: None,
        }
    }

    #[test]
    fn field_accessors() {
        let record = sample_record();
        assert_eq!(
            record.field_value("login"),
            Some(&Value::String("admin".into()))
        );
        assert_eq!(record.field("url").unwrap().value.len(), 2);
        assert!(record.field("password").is_none());
        assert_eq!(
            record.custom_field("region").unwrap().value[0],
            Value::String("us-east-1".into())
        );
        // Label miss falls back to type
        assert!(record.custom_field("text").is_some());
    }

    #[test]
    fn data_json_roundtrip() {
        let record = sample_record();
        let bytes = record.data_json().unwrap();
        let parsed: RecordData = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.title, "Prod DB");
        assert_eq!(parsed.record_type, "databaseCredentials");
        assert_eq!(parsed.fields.len(), 2);
        assert_eq!(parsed.custom.len(), 1);
    }
}
