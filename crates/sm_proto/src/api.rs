//! API request/response types as they appear on the wire.
//!
//! Request payloads are serialised, AEAD-encrypted under the transmission
//! key, and posted as opaque bytes; successful response bodies decrypt to
//! the JSON these DTOs model. Error bodies arrive as plaintext JSON
//! (`ServerErrorBody`).

use serde::{Deserialize, Serialize};

// ── Request payloads ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPayload {
    pub client_version: String,
    pub client_id: String,
    /// Client's public key, sent during binding so the server can pin it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Restrict the response to these record UIDs; `None` fetches all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_records: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub client_version: String,
    pub client_id: String,
    pub record_uid: String,
    /// Base64 AEAD ciphertext of the record data JSON under the record key.
    pub data: String,
    /// Revision the update was computed from; the server rejects stale writes.
    pub revision: i64,
}

// ── Response DTOs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretsResponse {
    /// Application key wrapped under the one-time binding secret.
    /// Present only until the client completes binding.
    #[serde(default)]
    pub encrypted_app_key: Option<String>,
    /// Vault owner's public key, used when posting records back.
    #[serde(default)]
    pub app_owner_public_key: Option<String>,
    #[serde(default)]
    pub records: Vec<RecordDto>,
    #[serde(default)]
    pub folders: Vec<FolderDto>,
    /// Server-supplied warnings surfaced alongside a partial result.
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDto {
    pub record_uid: String,
    /// Base64 AEAD ciphertext of the 32-byte record key.
    pub record_key: Option<String>,
    /// Base64 AEAD ciphertext of the record data JSON.
    pub data: String,
    #[serde(default)]
    pub revision: i64,
    #[serde(default)]
    pub files: Vec<FileDto>,
    #[serde(default)]
    pub inner_folder_uid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderDto {
    pub folder_uid: String,
    /// Base64 wrapped folder key. AEAD for root folders, legacy CBC for
    /// folders with a parent.
    pub folder_key: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Unencrypted display name; takes priority over the data blob.
    #[serde(default)]
    pub name: Option<String>,
    /// Base64 legacy-CBC ciphertext of the folder data JSON.
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub records: Vec<RecordDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDto {
    pub file_uid: String,
    /// Base64 AEAD ciphertext of the 32-byte file key under the record key.
    pub file_key: String,
    /// Base64 AEAD ciphertext of the file metadata JSON.
    #[serde(default)]
    pub data: Option<String>,
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

// ── Error body ───────────────────────────────────────────────────────────────

/// Structured error body. The code arrives under either `result_code`
/// or `error` depending on the endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerErrorBody {
    #[serde(default, alias = "error")]
    pub result_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Replacement public-key id on a `key` rotation signal.
    #[serde(default)]
    pub key_id: Option<String>,
    /// Suggested delay in seconds on a `throttled` signal.
    #[serde(default)]
    pub retry_after: Option<u64>,
}

impl ServerErrorBody {
    pub fn code(&self) -> &str {
        self.result_code.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_accepts_both_code_fields() {
        let a: ServerErrorBody =
            serde_json::from_str(r#"{"result_code":"throttled","retry_after":5}"#).unwrap();
        assert_eq!(a.code(), "throttled");
        assert_eq!(a.retry_after, Some(5));

        let b: ServerErrorBody =
            serde_json::from_str(r#"{"error":"key","key_id":"8","message":"rotate"}"#).unwrap();
        assert_eq!(b.code(), "key");
        assert_eq!(b.key_id.as_deref(), Some("8"));
    }

    #[test]
    fn get_payload_omits_empty_options() {
        let payload = GetPayload {
            client_version: "mr0.1.0".into(),
            client_id: "abc".into(),
            public_key: None,
            requested_records: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"clientVersion": "mr0.1.0", "clientId": "abc"})
        );
    }

    #[test]
    fn response_tolerates_missing_sections() {
        let resp: SecretsResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.records.is_empty());
        assert!(resp.folders.is_empty());
        assert!(resp.encrypted_app_key.is_none());
    }
}
