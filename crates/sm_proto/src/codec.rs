//! Key-hierarchy codec: raw response DTOs → decrypted entity model.
//!
//! Key derivation order: application key → record/folder keys → field and
//! file keys. Record and file keys are always AEAD-wrapped. Folder keys are
//! AEAD-wrapped only at the root; a nested folder's key is legacy-CBC-wrapped
//! under its nearest root ancestor's key, and folder display names use the
//! same legacy mode keyed by the folder's own key.
//!
//! Partial-failure policy: a decode failure for one record or folder is
//! logged and that entity is skipped; the batch still succeeds.

use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;
use tracing::warn;

use sm_crypto::{aead, legacy, CryptoError};

use crate::api::{FileDto, FolderDto, RecordDto, SecretsResponse};
use crate::record::{RecordData, SecretFile, SecretFolder, SecretRecord};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("malformed entity JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad base64 in response field: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("record {0} carries no record key")]
    MissingRecordKey(String),

    #[error("folder {0} has no decodable root ancestor")]
    UnresolvedFolderChain(String),
}

/// Decrypted output of one fetch.
#[derive(Debug, Clone, Default)]
pub struct DecodedSecrets {
    /// All records, including folder-owned ones.
    pub records: Vec<SecretRecord>,
    pub folders: Vec<SecretFolder>,
    pub warnings: Vec<String>,
}

pub(crate) fn b64d(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value.trim_end_matches('='))
}

pub(crate) fn b64e(value: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(value)
}

/// Decrypt one record: AEAD-unwrap its key under `wrapping_key`
/// (application key for top-level records, folder key for folder-owned
/// ones), then AEAD-decrypt the data JSON under the record key.
pub fn decrypt_record(
    dto: &RecordDto,
    wrapping_key: &[u8; 32],
    folder_uid: Option<&str>,
) -> Result<SecretRecord, CodecError> {
    let wrapped = dto
        .record_key
        .as_deref()
        .ok_or_else(|| CodecError::MissingRecordKey(dto.record_uid.clone()))?;
    let record_key = aead::unwrap_key(wrapping_key, &b64d(wrapped)?)?;

    let plaintext = aead::decrypt(&record_key, &b64d(&dto.data)?, b"")?;
    let data: RecordData = serde_json::from_slice(&plaintext)?;

    let mut files = Vec::with_capacity(dto.files.len());
    for file in &dto.files {
        match decrypt_file(file, &record_key) {
            Ok(decoded) => files.push(decoded),
            Err(err) => {
                warn!(record_uid = %dto.record_uid, file_uid = %file.file_uid, %err,
                      "skipping file that failed to decode");
            }
        }
    }

    Ok(SecretRecord {
        uid: dto.record_uid.clone(),
        revision: dto.revision,
        record_key,
        title: data.title,
        record_type: data.record_type,
        notes: data.notes.unwrap_or_default(),
        fields: data.fields,
        custom: data.custom,
        files,
        folder_uid: dto
            .inner_folder_uid
            .clone()
            .or_else(|| folder_uid.map(str::to_string)),
    })
}

/// Decrypt one attached file's key and metadata under the owning record key.
pub fn decrypt_file(dto: &FileDto, record_key: &[u8; 32]) -> Result<SecretFile, CodecError> {
    let file_key = aead::unwrap_key(record_key, &b64d(&dto.file_key)?)?;

    let metadata = match &dto.data {
        Some(data) => {
            let plaintext = aead::decrypt(&file_key, &b64d(data)?, b"")?;
            serde_json::from_slice(&plaintext)?
        }
        None => serde_json::Value::Null,
    };

    let name = metadata
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(&dto.file_uid)
        .to_string();
    let title = metadata
        .get("title")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(SecretFile {
        uid: dto.file_uid.clone(),
        file_key,
        name,
        title,
        url: dto.url.clone(),
        thumbnail_url: dto.thumbnail_url.clone(),
        metadata,
    })
}

/// Walk the raw parent chain to the parent-less ancestor. Returns `None`
/// when the chain leaves the response list or loops.
fn root_ancestor<'a>(
    index: &HashMap<&str, &'a FolderDto>,
    start: &'a FolderDto,
) -> Option<&'a FolderDto> {
    let mut current = start;
    let mut hops = 0usize;
    while let Some(parent_uid) = current.parent.as_deref() {
        current = index.get(parent_uid)?;
        hops += 1;
        if hops > index.len() {
            // cycle in the declared parent chain
            return None;
        }
    }
    Some(current)
}

fn folder_key_for(
    dto: &FolderDto,
    index: &HashMap<&str, &FolderDto>,
    root_keys: &HashMap<String, [u8; 32]>,
) -> Result<[u8; 32], CodecError> {
    match &dto.parent {
        None => root_keys
            .get(&dto.folder_uid)
            .copied()
            .ok_or_else(|| CodecError::UnresolvedFolderChain(dto.folder_uid.clone())),
        Some(_) => {
            let root = root_ancestor(index, dto)
                .ok_or_else(|| CodecError::UnresolvedFolderChain(dto.folder_uid.clone()))?;
            let root_key = root_keys
                .get(&root.folder_uid)
                .ok_or_else(|| CodecError::UnresolvedFolderChain(dto.folder_uid.clone()))?;
            Ok(legacy::unwrap_key_cbc(root_key, &b64d(&dto.folder_key)?)?)
        }
    }
}

fn folder_name(dto: &FolderDto, folder_key: &[u8; 32]) -> String {
    if let Some(name) = &dto.name {
        return name.clone();
    }
    if let Some(data) = &dto.data {
        let decrypted = b64d(data)
            .map_err(CodecError::from)
            .and_then(|ct| Ok(legacy::decrypt_cbc(folder_key, &ct)?));
        match decrypted {
            Ok(plaintext) => {
                if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&plaintext) {
                    if let Some(name) = value.get("name").and_then(|v| v.as_str()) {
                        return name.to_string();
                    }
                }
                return String::from_utf8_lossy(&plaintext).into_owned();
            }
            Err(err) => {
                warn!(folder_uid = %dto.folder_uid, %err, "folder name failed to decode");
            }
        }
    }
    dto.folder_uid.clone()
}

/// Decode the folder list in any order. Two phases over the raw list:
/// first AEAD-unwrap every root (parent-less) key under the application
/// key, then resolve each remaining folder through its full declared
/// parent chain. A folder whose chain cannot reach a decoded root is
/// skipped alone.
pub fn decode_folders(folders: &[FolderDto], app_key: &[u8; 32]) -> Vec<SecretFolder> {
    let index: HashMap<&str, &FolderDto> = folders
        .iter()
        .map(|f| (f.folder_uid.as_str(), f))
        .collect();

    let mut root_keys: HashMap<String, [u8; 32]> = HashMap::new();
    for dto in folders.iter().filter(|f| f.parent.is_none()) {
        let unwrapped = b64d(&dto.folder_key)
            .map_err(CodecError::from)
            .and_then(|wrapped| Ok(aead::unwrap_key(app_key, &wrapped)?));
        match unwrapped {
            Ok(key) => {
                root_keys.insert(dto.folder_uid.clone(), key);
            }
            Err(err) => {
                warn!(folder_uid = %dto.folder_uid, %err, "skipping root folder that failed to decode");
            }
        }
    }

    let mut decoded = Vec::with_capacity(folders.len());
    for dto in folders {
        let folder_key = match folder_key_for(dto, &index, &root_keys) {
            Ok(key) => key,
            Err(err) => {
                warn!(folder_uid = %dto.folder_uid, %err, "skipping folder that failed to decode");
                continue;
            }
        };

        let mut records = Vec::with_capacity(dto.records.len());
        for record in &dto.records {
            match decrypt_record(record, &folder_key, Some(&dto.folder_uid)) {
                Ok(decoded) => records.push(decoded),
                Err(err) => {
                    warn!(record_uid = %record.record_uid, folder_uid = %dto.folder_uid, %err,
                          "skipping record that failed to decode");
                }
            }
        }

        decoded.push(SecretFolder {
            uid: dto.folder_uid.clone(),
            parent_uid: dto.parent.clone(),
            name: folder_name(dto, &folder_key),
            folder_key,
            records,
        });
    }
    decoded
}

/// Decode a full response: top-level records under the application key,
/// folders via `decode_folders`, with folder-owned records both nested
/// under their folder and flattened into the overall record list.
pub fn decode_response(app_key: &[u8; 32], response: &SecretsResponse) -> DecodedSecrets {
    let mut records = Vec::new();
    for dto in &response.records {
        match decrypt_record(dto, app_key, None) {
            Ok(decoded) => records.push(decoded),
            Err(err) => {
                warn!(record_uid = %dto.record_uid, %err, "skipping record that failed to decode");
            }
        }
    }

    let folders = decode_folders(&response.folders, app_key);
    for folder in &folders {
        records.extend(folder.records.iter().cloned());
    }

    DecodedSecrets {
        records,
        folders,
        warnings: response.warnings.clone(),
    }
}
