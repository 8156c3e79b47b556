//! Storage contract and reference backends.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{Map, Value};

use crate::{error::StoreError, keys::ConfigKey};

/// Opaque key/value persistence of configuration items. String values are
/// stored as-is; byte values are wrapped in standard base64.
pub trait KeyValueStorage: Send {
    fn get(&self, key: ConfigKey) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: ConfigKey, value: String) -> Result<(), StoreError>;
    fn delete(&mut self, key: ConfigKey) -> Result<(), StoreError>;

    fn get_bytes(&self, key: ConfigKey) -> Result<Option<Vec<u8>>, StoreError> {
        match self.get(key)? {
            Some(value) => Ok(Some(STANDARD.decode(value.trim())?)),
            None => Ok(None),
        }
    }

    fn set_bytes(&mut self, key: ConfigKey, value: &[u8]) -> Result<(), StoreError> {
        self.set(key, STANDARD.encode(value))
    }
}

// ── In-memory backend ────────────────────────────────────────────────────────

/// Ephemeral storage; nothing survives the process.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    values: HashMap<&'static str, String>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for InMemoryStorage {
    fn get(&self, key: ConfigKey) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key.as_str()).cloned())
    }

    fn set(&mut self, key: ConfigKey, value: String) -> Result<(), StoreError> {
        self.values.insert(key.as_str(), value);
        Ok(())
    }

    fn delete(&mut self, key: ConfigKey) -> Result<(), StoreError> {
        self.values.remove(key.as_str());
        Ok(())
    }
}

// ── File backend ─────────────────────────────────────────────────────────────

/// A flat JSON object on disk. Written atomically (temp file + rename)
/// with owner-only permissions, since it holds key material.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>, StoreError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<(), StoreError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        serde_json::to_writer_pretty(&mut tmp, &Value::Object(map.clone()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file().set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: ConfigKey) -> Result<Option<String>, StoreError> {
        let map = self.read_map()?;
        Ok(map
            .get(key.as_str())
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    fn set(&mut self, key: ConfigKey, value: String) -> Result<(), StoreError> {
        let mut map = self.read_map()?;
        map.insert(key.as_str().to_string(), Value::String(value));
        self.write_map(&map)
    }

    fn delete(&mut self, key: ConfigKey) -> Result<(), StoreError> {
        let mut map = self.read_map()?;
        if map.remove(key.as_str()).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_roundtrip() {
        let mut storage = InMemoryStorage::new();
        storage.set(ConfigKey::Hostname, "keepersecurity.com".into()).unwrap();
        assert_eq!(
            storage.get(ConfigKey::Hostname).unwrap().as_deref(),
            Some("keepersecurity.com")
        );
        storage.delete(ConfigKey::Hostname).unwrap();
        assert_eq!(storage.get(ConfigKey::Hostname).unwrap(), None);
    }

    #[test]
    fn byte_values_are_base64_wrapped() {
        let mut storage = InMemoryStorage::new();
        storage.set_bytes(ConfigKey::AppKey, &[1, 2, 3, 255]).unwrap();
        assert_eq!(storage.get(ConfigKey::AppKey).unwrap().as_deref(), Some("AQID/w=="));
        assert_eq!(
            storage.get_bytes(ConfigKey::AppKey).unwrap().as_deref(),
            Some([1u8, 2, 3, 255].as_slice())
        );
    }

    #[test]
    fn file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client-config.json");
        let mut storage = FileStorage::new(&path);

        storage.set(ConfigKey::ClientId, "cid".into()).unwrap();
        storage.set_bytes(ConfigKey::AppKey, &[9u8; 32]).unwrap();
        storage.delete(ConfigKey::ClientKey).unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get(ConfigKey::ClientId).unwrap().as_deref(), Some("cid"));
        assert_eq!(reopened.get_bytes(ConfigKey::AppKey).unwrap().unwrap(), vec![9u8; 32]);
    }

    #[cfg(unix)]
    #[test]
    fn file_storage_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client-config.json");
        let mut storage = FileStorage::new(&path);
        storage.set(ConfigKey::ClientId, "cid".into()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
