//! Disaster-recovery cache.
//!
//! After every successful fetch the client may persist the transmission key
//! together with the still-encrypted response body, as `key(32) || ciphertext`
//! in a single file. If a later fetch fails at the network layer, the cached
//! pair is replayed: the stored key decrypts the stored ciphertext exactly as
//! a live response would. All writes are best-effort; a cache that cannot be
//! written must never fail the fetch that produced it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sm_crypto::aead::KEY_LEN;

const CACHE_FILE_NAME: &str = "ksm_cache.bin";

/// Replay file for the last successful secrets response.
#[derive(Debug, Clone)]
pub struct DisasterRecoveryCache {
    path: PathBuf,
}

impl DisasterRecoveryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Platform cache directory, falling back to the temp dir when no home
    /// directory can be resolved.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "secrets-manager")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(std::env::temp_dir)
            .join(CACHE_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `key || ciphertext`, atomically and owner-only. Failures are
    /// logged and swallowed.
    pub fn save(&self, key: &[u8; KEY_LEN], ciphertext: &[u8]) {
        if let Err(e) = self.try_save(key, ciphertext) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write recovery cache");
        }
    }

    fn try_save(&self, key: &[u8; KEY_LEN], ciphertext: &[u8]) -> std::io::Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(key)?;
        tmp.write_all(ciphertext)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file().set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Read back the `(key, ciphertext)` pair, if a usable cache exists.
    pub fn load(&self) -> Option<([u8; KEY_LEN], Vec<u8>)> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read recovery cache");
                return None;
            }
        };
        if raw.len() <= KEY_LEN {
            tracing::warn!(path = %self.path.display(), "recovery cache is truncated, ignoring");
            return None;
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&raw[..KEY_LEN]);
        Some((key, raw[KEY_LEN..].to_vec()))
    }

    /// Remove the cache file if present.
    pub fn clear(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to clear recovery cache");
            }
        }
    }
}
