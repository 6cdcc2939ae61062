//! Per-install device identity.
//!
//! A [`DeviceIdentity`] is generated once per installation and then kept
//! forever: it is the value peers record in their trust store, so it must
//! never change under a device once another device has trusted it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The identity this install presents to peers during pairing and reconnect.
///
/// Only `device_id` and `created_at` are persisted to `device_id.json`;
/// `hostname` is read live from the OS on every load, since it can change
/// between runs and plays no part in trust decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Stable identifier, of the form `{hostname}-{username}-{uuid4}`.
    pub device_id: String,
    /// When this identity was first generated.
    pub created_at: DateTime<Utc>,
    /// Current hostname, sent alongside `device_id` so peers can display a
    /// friendly name. Never persisted; read fresh from the OS each load.
    #[serde(skip, default = "live_hostname")]
    pub hostname: String,
}

impl DeviceIdentity {
    /// Build a fresh identity from the local hostname and username.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityUnavailable`] if the hostname cannot be
    /// determined.
    pub fn generate() -> Result<Self> {
        let hostname = hostname::get()
            .map_err(|e| Error::IdentityUnavailable(format!("cannot read hostname: {e}")))?
            .to_string_lossy()
            .into_owned();
        let username = whoami_username();
        let device_id = format!("{hostname}-{username}-{}", Uuid::new_v4());
        Ok(Self {
            device_id,
            created_at: Utc::now(),
            hostname,
        })
    }

    /// Load the identity from `path`, creating and persisting a new one if
    /// the file does not yet exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityUnavailable`] if an existing file cannot be
    /// read or parsed, or if a newly generated identity cannot be persisted.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let identity = Self::generate()?;
        identity.save(path)?;
        Ok(identity)
    }

    /// Load an identity from an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityUnavailable`] if the file cannot be read or
    /// does not contain a valid identity.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::IdentityUnavailable(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::IdentityUnavailable(format!("cannot parse {}: {e}", path.display())))
    }

    /// Persist the identity atomically: write to a sibling `.tmp` file, then
    /// rename over the destination so a crash mid-write never leaves a
    /// partial `device_id.json` behind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityUnavailable`] if the write or rename fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::IdentityUnavailable(format!("cannot create {}: {e}", parent.display())))?;
        }
        let tmp_path = tmp_sibling(path);
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::IdentityUnavailable(format!("cannot encode identity: {e}")))?;
        std::fs::write(&tmp_path, bytes)
            .map_err(|e| Error::IdentityUnavailable(format!("cannot write {}: {e}", tmp_path.display())))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| Error::IdentityUnavailable(format!("cannot rename into {}: {e}", path.display())))?;
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    path.with_file_name(name)
}

fn live_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string())
}

fn whoami_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generate_produces_well_formed_id() {
        let identity = DeviceIdentity::generate().unwrap();
        assert!(identity.device_id.contains(&identity.hostname));
        assert_eq!(identity.device_id.matches('-').count() >= 6, true);
    }

    #[test]
    fn load_or_create_persists_and_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("device_id.json");

        let first = DeviceIdentity::load_or_create(&path).unwrap();
        assert!(path.exists());

        let second = DeviceIdentity::load_or_create(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn save_is_atomic_and_leaves_no_tmp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("device_id.json");
        let identity = DeviceIdentity::generate().unwrap();
        identity.save(&path).unwrap();

        assert!(path.exists());
        assert!(!tmp_sibling(&path).exists());
    }

    #[test]
    fn load_of_corrupt_file_is_identity_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("device_id.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = DeviceIdentity::load(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IdentityUnavailable);
    }
}
