//! Trusted peer store.
//!
//! Once a peer has paired successfully, its identity and last-known address
//! are recorded here so future connections can skip the pair-code exchange
//! and go straight through [`crate::protocol::MessageType::Reconnect`].
//! Trust is local to this device and never synced.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A peer this device has paired with before.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustedPeer {
    /// The peer's stable device identifier.
    pub device_id: String,
    /// The peer's hostname, for display only.
    pub hostname: String,
    /// The last IP address this peer connected from.
    pub last_ip: IpAddr,
    /// When this peer was first trusted.
    pub trusted_at: DateTime<Utc>,
    /// When this peer was last seen.
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrustFile {
    devices: Vec<TrustedPeer>,
}

/// On-disk store of trusted peers, backed by a single JSON file.
#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    devices: Vec<TrustedPeer>,
}

impl TrustStore {
    /// The default trust store location under the platform data directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "lanshare", "LanShare")
            .map(|dirs| dirs.data_dir().join("trusted_devices.json"))
    }

    /// Load the trust store from `path`, treating a missing file as empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateCorruption`] if the file exists but cannot be
    /// parsed.
    pub fn load(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path,
                devices: Vec::new(),
            });
        }
        let bytes = std::fs::read(&path)?;
        let file: TrustFile = serde_json::from_slice(&bytes).map_err(|e| {
            Error::StateCorruption(format!("trust store {} is unreadable: {e}", path.display()))
        })?;
        Ok(Self {
            path,
            devices: file.devices,
        })
    }

    /// Returns `true` if `device_id` has a trust record.
    #[must_use]
    pub fn is_trusted(&self, device_id: &str) -> bool {
        self.devices.iter().any(|d| d.device_id == device_id)
    }

    /// Return the trust record for `device_id`, if any.
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<&TrustedPeer> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    /// Return the last-known address for a trusted peer.
    #[must_use]
    pub fn ip_of(&self, device_id: &str) -> Option<IpAddr> {
        self.get(device_id).map(|d| d.last_ip)
    }

    /// List all trusted peers.
    #[must_use]
    pub fn list(&self) -> &[TrustedPeer] {
        &self.devices
    }

    /// Add a new trust record, or, if `device_id` is already trusted, update
    /// its `last_ip`/`last_seen` in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be flushed to disk.
    pub fn add(&mut self, device_id: &str, hostname: &str, ip: IpAddr) -> Result<()> {
        let now = Utc::now();
        if let Some(existing) = self.devices.iter_mut().find(|d| d.device_id == device_id) {
            existing.last_ip = ip;
            existing.last_seen = now;
        } else {
            self.devices.push(TrustedPeer {
                device_id: device_id.to_string(),
                hostname: hostname.to_string(),
                last_ip: ip,
                trusted_at: now,
                last_seen: now,
            });
        }
        self.flush()
    }

    /// Update `last_seen` (and `last_ip`, if given) for an already-trusted
    /// peer. No-op if the peer is not trusted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be flushed to disk.
    pub fn touch(&mut self, device_id: &str, ip: Option<IpAddr>) -> Result<bool> {
        let Some(existing) = self.devices.iter_mut().find(|d| d.device_id == device_id) else {
            return Ok(false);
        };
        existing.last_seen = Utc::now();
        if let Some(ip) = ip {
            existing.last_ip = ip;
        }
        self.flush()?;
        Ok(true)
    }

    /// Remove a peer's trust record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be flushed to disk.
    pub fn remove(&mut self, device_id: &str) -> Result<bool> {
        let before = self.devices.len();
        self.devices.retain(|d| d.device_id != device_id);
        let removed = self.devices.len() < before;
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    fn flush(&self) -> Result<()> {
        write_json_atomic(&self.path, &TrustFile {
            devices: self.devices.clone(),
        })
    }
}

/// Serialize `value` to JSON and write it to `path` atomically: write to a
/// sibling `.tmp` file first, then rename over the destination.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    tmp_name.push_str(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ip() -> IpAddr {
        "192.168.1.50".parse().unwrap()
    }

    #[test]
    fn add_then_is_trusted() {
        let dir = TempDir::new().unwrap();
        let mut store = TrustStore::load(dir.path().join("trust.json")).unwrap();
        store.add("device-a", "alice-pc", ip()).unwrap();
        assert!(store.is_trusted("device-a"));
        assert!(!store.is_trusted("device-b"));
    }

    #[test]
    fn add_is_idempotent_upsert() {
        let dir = TempDir::new().unwrap();
        let mut store = TrustStore::load(dir.path().join("trust.json")).unwrap();
        store.add("device-a", "alice-pc", ip()).unwrap();
        let first_trusted_at = store.get("device-a").unwrap().trusted_at;

        let new_ip: IpAddr = "192.168.1.99".parse().unwrap();
        store.add("device-a", "alice-pc", new_ip).unwrap();

        assert_eq!(store.devices.len(), 1);
        assert_eq!(store.get("device-a").unwrap().last_ip, new_ip);
        assert_eq!(store.get("device-a").unwrap().trusted_at, first_trusted_at);
    }

    #[test]
    fn persists_across_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trust.json");

        let mut store = TrustStore::load(path.clone()).unwrap();
        store.add("device-a", "alice-pc", ip()).unwrap();
        drop(store);

        let reloaded = TrustStore::load(path).unwrap();
        assert!(reloaded.is_trusted("device-a"));
        assert_eq!(reloaded.list().len(), 1);
    }

    #[test]
    fn remove_deletes_record() {
        let dir = TempDir::new().unwrap();
        let mut store = TrustStore::load(dir.path().join("trust.json")).unwrap();
        store.add("device-a", "alice-pc", ip()).unwrap();
        assert!(store.remove("device-a").unwrap());
        assert!(!store.is_trusted("device-a"));
        assert!(!store.remove("device-a").unwrap());
    }

    #[test]
    fn load_of_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = TrustStore::load(dir.path().join("nonexistent.json")).unwrap();
        assert!(store.list().is_empty());
    }
}
