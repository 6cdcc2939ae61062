//! Layered configuration for LanShare.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/lanshare/config.toml` |
//! | macOS | `~/Library/Application Support/LanShare/config.toml` |
//! | Windows | `%APPDATA%\LanShare\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use lanshare_core::config::Config;
//!
//! let config = Config::load_or_default();
//! println!("Device name: {}", config.general.device_name);
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration for a LanShare install.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General, device-identifying settings.
    pub general: GeneralConfig,
    /// Listening ports and discovery behavior.
    pub network: NetworkConfig,
    /// Chunking and archive behavior.
    pub transfer: TransferConfig,
    /// Heartbeat, reconnect, and handshake deadlines.
    pub timeouts: TimeoutsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            network: NetworkConfig::default(),
            transfer: TransferConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

/// General, device-identifying settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Display name advertised to peers.
    pub device_name: String,
    /// Root directory persisted state (identity, trust, transfer state) is
    /// kept under, overriding the platform data directory.
    pub data_dir: Option<PathBuf>,
    /// Default directory received files are written into.
    pub download_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: hostname::get().map_or_else(
                |_| "LanShare Device".to_string(),
                |h| h.to_string_lossy().to_string(),
            ),
            data_dir: None,
            download_dir: None,
        }
    }
}

/// Listening ports and discovery behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port the session endpoint listens on.
    pub tcp_port: u16,
    /// UDP port the discovery helper listens on.
    pub discovery_port: u16,
    /// Maximum accepted JSON frame payload size, in bytes.
    pub max_payload_bytes: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_port: crate::DEFAULT_TCP_PORT,
            discovery_port: crate::DEFAULT_DISCOVERY_PORT,
            max_payload_bytes: crate::DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Chunking and archive behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size used when sending, in bytes.
    pub chunk_size: u64,
    /// Number of chunks accumulated before a throttled state flush.
    pub chunks_per_sync: usize,
    /// Seconds elapsed before a throttled state flush, regardless of chunk count.
    pub sync_interval_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            chunks_per_sync: crate::CHUNKS_PER_SYNC,
            sync_interval_secs: crate::SYNC_INTERVAL_SECS,
        }
    }
}

/// Heartbeat, reconnect, and handshake deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Seconds to wait for the initial TCP dial to succeed.
    pub connect_secs: u64,
    /// Seconds between heartbeats.
    pub heartbeat_interval_secs: u64,
    /// Seconds of silence before a connection is considered dead.
    pub heartbeat_timeout_secs: u64,
    /// Seconds between reconnect attempts.
    pub reconnect_interval_secs: u64,
    /// Maximum reconnect attempts before giving up.
    pub reconnect_max_attempts: u32,
    /// Seconds to wait for a pairing or reconnect handshake to complete.
    pub handshake_timeout_secs: u64,
    /// Seconds to wait for a discovery response.
    pub discovery_timeout_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_secs: crate::CONNECT_TIMEOUT_SECS,
            heartbeat_interval_secs: crate::HEARTBEAT_INTERVAL_SECS,
            heartbeat_timeout_secs: crate::HEARTBEAT_TIMEOUT_SECS,
            reconnect_interval_secs: crate::RECONNECT_INTERVAL_SECS,
            reconnect_max_attempts: crate::RECONNECT_MAX_ATTEMPTS,
            handshake_timeout_secs: crate::HANDSHAKE_TIMEOUT_SECS,
            discovery_timeout_secs: crate::DISCOVERY_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// The default config file location under the platform config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "lanshare", "LanShare")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, falling back to [`Config::default`]
    /// if no config file exists yet.
    #[must_use]
    pub fn load_or_default() -> Self {
        Self::default_path()
            .filter(|p| p.exists())
            .and_then(|p| Self::load(&p).ok())
            .unwrap_or_default()
    }

    /// Load a config from a specific path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the file cannot be read, and
    /// propagates [`Error::ConfigParse`] if it cannot be parsed as TOML.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&text)?;
        Ok(config)
    }

    /// Save this config to `path`, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the config cannot be serialized to
    /// TOML or the file cannot be written.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::ConfigError(format!("cannot create {}: {e}", parent.display())))?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("cannot encode config: {e}")))?;
        let mut tmp_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tmp_name.push_str(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, text)
            .map_err(|e| Error::ConfigError(format!("cannot write {}: {e}", tmp_path.display())))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| Error::ConfigError(format!("cannot rename into {}: {e}", path.display())))?;
        Ok(())
    }
}
