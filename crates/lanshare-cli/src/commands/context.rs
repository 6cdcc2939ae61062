//! Shared engine setup: device identity, trust store, configuration, and
//! transfer state, all rooted under the platform data directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use lanshare_core::config::Config;
use lanshare_core::identity::DeviceIdentity;
use lanshare_core::state::StateStore;
use lanshare_core::trust::TrustStore;

/// Everything a command needs to talk to the engine.
pub struct Engine {
    pub identity: DeviceIdentity,
    pub config: Config,
    pub trust: Arc<Mutex<TrustStore>>,
    pub state: StateStore,
    data_dir: PathBuf,
}

impl Engine {
    /// Load (or initialize on first run) every piece of local state a
    /// session needs.
    pub fn load() -> Result<Self> {
        let config = Config::load_or_default();
        let data_dir = match config.general.data_dir.clone() {
            Some(dir) => dir,
            None => directories::ProjectDirs::from("com", "lanshare", "LanShare")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .context("could not determine a platform data directory")?,
        };

        let identity = DeviceIdentity::load_or_create(&data_dir.join("device_id.json"))
            .context("failed to load device identity")?;
        let trust = TrustStore::load(data_dir.join("trusted_devices.json"))
            .context("failed to load trust store")?;
        let state = StateStore::open(data_dir.join("state"))
            .context("failed to open transfer state store")?;

        Ok(Self {
            identity,
            config,
            trust: Arc::new(Mutex::new(trust)),
            state,
            data_dir,
        })
    }

    /// The directory received files land in, absent an explicit
    /// `--download-dir` override.
    pub fn default_download_dir(&self) -> PathBuf {
        self.config
            .general
            .download_dir
            .clone()
            .or_else(|| {
                directories::UserDirs::new().and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
            })
            .unwrap_or_else(|| self.data_dir.join("downloads"))
    }

    /// Scratch directory for archiving directories before a send.
    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }

    /// Root directory the transfer state store persists sending/receiving
    /// records under (the same root `self.state` was opened against).
    pub fn state_root(&self) -> PathBuf {
        self.data_dir.join("state")
    }
}
