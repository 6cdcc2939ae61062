//! Transfer state persistence and flush policy.
//!
//! Every in-flight transfer, sending or receiving, has a JSON record keyed
//! by its file hash under `sending/` or `receiving/` in the app data
//! directory. Progress is merged into memory continuously but only flushed
//! to disk when [`FlushPolicy`] says so, and every flush is a full
//! write-to-tmp-then-rename so a reader never observes a truncated file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::trust::write_json_atomic;

/// Governs when accumulated chunk progress is durably flushed.
///
/// A flush happens when the caller passes `force`, or when at least
/// `chunks_per_sync` chunks have accumulated since the last flush, or when
/// at least `interval` has elapsed since the last flush.
#[derive(Debug)]
pub struct FlushPolicy {
    chunks_per_sync: usize,
    interval: Duration,
    dirty_count: usize,
    last_flush: Instant,
}

impl FlushPolicy {
    /// Build a policy with the given thresholds.
    #[must_use]
    pub fn new(chunks_per_sync: usize, interval: Duration) -> Self {
        Self {
            chunks_per_sync,
            interval,
            dirty_count: 0,
            last_flush: Instant::now(),
        }
    }

    /// The default policy: 50 chunks or 5 seconds, per the transfer state
    /// store's write policy.
    #[must_use]
    pub fn default_policy() -> Self {
        Self::new(
            crate::CHUNKS_PER_SYNC,
            Duration::from_secs(crate::SYNC_INTERVAL_SECS),
        )
    }

    /// Record that `n` more chunks have been merged into memory since the
    /// last flush.
    pub fn note(&mut self, n: usize) {
        self.dirty_count += n;
    }

    /// Returns whether a flush is due, given `force` and the current time.
    /// Resets the internal counters if it returns `true`.
    pub fn should_flush(&mut self, force: bool, now: Instant) -> bool {
        let due = force
            || self.dirty_count >= self.chunks_per_sync
            || now.duration_since(self.last_flush) >= self.interval;
        if due {
            self.dirty_count = 0;
            self.last_flush = now;
        }
        due
    }
}

/// Persisted progress for an in-progress send, keyed by `file_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingState {
    /// Local source path (possibly a temp archive of a directory).
    pub file_path: PathBuf,
    /// Name the peer sees.
    pub file_name: String,
    /// Total size in bytes.
    pub file_size: u64,
    /// MD5 of the bytes, lowercase hex.
    pub file_hash: String,
    /// Chunk size in bytes.
    pub chunk_size: u64,
    /// `ceil(file_size / chunk_size)`.
    pub total_chunks: u32,
    /// Chunk indices already transmitted.
    pub sent_chunks: BTreeSet<u32>,
    /// The peer this transfer is bound for.
    pub receiver_device_id: String,
    /// When this record was first created.
    pub created_at: DateTime<Utc>,
    /// When this record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl SendingState {
    /// Returns whether every chunk has been sent.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.sent_chunks.len() as u32 == self.total_chunks
    }
}

/// Persisted progress for an in-progress receive, keyed by `file_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivingState {
    /// Name the peer sent in `FileInfo`.
    pub file_name: String,
    /// Total size in bytes.
    pub file_size: u64,
    /// MD5 of the bytes, lowercase hex.
    pub file_hash: String,
    /// Chunk size in bytes.
    pub chunk_size: u64,
    /// `ceil(file_size / chunk_size)`.
    pub total_chunks: u32,
    /// Chunk indices already written.
    pub received_chunks: BTreeSet<u32>,
    /// Path to the sparse partial file.
    pub temp_file: PathBuf,
    /// Whether the transfer is a zip archive of a folder, per the
    /// originating `FileInfo`.
    #[serde(default)]
    pub is_folder: bool,
    /// The peer sending this transfer.
    pub sender_device_id: String,
    /// When this record was first created.
    pub created_at: DateTime<Utc>,
    /// When this record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl ReceivingState {
    /// Returns whether every chunk has been received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() as u32 == self.total_chunks
    }
}

/// Compute `ceil(file_size / chunk_size)`, per the transfer state model.
#[must_use]
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u32 {
    if file_size == 0 {
        return 0;
    }
    u32::try_from(file_size.div_ceil(chunk_size)).unwrap_or(u32::MAX)
}

/// Filesystem-backed store for [`SendingState`]/[`ReceivingState`] records.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Open a state store rooted at `root`, creating `sending/` and
    /// `receiving/` if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(root.join("sending"))?;
        std::fs::create_dir_all(root.join("receiving"))?;
        Ok(Self { root })
    }

    fn sending_path(&self, file_hash: &str) -> PathBuf {
        self.root.join("sending").join(format!("{file_hash}.json"))
    }

    fn receiving_path(&self, file_hash: &str) -> PathBuf {
        self.root
            .join("receiving")
            .join(format!("{file_hash}.json"))
    }

    /// Load a pending sending record, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateCorruption`] if the file exists but cannot be
    /// parsed.
    pub fn load_sending(&self, file_hash: &str) -> Result<Option<SendingState>> {
        load_if_exists(&self.sending_path(file_hash))
    }

    /// Persist a sending record atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save_sending(&self, state: &SendingState) -> Result<()> {
        write_json_atomic(&self.sending_path(&state.file_hash), state)
    }

    /// Delete a sending record (called on successful completion).
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails for a reason other than the
    /// file already being absent.
    pub fn complete_sending(&self, file_hash: &str) -> Result<()> {
        remove_if_exists(&self.sending_path(file_hash))
    }

    /// Load a pending receiving record, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateCorruption`] if the file exists but cannot be
    /// parsed.
    pub fn load_receiving(&self, file_hash: &str) -> Result<Option<ReceivingState>> {
        load_if_exists(&self.receiving_path(file_hash))
    }

    /// Persist a receiving record atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save_receiving(&self, state: &ReceivingState) -> Result<()> {
        write_json_atomic(&self.receiving_path(&state.file_hash), state)
    }

    /// Delete a receiving record (called on successful completion).
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails for a reason other than the
    /// file already being absent.
    pub fn complete_receiving(&self, file_hash: &str) -> Result<()> {
        remove_if_exists(&self.receiving_path(file_hash))
    }

    /// Enumerate every pending sending record.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list_pending_sending(&self) -> Result<Vec<SendingState>> {
        list_records(&self.root.join("sending"))
    }

    /// Enumerate every pending receiving record.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn list_pending_receiving(&self) -> Result<Vec<ReceivingState>> {
        list_records(&self.root.join("receiving"))
    }
}

fn load_if_exists<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::StateCorruption(format!("{} is unreadable: {e}", path.display())))?;
    Ok(Some(value))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn list_records<T: for<'de> Deserialize<'de>>(dir: &Path) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().extension().is_some_and(|ext| ext == "json") {
            if let Some(record) = load_if_exists(&entry.path())? {
                out.push(record);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn sample_sending(hash: &str) -> SendingState {
        let now = Utc::now();
        SendingState {
            file_path: PathBuf::from("/tmp/a.txt"),
            file_name: "a.txt".to_string(),
            file_size: 5,
            file_hash: hash.to_string(),
            chunk_size: 65536,
            total_chunks: 1,
            sent_chunks: BTreeSet::new(),
            receiver_device_id: "peer-1".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn total_chunks_matches_ceil_division() {
        assert_eq!(total_chunks(0, 65536), 0);
        assert_eq!(total_chunks(1, 65536), 1);
        assert_eq!(total_chunks(65536, 65536), 1);
        assert_eq!(total_chunks(65537, 65536), 2);
    }

    #[test]
    fn flush_policy_triggers_on_count() {
        let mut policy = FlushPolicy::new(3, Duration::from_secs(3600));
        let now = Instant::now();
        policy.note(2);
        assert!(!policy.should_flush(false, now));
        policy.note(1);
        assert!(policy.should_flush(false, now));
    }

    #[test]
    fn flush_policy_triggers_on_force() {
        let mut policy = FlushPolicy::new(50, Duration::from_secs(3600));
        assert!(policy.should_flush(true, Instant::now()));
    }

    #[test]
    fn flush_policy_triggers_on_elapsed_time() {
        let mut policy = FlushPolicy::new(1000, Duration::from_millis(10));
        thread::sleep(Duration::from_millis(20));
        assert!(policy.should_flush(false, Instant::now()));
    }

    #[test]
    fn save_load_complete_sending_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();
        let state = sample_sending("deadbeef");
        store.save_sending(&state).unwrap();

        let loaded = store.load_sending("deadbeef").unwrap().unwrap();
        assert_eq!(loaded.file_name, "a.txt");

        store.complete_sending("deadbeef").unwrap();
        assert!(store.load_sending("deadbeef").unwrap().is_none());
    }

    #[test]
    fn list_pending_sending_enumerates_all_records() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();
        store.save_sending(&sample_sending("hash-one")).unwrap();
        store.save_sending(&sample_sending("hash-two")).unwrap();

        let pending = store.list_pending_sending().unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn corrupt_record_is_state_corruption() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();
        std::fs::write(dir.path().join("sending/broken.json"), b"not json").unwrap();

        let err = store.load_sending("broken").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StateCorruption);
    }
}
