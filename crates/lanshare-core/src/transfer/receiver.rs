//! Chunked receiver.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};

use crate::archive::extract_archive;
use crate::error::Result;
use crate::state::{total_chunks, FlushPolicy, ReceivingState, StateStore};
use crate::transfer::unique_path;

/// Receives a fixed-size indexed chunk stream into a sparse temp file,
/// backed by a persisted [`ReceivingState`] so a crash can resume.
pub struct ChunkReceiver {
    store: StateStore,
    state: ReceivingState,
    flush_policy: FlushPolicy,
    file: File,
    is_folder: bool,
    download_dir: PathBuf,
}

impl ChunkReceiver {
    /// Begin (or resume) receiving a file announced via `FileInfo`.
    ///
    /// Creates `receiving/{file_hash}.part` at exactly `file_size` bytes if
    /// it does not already exist, and loads or creates the persisted
    /// [`ReceivingState`].
    ///
    /// # Errors
    ///
    /// Returns an error if the temp file or state record cannot be
    /// created.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        store: StateStore,
        state_root: &Path,
        download_dir: PathBuf,
        file_name: String,
        file_size: u64,
        file_hash: String,
        sender_device_id: String,
        chunk_size: u64,
        is_folder: bool,
    ) -> Result<Self> {
        let receiving_dir = state_root.join("receiving");
        std::fs::create_dir_all(&receiving_dir)?;
        let temp_file = receiving_dir.join(format!("{file_hash}.part"));

        let state = match store.load_receiving(&file_hash)? {
            Some(existing) => existing,
            None => {
                let now = Utc::now();
                let total = total_chunks(file_size, chunk_size);
                let state = ReceivingState {
                    file_name,
                    file_size,
                    file_hash: file_hash.clone(),
                    chunk_size,
                    total_chunks: total,
                    received_chunks: BTreeSet::new(),
                    temp_file: temp_file.clone(),
                    is_folder,
                    sender_device_id,
                    created_at: now,
                    updated_at: now,
                };
                store.save_receiving(&state)?;
                state
            }
        };

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&state.temp_file)?;
        file.set_len(state.file_size)?;

        info!(file_hash = %state.file_hash, file_name = %state.file_name, "started receive");

        let is_folder = state.is_folder;
        Ok(Self {
            store,
            state,
            flush_policy: FlushPolicy::default_policy(),
            file,
            is_folder,
            download_dir,
        })
    }

    /// The file hash identifying this transfer.
    #[must_use]
    pub fn file_hash(&self) -> &str {
        &self.state.file_hash
    }

    /// The chunk indices already received, for building a `FileResume`.
    #[must_use]
    pub fn received_chunks(&self) -> &BTreeSet<u32> {
        &self.state.received_chunks
    }

    /// Returns whether every chunk has been received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// The total number of chunks this transfer is expected to have.
    #[must_use]
    pub fn total_chunks(&self) -> u32 {
        self.state.total_chunks
    }

    /// Write `data` at `index`'s offset. A duplicate index is a no-op that
    /// still reports the current progress.
    ///
    /// Returns `(received_chunks, total_chunks)` after the write, for a
    /// caller to report as progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or a due flush fails.
    pub fn write_chunk(&mut self, index: u32, data: &[u8]) -> Result<(usize, u32)> {
        if self.state.received_chunks.contains(&index) {
            return Ok((self.state.received_chunks.len(), self.state.total_chunks));
        }
        let offset = u64::from(index) * self.state.chunk_size;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;

        self.state.received_chunks.insert(index);
        self.flush_policy.note(1);
        if self.flush_policy.should_flush(false, Instant::now()) {
            self.flush()?;
        }
        Ok((self.state.received_chunks.len(), self.state.total_chunks))
    }

    fn flush(&mut self) -> Result<()> {
        self.state.updated_at = Utc::now();
        self.store.save_receiving(&self.state)?;
        debug!(file_hash = %self.state.file_hash, received = self.state.received_chunks.len(), "flushed receiving state");
        Ok(())
    }

    /// Finish the transfer: close the temp file, move it to a
    /// collision-free path in the download directory, extract it if it was
    /// a folder archive, and delete the persisted receiving state.
    ///
    /// Returns the final path the file (or extracted folder) now lives at.
    ///
    /// # Errors
    ///
    /// Returns an error if the move, extraction, or cleanup fails.
    pub fn complete(self) -> Result<PathBuf> {
        drop(self.file);
        std::fs::create_dir_all(&self.download_dir)?;
        let final_path = unique_path(&self.download_dir, &self.state.file_name);
        std::fs::rename(&self.state.temp_file, &final_path)?;

        let result_path = if self.is_folder {
            let extract_name = final_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.state.file_name.clone());
            let extract_dir = unique_path(&self.download_dir, &extract_name);
            extract_archive(&final_path, &extract_dir)?;
            let _ = std::fs::remove_file(&final_path);
            extract_dir
        } else {
            final_path
        };

        self.store.complete_receiving(&self.state.file_hash)?;
        Ok(result_path)
    }

    /// Cancel the transfer: close the handle, delete the partial file, and
    /// delete the persisted receiving state.
    ///
    /// # Errors
    ///
    /// Returns an error if cleanup fails for a reason other than the file
    /// already being absent.
    pub fn cancel(self) -> Result<()> {
        drop(self.file);
        let _ = std::fs::remove_file(&self.state.temp_file);
        self.store.complete_receiving(&self.state.file_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[allow(clippy::too_many_arguments)]
    fn start(
        root: &Path,
        download_dir: PathBuf,
        name: &str,
        size: u64,
        hash: &str,
        chunk_size: u64,
        is_folder: bool,
    ) -> ChunkReceiver {
        let store = StateStore::open(root.to_path_buf()).unwrap();
        ChunkReceiver::start(
            store,
            root,
            download_dir,
            name.to_string(),
            size,
            hash.to_string(),
            "peer-1".to_string(),
            chunk_size,
            is_folder,
        )
        .unwrap()
    }

    #[test]
    fn write_chunks_then_complete_moves_file() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let mut receiver = start(
            root.path(),
            downloads.path().to_path_buf(),
            "a.txt",
            6,
            "hash1",
            3,
            false,
        );

        receiver.write_chunk(0, b"hel").unwrap();
        receiver.write_chunk(1, b"lo ").unwrap();
        assert!(receiver.is_complete());

        let final_path = receiver.complete().unwrap();
        assert_eq!(final_path, downloads.path().join("a.txt"));
        assert_eq!(std::fs::read(&final_path).unwrap(), b"hello ");
    }

    #[test]
    fn duplicate_chunk_write_is_noop() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let mut receiver = start(
            root.path(),
            downloads.path().to_path_buf(),
            "a.txt",
            3,
            "hash2",
            3,
            false,
        );

        receiver.write_chunk(0, b"abc").unwrap();
        receiver.write_chunk(0, b"abc").unwrap();
        assert_eq!(receiver.received_chunks().len(), 1);
    }

    #[test]
    fn complete_of_existing_name_gets_collision_suffix() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        std::fs::write(downloads.path().join("a.txt"), b"old").unwrap();

        let mut receiver = start(
            root.path(),
            downloads.path().to_path_buf(),
            "a.txt",
            3,
            "hash3",
            3,
            false,
        );
        receiver.write_chunk(0, b"new").unwrap();
        let final_path = receiver.complete().unwrap();

        assert_eq!(final_path, downloads.path().join("a (1).txt"));
        assert_eq!(std::fs::read(&final_path).unwrap(), b"new");
    }

    #[test]
    fn cancel_deletes_partial_and_state() {
        let root = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let receiver = start(
            root.path(),
            downloads.path().to_path_buf(),
            "a.txt",
            3,
            "hash4",
            3,
            false,
        );
        let temp_path = receiver.state.temp_file.clone();
        receiver.cancel().unwrap();

        assert!(!temp_path.exists());
        let store = StateStore::open(root.path().to_path_buf()).unwrap();
        assert!(store.load_receiving("hash4").unwrap().is_none());
    }
}
