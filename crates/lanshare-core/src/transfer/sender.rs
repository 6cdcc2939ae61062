//! Chunked sender.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};

use crate::archive::archive_dir;
use crate::error::Result;
use crate::state::{total_chunks, FlushPolicy, SendingState, StateStore};
use crate::transfer::md5_hash_file;

/// Streams a local file (or an archived directory) to a peer as fixed-size
/// chunks, backed by a persisted [`SendingState`] so a crash can resume.
pub struct ChunkSender {
    store: StateStore,
    state: SendingState,
    flush_policy: FlushPolicy,
    file: File,
    cursor: u32,
    temp_archive: Option<PathBuf>,
}

impl ChunkSender {
    /// Prepare to send `path` to `receiver_device_id`. If `path` is a
    /// directory, it is archived first via [`archive_dir`] into `temp_dir`
    /// and the resulting zip is what is actually streamed.
    ///
    /// Returns the sender along with `(file_name, file_size, file_hash,
    /// is_folder)`, ready to be announced via `FileInfo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read, hashed, or archived.
    pub fn prepare(
        store: StateStore,
        path: &Path,
        receiver_device_id: &str,
        chunk_size: u64,
        temp_dir: &Path,
    ) -> Result<(Self, String, u64, String, bool)> {
        let is_folder = path.is_dir();
        let (send_path, display_name, temp_archive) = if is_folder {
            let zip_path = archive_dir(path, temp_dir)?;
            let name = zip_path.file_name().unwrap().to_string_lossy().into_owned();
            (zip_path.clone(), name, Some(zip_path))
        } else {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (path.to_path_buf(), name, None)
        };

        let file_size = std::fs::metadata(&send_path)?.len();
        let file_hash = md5_hash_file(&send_path)?;
        let total = total_chunks(file_size, chunk_size);

        let state = match store.load_sending(&file_hash)? {
            Some(existing) => existing,
            None => {
                let now = Utc::now();
                let state = SendingState {
                    file_path: send_path.clone(),
                    file_name: display_name.clone(),
                    file_size,
                    file_hash: file_hash.clone(),
                    chunk_size,
                    total_chunks: total,
                    sent_chunks: BTreeSet::new(),
                    receiver_device_id: receiver_device_id.to_string(),
                    created_at: now,
                    updated_at: now,
                };
                store.save_sending(&state)?;
                state
            }
        };

        info!(file_hash = %state.file_hash, file_name = %state.file_name, "prepared send");

        let file = File::open(&send_path)?;
        Ok((
            Self {
                store,
                state,
                flush_policy: FlushPolicy::default_policy(),
                file,
                cursor: 0,
                temp_archive,
            },
            display_name,
            file_size,
            file_hash,
            is_folder,
        ))
    }

    /// The file hash identifying this transfer.
    #[must_use]
    pub fn file_hash(&self) -> &str {
        &self.state.file_hash
    }

    /// Scan forward from the cursor for the next chunk not yet marked
    /// sent, read it from disk, and return `(index, bytes)`. Returns
    /// `None` once every chunk has been sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn next_chunk(&mut self) -> Result<Option<(u32, Vec<u8>)>> {
        while self.cursor < self.state.total_chunks {
            let index = self.cursor;
            self.cursor += 1;
            if self.state.sent_chunks.contains(&index) {
                continue;
            }
            let offset = u64::from(index) * self.state.chunk_size;
            let len = self.chunk_len(index);
            self.file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; len as usize];
            self.file.read_exact(&mut buf)?;
            return Ok(Some((index, buf)));
        }
        Ok(None)
    }

    fn chunk_len(&self, index: u32) -> u64 {
        let offset = u64::from(index) * self.state.chunk_size;
        (self.state.file_size - offset).min(self.state.chunk_size)
    }

    /// Mark `index` as sent, flushing to disk per the throttle policy.
    ///
    /// # Errors
    ///
    /// Returns an error if a due flush fails to write.
    pub fn mark_sent(&mut self, index: u32) -> Result<()> {
        let inserted = self.state.sent_chunks.insert(index);
        if inserted {
            self.flush_policy.note(1);
        }
        if self.flush_policy.should_flush(false, Instant::now()) {
            self.flush()?;
        }
        Ok(())
    }

    /// Returns the chunk indices not present in `received_chunks`, i.e.
    /// the set-complement against `[0, total_chunks)`.
    #[must_use]
    pub fn needed_from(&self, received_chunks: &BTreeSet<u32>) -> Vec<u32> {
        (0..self.state.total_chunks)
            .filter(|i| !received_chunks.contains(i))
            .collect()
    }

    /// Replace the sent set with `received_chunks`, force-persist, and
    /// reset the scan cursor to the start.
    ///
    /// # Errors
    ///
    /// Returns an error if the forced flush fails.
    pub fn resume_from(&mut self, received_chunks: BTreeSet<u32>) -> Result<()> {
        self.state.sent_chunks = received_chunks;
        self.cursor = 0;
        self.flush_policy.should_flush(true, Instant::now());
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.state.updated_at = Utc::now();
        self.store.save_sending(&self.state)?;
        debug!(file_hash = %self.state.file_hash, sent = self.state.sent_chunks.len(), "flushed sending state");
        Ok(())
    }

    /// Complete the transfer: delete the temp archive (if one was
    /// created) and the persisted sending state.
    ///
    /// # Errors
    ///
    /// Returns an error if cleanup fails.
    pub fn complete(self) -> Result<()> {
        if let Some(archive) = &self.temp_archive {
            let _ = std::fs::remove_file(archive);
        }
        self.store.complete_sending(&self.state.file_hash)
    }

    /// Cancel the transfer: delete the temp archive (if any) but preserve
    /// the persisted sending state so it can be resumed later.
    pub fn cancel(self) {
        if let Some(archive) = &self.temp_archive {
            let _ = std::fs::remove_file(archive);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &Path) -> StateStore {
        StateStore::open(dir.to_path_buf()).unwrap()
    }

    #[test]
    fn prepare_then_send_all_chunks() {
        let root = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let file_path = src.path().join("a.txt");
        std::fs::write(&file_path, b"hello ").unwrap();

        let (mut sender, name, size, hash, is_folder) = ChunkSender::prepare(
            store(root.path()),
            &file_path,
            "peer-1",
            3,
            root.path(),
        )
        .unwrap();

        assert_eq!(name, "a.txt");
        assert_eq!(size, 6);
        assert_eq!(hash, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert!(!is_folder);

        let mut chunks = Vec::new();
        while let Some((index, bytes)) = sender.next_chunk().unwrap() {
            sender.mark_sent(index).unwrap();
            chunks.push((index, bytes));
        }
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], (0, b"hel".to_vec()));
        assert_eq!(chunks[1], (1, b"lo ".to_vec()));
        assert!(sender.next_chunk().unwrap().is_none());
    }

    #[test]
    fn needed_from_is_set_complement() {
        let root = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let file_path = src.path().join("a.txt");
        std::fs::write(&file_path, vec![0u8; 10]).unwrap();

        let (sender, ..) =
            ChunkSender::prepare(store(root.path()), &file_path, "peer-1", 3, root.path())
                .unwrap();

        let have: BTreeSet<u32> = [0, 2].into_iter().collect();
        assert_eq!(sender.needed_from(&have), vec![1, 3]);
    }

    #[test]
    fn complete_deletes_persisted_state() {
        let root = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let file_path = src.path().join("a.txt");
        std::fs::write(&file_path, b"hi").unwrap();

        let store_handle = store(root.path());
        let (sender, _, _, hash, _) =
            ChunkSender::prepare(store_handle.clone(), &file_path, "peer-1", 65536, root.path())
                .unwrap();
        sender.complete().unwrap();

        assert!(store_handle.load_sending(&hash).unwrap().is_none());
    }

    #[test]
    fn cancel_preserves_persisted_state() {
        let root = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let file_path = src.path().join("a.txt");
        std::fs::write(&file_path, b"hi").unwrap();

        let store_handle = store(root.path());
        let (mut sender, _, _, hash, _) =
            ChunkSender::prepare(store_handle.clone(), &file_path, "peer-1", 65536, root.path())
                .unwrap();
        if let Some((index, _)) = sender.next_chunk().unwrap() {
            sender.mark_sent(index).unwrap();
        }
        sender.cancel();

        assert!(store_handle.load_sending(&hash).unwrap().is_some());
    }
}
