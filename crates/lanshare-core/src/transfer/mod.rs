//! Chunked sender and receiver.
//!
//! Both sides stream a file as fixed-size indexed chunks, backed by the
//! persisted progress in [`crate::state`]. The sender reads by seeking to
//! `index * chunk_size`; the receiver writes to the same offset in a
//! sparse temp file, so neither side needs sequential delivery.

pub mod receiver;
pub mod sender;

pub use receiver::ChunkReceiver;
pub use sender::ChunkSender;

use std::path::{Path, PathBuf};

/// Compute MD5 of the file at `path`, returned as lowercase hex.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn md5_hash_file(path: &Path) -> crate::error::Result<String> {
    use md5::{Digest, Md5};
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Append a numeric collision suffix (`" (1)"`, `" (2)"`, …) before the
/// extension of `name` until the resulting path inside `dir` does not
/// exist, returning the first free path. If `name` itself is free inside
/// `dir`, it is returned unchanged.
#[must_use]
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut n = 1u32;
    loop {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unique_path_returns_name_unchanged_if_free() {
        let dir = TempDir::new().unwrap();
        let path = unique_path(dir.path(), "a.txt");
        assert_eq!(path, dir.path().join("a.txt"));
    }

    #[test]
    fn unique_path_appends_suffix_on_collision() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let path = unique_path(dir.path(), "a.txt");
        assert_eq!(path, dir.path().join("a (1).txt"));
    }

    #[test]
    fn unique_path_increments_past_multiple_collisions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("a (1).txt"), b"x").unwrap();
        let path = unique_path(dir.path(), "a.txt");
        assert_eq!(path, dir.path().join("a (2).txt"));
    }

    #[test]
    fn unique_path_handles_extensionless_names() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README"), b"x").unwrap();
        let path = unique_path(dir.path(), "README");
        assert_eq!(path, dir.path().join("README (1)"));
    }

    #[test]
    fn md5_hash_file_matches_known_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello ").unwrap();
        assert_eq!(
            md5_hash_file(&path).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }
}
