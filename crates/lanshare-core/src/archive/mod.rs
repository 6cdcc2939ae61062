//! Directory archive helper.
//!
//! Not part of the session-and-transfer engine's own testable surface: a
//! directory transfer treats this as an external collaborator that turns a
//! directory into a single bytestream and back. This module supplies a
//! concrete zip-with-deflate implementation so the crate is runnable
//! end-to-end.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::error::{Error, Result};

/// Archive the directory at `dir` into a zip file under `temp_dir`, named
/// `{dir_name}.zip`, with entries relative to `dir`'s root.
///
/// # Errors
///
/// Returns an error if `dir` cannot be walked or the archive cannot be
/// written.
pub fn archive_dir(dir: &Path, temp_dir: &Path) -> Result<PathBuf> {
    let dir_name = dir
        .file_name()
        .ok_or_else(|| Error::InvalidPath(format!("{} has no file name", dir.display())))?
        .to_string_lossy()
        .into_owned();

    std::fs::create_dir_all(temp_dir)?;
    let zip_path = temp_dir.join(format!("{dir_name}.zip"));
    let zip_file = File::create(&zip_path)?;
    let mut writer = zip::ZipWriter::new(zip_file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::InvalidPath(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Internal(e.to_string()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = relative.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{name}/"), options)?;
        } else {
            writer.start_file(name, options)?;
            let mut file = File::open(entry.path())?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            writer.write_all(&buf)?;
        }
    }

    writer.finish()?;
    Ok(zip_path)
}

/// Extract every entry of the zip file at `zip_path` under `dest_dir`,
/// creating parent directories as needed.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or an entry cannot be
/// written.
pub fn extract_archive(zip_path: &Path, dest_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dest_dir)?;
    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out_file = File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out_file)?;
        }
    }

    Ok(())
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::Internal(format!("zip error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn archive_then_extract_round_trips_contents() {
        let src = TempDir::new().unwrap();
        let temp = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();

        std::fs::write(src.path().join("file1.txt"), b"hello").unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/nested.txt"), b"world").unwrap();

        let zip_path = archive_dir(src.path(), temp.path()).unwrap();
        assert!(zip_path.exists());
        assert_eq!(
            zip_path.file_name().unwrap().to_string_lossy(),
            format!("{}.zip", src.path().file_name().unwrap().to_string_lossy())
        );

        extract_archive(&zip_path, dest.path()).unwrap();
        assert_eq!(
            std::fs::read(dest.path().join("file1.txt")).unwrap(),
            b"hello"
        );
        assert_eq!(
            std::fs::read(dest.path().join("sub/nested.txt")).unwrap(),
            b"world"
        );
    }

    #[test]
    fn archive_dir_rejects_path_without_file_name() {
        let temp = TempDir::new().unwrap();
        assert!(archive_dir(Path::new("/"), temp.path()).is_err());
    }
}
