//! OS-backed filesystem implementation.

use crate::error::{StorageError, StorageResult};
use crate::fs::FileSystem;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Filesystem implementation backed by the operating system.
///
/// Data survives process restarts. Writes are flushed and fsynced before
/// returning so a completed write is durable, not merely buffered.
///
/// # Example
///
/// ```no_run
/// use foliodb_storage::{FileSystem, OsFileSystem};
/// use std::path::Path;
///
/// let fs = OsFileSystem::new();
/// fs.write(Path::new("doc.json"), b"{}").unwrap();
/// let data = fs.read(Path::new("doc.json")).unwrap();
/// assert_eq!(&data, b"{}");
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl OsFileSystem {
    /// Creates a new OS-backed filesystem handle.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Maps a not-found I/O error to the distinguishable variant.
fn map_io(err: io::Error, path: &Path) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::not_found(path)
    } else {
        StorageError::Io(err)
    }
}

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
        fs::read(path).map_err(|e| map_io(e, path))
    }

    fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let mut file = File::create(path).map_err(|e| map_io(e, path))?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        fs::rename(from, to).map_err(|e| map_io(e, from))
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        fs::remove_file(path).map_err(|e| map_io(e, path))
    }

    fn list(&self, dir: &Path) -> StorageResult<Vec<String>> {
        let entries = fs::read_dir(dir).map_err(|e| map_io(e, dir))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
        fs::remove_dir_all(path).map_err(|e| map_io(e, path))
    }

    fn copy_dir(&self, from: &Path, to: &Path) -> StorageResult<()> {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(from).map_err(|e| map_io(e, from))? {
            let entry = entry?;
            let target = to.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                self.copy_dir(&entry.path(), &target)?;
            } else {
                fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }

    /// On Unix, fsync on a directory handle syncs its entries. Windows
    /// NTFS journals metadata updates, so the explicit sync is skipped.
    #[cfg(unix)]
    fn sync_dir(&self, path: &Path) -> StorageResult<()> {
        let dir = File::open(path).map_err(|e| map_io(e, path))?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _path: &Path) -> StorageResult<()> {
        Ok(())
    }
}
