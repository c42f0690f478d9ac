//! Filesystem contract consumed by the database core.
//!
//! Implementations are **whole-file stores**: every operation works on a
//! complete file or directory, and every fallible operation reports a
//! distinguishable not-found reason so read paths can translate a miss
//! to "absent" instead of an error.

use crate::error::StorageResult;
use std::path::Path;

/// Filesystem operations used by the database core.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the core shares one filesystem
/// handle across the storage managers, metadata stores, and the
/// transaction manager.
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    /// Reads the entire contents of a file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`](crate::StorageError::NotFound)
    /// if the file does not exist.
    fn read(&self, path: &Path) -> StorageResult<Vec<u8>>;

    /// Writes the entire contents of a file, creating or truncating it.
    fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()>;

    /// Renames a file or directory.
    ///
    /// Rename within one volume is atomic: observers see either the old
    /// or the new name, never a partial state.
    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()>;

    /// Removes a file.
    fn remove_file(&self, path: &Path) -> StorageResult<()>;

    /// Lists the names of the immediate entries of a directory.
    fn list(&self, dir: &Path) -> StorageResult<Vec<String>>;

    /// Returns whether a file or directory exists.
    fn exists(&self, path: &Path) -> bool;

    /// Creates a directory and all missing parents.
    fn create_dir_all(&self, path: &Path) -> StorageResult<()>;

    /// Removes a directory and everything under it.
    fn remove_dir_all(&self, path: &Path) -> StorageResult<()>;

    /// Recursively copies a directory tree.
    fn copy_dir(&self, from: &Path, to: &Path) -> StorageResult<()>;

    /// Syncs a directory's entries to durable storage.
    ///
    /// Called after renames and deletions whose durability matters.
    /// Backends without a directory-sync concept treat this as a no-op.
    fn sync_dir(&self, path: &Path) -> StorageResult<()>;
}
