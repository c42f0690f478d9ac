//! Database directory management.
//!
//! This module handles the file system layout for FolioDB:
//!
//! ```text
//! <root>/
//! ├─ LOCK                      # Advisory lock for single-writer
//! ├─ _wal/segment-<n>          # Write-ahead log segments
//! ├─ _staging/<tx-id>/         # Transient transaction workspaces
//! └─ data/<collection>/        # Live collection trees
//!       ├─ <id>.json           # One file per document
//!       └─ _metadata.json      # Collection metadata
//! ```
//!
//! The live tree sits under `data/` so the transaction swap can rename
//! it against its `_old`/`_new` siblings. Names starting with the
//! reserved `_` marker are internal and skipped by directory scans.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// File and directory names within the database root.
const LOCK_FILE: &str = "LOCK";
const WAL_DIR: &str = "_wal";
const STAGING_DIR: &str = "_staging";
const DATA_DIR: &str = "data";

/// Reserved marker prefix for internal files and directories.
pub const RESERVED_PREFIX: char = '_';

/// Name of the per-collection metadata file.
pub const METADATA_FILE: &str = "_metadata.json";

/// Extension for document files.
pub const DOCUMENT_EXTENSION: &str = "json";

/// Manages the database directory structure and file locking.
///
/// # Thread Safety
///
/// `DatabaseDir` holds an exclusive advisory lock on the database
/// directory; only one instance can exist per directory at a time.
#[derive(Debug)]
pub struct DatabaseDir {
    /// Root directory path.
    root: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_operation(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        // Acquire the exclusive lock before touching the layout.
        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        let dir = Self {
            root: path.to_path_buf(),
            _lock_file: lock_file,
        };

        fs::create_dir_all(dir.wal_dir())?;
        fs::create_dir_all(dir.staging_dir())?;
        fs::create_dir_all(dir.data_dir())?;

        Ok(dir)
    }

    /// Returns the database root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the WAL directory path.
    #[must_use]
    pub fn wal_dir(&self) -> PathBuf {
        self.root.join(WAL_DIR)
    }

    /// Returns the staging root for transactions.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Returns the live data directory holding the collection trees.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    /// Returns the directory of one collection.
    #[must_use]
    pub fn collection_dir(&self, name: &str) -> PathBuf {
        self.data_dir().join(name)
    }
}

/// Returns whether a directory entry name is internal (reserved).
#[must_use]
pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Validates a collection name or document id used as a path component.
///
/// # Errors
///
/// Rejects empty names, reserved-prefix names, and anything that could
/// escape the collection directory.
pub fn validate_name(kind: &str, name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_operation(format!("{kind} is empty")));
    }
    if is_reserved_name(name) {
        return Err(CoreError::invalid_operation(format!(
            "{kind} '{name}' uses the reserved '{RESERVED_PREFIX}' prefix"
        )));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(CoreError::invalid_operation(format!(
            "{kind} '{name}' is not a valid path component"
        )));
    }
    Ok(())
}
