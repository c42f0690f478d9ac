//! In-memory filesystem for testing and ephemeral storage.

use crate::error::{StorageError, StorageResult};
use crate::fs::FileSystem;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// An in-memory filesystem.
///
/// Paths behave like Unix paths; rename of a directory moves every entry
/// under it, matching the atomic-rename semantics the core relies on.
/// Useful for tests that should not touch the real filesystem.
///
/// # Example
///
/// ```
/// use foliodb_storage::{FileSystem, MemoryFileSystem};
/// use std::path::Path;
///
/// let fs = MemoryFileSystem::new();
/// fs.write(Path::new("/db/doc.json"), b"{}").unwrap();
/// assert!(fs.exists(Path::new("/db/doc.json")));
/// ```
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    inner: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl State {
    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    fn add_parents(&mut self, path: &Path) {
        let mut current = path.parent();
        while let Some(p) = current {
            if p.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(p.to_path_buf());
            current = p.parent();
        }
    }
}

impl MemoryFileSystem {
    /// Creates a new empty in-memory filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of files currently stored.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.inner.read().files.len()
    }
}

impl FileSystem for MemoryFileSystem {
    fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
        self.inner
            .read()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::not_found(path))
    }

    fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let mut state = self.inner.write();
        state.add_parents(path);
        state.files.insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        let mut state = self.inner.write();

        if let Some(data) = state.files.remove(from) {
            state.add_parents(to);
            state.files.insert(to.to_path_buf(), data);
            return Ok(());
        }

        if state.is_dir(from) {
            let moved: Vec<(PathBuf, Vec<u8>)> = state
                .files
                .iter()
                .filter(|(p, _)| p.starts_with(from))
                .map(|(p, d)| (p.clone(), d.clone()))
                .collect();
            state.files.retain(|p, _| !p.starts_with(from));
            let subdirs: Vec<PathBuf> = state
                .dirs
                .iter()
                .filter(|p| p.starts_with(from))
                .cloned()
                .collect();
            state.dirs.retain(|p| !p.starts_with(from));
            state.add_parents(to);
            state.dirs.insert(to.to_path_buf());
            for dir in subdirs {
                if let Ok(rest) = dir.strip_prefix(from) {
                    if !rest.as_os_str().is_empty() {
                        state.dirs.insert(to.join(rest));
                    }
                }
            }
            for (path, data) in moved {
                if let Ok(rest) = path.strip_prefix(from) {
                    state.files.insert(to.join(rest), data);
                }
            }
            return Ok(());
        }

        Err(StorageError::not_found(from))
    }

    fn remove_file(&self, path: &Path) -> StorageResult<()> {
        self.inner
            .write()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(path))
    }

    fn list(&self, dir: &Path) -> StorageResult<Vec<String>> {
        let state = self.inner.read();
        if !state.is_dir(dir) {
            return Err(StorageError::not_found(dir));
        }

        let mut names = BTreeSet::new();
        for path in state.files.keys().chain(state.dirs.iter()) {
            if let Ok(rest) = path.strip_prefix(dir) {
                if let Some(first) = rest.components().next() {
                    names.insert(first.as_os_str().to_string_lossy().into_owned());
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.inner.read();
        state.files.contains_key(path) || state.is_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        let mut state = self.inner.write();
        state.add_parents(path);
        state.dirs.insert(path.to_path_buf());
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
        let mut state = self.inner.write();
        if !state.is_dir(path) {
            return Err(StorageError::not_found(path));
        }
        state.files.retain(|p, _| !p.starts_with(path));
        state.dirs.retain(|p| !p.starts_with(path));
        Ok(())
    }

    fn copy_dir(&self, from: &Path, to: &Path) -> StorageResult<()> {
        let mut state = self.inner.write();
        if !state.is_dir(from) {
            return Err(StorageError::not_found(from));
        }
        let copied: Vec<(PathBuf, Vec<u8>)> = state
            .files
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, d)| (p.clone(), d.clone()))
            .collect();
        let subdirs: Vec<PathBuf> = state
            .dirs
            .iter()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        state.add_parents(to);
        state.dirs.insert(to.to_path_buf());
        for dir in subdirs {
            if let Ok(rest) = dir.strip_prefix(from) {
                if !rest.as_os_str().is_empty() {
                    state.dirs.insert(to.join(rest));
                }
            }
        }
        for (path, data) in copied {
            if let Ok(rest) = path.strip_prefix(from) {
                state.files.insert(to.join(rest), data);
            }
        }
        Ok(())
    }

    fn sync_dir(&self, _path: &Path) -> StorageResult<()> {
        Ok(())
    }
}
