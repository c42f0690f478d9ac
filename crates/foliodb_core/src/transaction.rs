//! Directory-swap transactions.
//!
//! A transaction works on a full copy of the live data tree under
//! `_staging/<tx-id>/` and commits by swapping directories:
//!
//! 1. `staging` -> `<root>/_new`
//! 2. `data`    -> `<root>/_old`
//! 3. `_new`    -> `data`
//! 4. remove `_old`
//!
//! Renames 1-3 are each atomic, so a crash leaves the root in one of a
//! small set of states that [`TransactionManager::recover_layout`]
//! resolves on the next open. Failure before step 3 leaves the live
//! tree untouched; staging cleanup is guaranteed by a drop guard.

use crate::error::{CoreError, CoreResult};
use foliodb_storage::FileSystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const NEW_DIR: &str = "_new";
const OLD_DIR: &str = "_old";

/// Runs transactions against the live data tree.
#[derive(Debug)]
pub struct TransactionManager {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    data_dir: PathBuf,
    staging_root: PathBuf,
}

/// Removes the staging tree unless the commit renamed it away.
struct StagingGuard<'a> {
    fs: &'a Arc<dyn FileSystem>,
    path: PathBuf,
    armed: bool,
}

impl Drop for StagingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.fs.remove_dir_all(&self.path) {
                if !e.is_not_found() {
                    tracing::warn!(path = %self.path.display(), error = %e,
                        "failed to clean up staging directory");
                }
            }
        }
    }
}

impl TransactionManager {
    /// Creates a manager for the given database layout.
    pub fn new(fs: Arc<dyn FileSystem>, root: PathBuf, data_dir: PathBuf, staging_root: PathBuf) -> Self {
        Self {
            fs,
            root,
            data_dir,
            staging_root,
        }
    }

    /// Runs `work` against a staged copy of the data tree and commits
    /// its result atomically.
    ///
    /// `work` receives the staging path; every mutation it makes there
    /// becomes visible all at once on commit. If `work` or the commit
    /// fails before the swap, the live tree is untouched and staging is
    /// removed.
    pub fn run<T>(&self, work: impl FnOnce(&Path) -> CoreResult<T>) -> CoreResult<T> {
        let tx_id = Uuid::new_v4();
        let staging = self.staging_root.join(tx_id.to_string());
        tracing::debug!(tx = %tx_id, "starting transaction");

        let mut guard = StagingGuard {
            fs: &self.fs,
            path: staging.clone(),
            armed: true,
        };

        self.fs.copy_dir(&self.data_dir, &staging)?;
        let value = work(&staging)
            .map_err(|e| CoreError::transaction_aborted(e.to_string()))?;

        self.commit(&staging)?;
        guard.armed = false;
        tracing::debug!(tx = %tx_id, "transaction committed");
        Ok(value)
    }

    /// The four-rename swap. Rename 3 is the commit point.
    fn commit(&self, staging: &Path) -> CoreResult<()> {
        let new_dir = self.root.join(NEW_DIR);
        let old_dir = self.root.join(OLD_DIR);

        self.fs
            .rename(staging, &new_dir)
            .map_err(|e| CoreError::transaction_aborted(format!("staging rename: {e}")))?;

        if let Err(e) = self.fs.rename(&self.data_dir, &old_dir) {
            // Live tree untouched; discard the staged copy.
            let _ = self.fs.remove_dir_all(&new_dir);
            return Err(CoreError::transaction_aborted(format!("live rename: {e}")));
        }

        if let Err(e) = self.fs.rename(&new_dir, &self.data_dir) {
            // Put the live tree back before reporting.
            self.fs.rename(&old_dir, &self.data_dir)?;
            let _ = self.fs.remove_dir_all(&new_dir);
            return Err(CoreError::transaction_aborted(format!("swap rename: {e}")));
        }

        // Committed. The stale tree is garbage from here on.
        if let Err(e) = self.fs.remove_dir_all(&old_dir) {
            tracing::warn!(error = %e, "failed to remove superseded data tree");
        }
        self.fs.sync_dir(&self.root)?;
        Ok(())
    }

    /// Resolves any swap a crash interrupted and discards abandoned
    /// staging trees. Called once while opening the database.
    pub fn recover_layout(&self) -> CoreResult<()> {
        let new_dir = self.root.join(NEW_DIR);
        let old_dir = self.root.join(OLD_DIR);

        if self.fs.exists(&new_dir) {
            if self.fs.exists(&self.data_dir) {
                // Crashed before the live tree moved aside: the swap
                // never reached its commit point, so the staged copy is
                // discarded.
                tracing::warn!("discarding uncommitted transaction snapshot");
                self.fs.remove_dir_all(&new_dir)?;
            } else {
                // Crashed between renames 2 and 3: finish the swap.
                tracing::warn!("completing interrupted transaction swap");
                self.fs.rename(&new_dir, &self.data_dir)?;
            }
        }

        if self.fs.exists(&old_dir) {
            if self.fs.exists(&self.data_dir) {
                self.fs.remove_dir_all(&old_dir)?;
            } else {
                // Crashed with only the old tree left: restore it.
                tracing::warn!("restoring data tree from interrupted swap");
                self.fs.rename(&old_dir, &self.data_dir)?;
            }
        }

        // Abandoned staging trees from transactions that never reached
        // commit.
        if self.fs.exists(&self.staging_root) {
            for name in self.fs.list(&self.staging_root)? {
                tracing::warn!(tx = %name, "removing abandoned staging tree");
                self.fs.remove_dir_all(&self.staging_root.join(name))?;
            }
        }

        self.fs.sync_dir(&self.root)?;
        Ok(())
    }
}
