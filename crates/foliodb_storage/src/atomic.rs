//! Coalescing atomic file writer.
//!
//! Writes go to a uniquely named temp file in the target's directory and
//! are renamed onto the target, so readers only ever observe the old or
//! the new contents. Writes to the same target are serialized through a
//! per-filename slot: while one physical write is in flight, at most one
//! payload is queued behind it and later calls replace it
//! (last-write-wins). Every caller whose payload was superseded completes
//! with the outcome of the write that covered it.

use crate::error::{StorageError, StorageResult};
use crate::fs::FileSystem;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Default number of rename attempts before giving up.
const DEFAULT_RETRY_BUDGET: u32 = 5;

/// Default fixed delay between rename attempts.
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Per-filename write slot.
///
/// Generations number the physical writes for one filename. A queued
/// caller waits for its payload's generation to complete; replacing the
/// queued payload keeps the generation, which is what coalesces all the
/// superseded callers onto one outcome. Each generation's outcome is
/// kept until its last waiter has retired, so a waiter that wakes late
/// still reports its own covering write's result, not a later one's.
struct Slot {
    busy: bool,
    pending: Option<Vec<u8>>,
    pending_generation: u64,
    next_generation: u64,
    completed_generation: u64,
    outcomes: HashMap<u64, Option<String>>,
    waiters: HashMap<u64, usize>,
}

impl Slot {
    fn new() -> Self {
        Self {
            busy: false,
            pending: None,
            pending_generation: 0,
            next_generation: 1,
            completed_generation: 0,
            outcomes: HashMap::new(),
            waiters: HashMap::new(),
        }
    }

    fn idle(&self) -> bool {
        !self.busy && self.pending.is_none() && self.waiters.is_empty()
    }
}

/// Serializes and coalesces atomic writes per target filename.
///
/// # Thread Safety
///
/// The writer is shared across threads; writes to different filenames
/// proceed concurrently, writes to one filename are serialized.
pub struct AtomicWriter {
    fs: Arc<dyn FileSystem>,
    slots: Mutex<HashMap<PathBuf, Slot>>,
    completed: Condvar,
    retry_budget: u32,
    retry_backoff: Duration,
}

impl AtomicWriter {
    /// Creates a writer with the default retry policy.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self::with_retry(fs, DEFAULT_RETRY_BUDGET, DEFAULT_RETRY_BACKOFF)
    }

    /// Creates a writer with an explicit rename retry budget and backoff.
    #[must_use]
    pub fn with_retry(fs: Arc<dyn FileSystem>, retry_budget: u32, retry_backoff: Duration) -> Self {
        Self {
            fs,
            slots: Mutex::new(HashMap::new()),
            completed: Condvar::new(),
            retry_budget: retry_budget.max(1),
            retry_backoff,
        }
    }

    /// Atomically writes `data` to `path`.
    ///
    /// If no write to `path` is in flight the write happens immediately.
    /// Otherwise the payload is queued, superseding any payload already
    /// queued for `path`; the call returns once a write covering the
    /// payload has landed.
    ///
    /// # Errors
    ///
    /// Returns an error if the covering physical write failed. Rename
    /// contention is retried up to the configured budget first.
    pub fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .entry(path.to_path_buf())
            .or_insert_with(Slot::new);

        if slot.busy {
            // Queue behind the in-flight write, last-write-wins.
            if slot.pending.is_none() {
                slot.pending_generation = slot.next_generation;
                slot.next_generation += 1;
            }
            slot.pending = Some(data.to_vec());
            let target = slot.pending_generation;
            *slot.waiters.entry(target).or_insert(0) += 1;

            loop {
                self.completed.wait(&mut slots);
                let slot = slots
                    .get_mut(path)
                    .expect("slot removed while waiters registered");
                if slot.completed_generation < target {
                    continue;
                }

                let failure = slot.outcomes.get(&target).cloned().flatten();
                if let Some(remaining) = slot.waiters.get_mut(&target) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        slot.waiters.remove(&target);
                        slot.outcomes.remove(&target);
                    }
                }
                let result = match failure {
                    Some(message) => Err(StorageError::WriteFailed {
                        path: path.to_path_buf(),
                        message,
                    }),
                    None => Ok(()),
                };
                if slot.idle() {
                    slots.remove(path);
                }
                return result;
            }
        }

        // Become the owner of this filename's slot.
        slot.busy = true;
        let mut generation = slot.next_generation;
        slot.next_generation += 1;
        let mut payload = data.to_vec();
        let mut own_result = None;

        loop {
            drop(slots);
            let result = self.write_physical(path, &payload);
            slots = self.slots.lock();
            let slot = slots.get_mut(path).expect("slot removed while busy");
            slot.completed_generation = generation;
            // Waiters register before their generation is picked up, so
            // this records an outcome exactly when someone will read it.
            if slot.waiters.contains_key(&generation) {
                slot.outcomes
                    .insert(generation, result.as_ref().err().map(|e| e.to_string()));
            }
            if own_result.is_none() {
                own_result = Some(result);
            }

            // Pick up a payload queued while the write was in flight.
            match slot.pending.take() {
                Some(next) => {
                    payload = next;
                    generation = slot.pending_generation;
                    self.completed.notify_all();
                }
                None => {
                    slot.busy = false;
                    if slot.idle() {
                        slots.remove(path);
                    }
                    self.completed.notify_all();
                    return own_result.expect("owner result recorded");
                }
            }
        }
    }

    /// Writes to a temp file in the target's directory and renames it
    /// onto the target, retrying the rename on contention.
    fn write_physical(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        // The leading marker keeps directory scans from picking temps up.
        let temp = parent.join(format!("_tmp-{}", Uuid::new_v4()));

        let result = self.fs.write(&temp, data).and_then(|()| {
            let mut attempts = 0;
            loop {
                match self.fs.rename(&temp, path) {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        attempts += 1;
                        if attempts >= self.retry_budget {
                            return Err(StorageError::RenameExhausted {
                                path: path.to_path_buf(),
                                attempts,
                                message: e.to_string(),
                            });
                        }
                        tracing::warn!(
                            path = %path.display(),
                            attempt = attempts,
                            error = %e,
                            "rename contended, retrying"
                        );
                        std::thread::sleep(self.retry_backoff);
                    }
                }
            }
        });

        // Best-effort cleanup; after a successful rename the temp is gone.
        let _ = self.fs.remove_file(&temp);
        result
    }
}

impl std::fmt::Debug for AtomicWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicWriter")
            .field("retry_budget", &self.retry_budget)
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}
