//! WAL segment writer, rotation, and checkpointing.

use crate::error::{CoreError, CoreResult};
use crate::types::{SegmentId, WalPosition};
use crate::wal::record::{encode_record, Operation};
use crate::wal::replay::WalReplay;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name prefix of segment files within the WAL directory.
const SEGMENT_PREFIX: &str = "segment-";

/// Returns the file name of a segment.
fn segment_file_name(id: SegmentId) -> String {
    format!("{SEGMENT_PREFIX}{}", id.as_u64())
}

/// Parses a segment id out of a file name.
fn parse_segment_name(name: &str) -> Option<SegmentId> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .parse::<u64>()
        .ok()
        .map(SegmentId::new)
}

/// The currently open segment writer.
struct ActiveSegment {
    segment: SegmentId,
    file: File,
    position: u64,
}

/// Manages the segment-based write-ahead log.
///
/// Appends are serialized through one active segment writer; the order
/// entries are durably appended in is the order replay reproduces.
pub struct WalManager {
    dir: PathBuf,
    sync_on_write: bool,
    max_segment_size: u64,
    active: Mutex<ActiveSegment>,
}

impl WalManager {
    /// Opens the WAL in the given directory, resuming the highest
    /// existing segment or starting segment 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// current segment cannot be opened for appending.
    pub fn open(dir: &Path, sync_on_write: bool, max_segment_size: u64) -> CoreResult<Self> {
        fs::create_dir_all(dir)?;

        let current = Self::existing_segments(dir)?
            .last()
            .copied()
            .unwrap_or_default();
        let active = Self::open_segment(dir, current)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            sync_on_write,
            max_segment_size: max_segment_size.max(1),
            active: Mutex::new(active),
        })
    }

    fn open_segment(dir: &Path, segment: SegmentId) -> CoreResult<ActiveSegment> {
        let path = dir.join(segment_file_name(segment));
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| CoreError::wal_io(format!("cannot open {}: {e}", path.display())))?;
        let position = file
            .metadata()
            .map_err(|e| CoreError::wal_io(e.to_string()))?
            .len();
        Ok(ActiveSegment {
            segment,
            file,
            position,
        })
    }

    /// Lists existing segment ids in ascending order.
    fn existing_segments(dir: &Path) -> CoreResult<Vec<SegmentId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(id) = parse_segment_name(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Durably appends an operation and returns its coordinates.
    ///
    /// The record is flushed (and fsynced when `sync_on_write` is set)
    /// before this returns; the returned `(segment, position)` uniquely
    /// identifies the entry.
    ///
    /// # Errors
    ///
    /// Returns `WalIo` on unrecoverable write failure.
    pub fn append(&self, operation: &Operation) -> CoreResult<WalPosition> {
        let record = encode_record(operation)?;
        let mut active = self.active.lock();

        // Size-based rotation: never split a record across segments.
        if active.position > 0 && active.position + record.len() as u64 > self.max_segment_size {
            let next = active.segment.next();
            tracing::debug!(segment = %next, "rotating WAL segment");
            *active = Self::open_segment(&self.dir, next)?;
        }

        let position = active.position;
        active
            .file
            .write_all(&record)
            .map_err(|e| CoreError::wal_io(format!("append failed: {e}")))?;
        active
            .file
            .flush()
            .map_err(|e| CoreError::wal_io(format!("flush failed: {e}")))?;
        if self.sync_on_write {
            active
                .file
                .sync_data()
                .map_err(|e| CoreError::wal_io(format!("fsync failed: {e}")))?;
        }
        active.position += record.len() as u64;

        Ok(WalPosition::new(active.segment, position))
    }

    /// Returns the id of the segment currently being written to.
    #[must_use]
    pub fn current_segment(&self) -> SegmentId {
        self.active.lock().segment
    }

    /// Returns a lazy iterator over every surviving entry, in ascending
    /// `(segment, position)` order.
    ///
    /// Consumed once at startup; the sequence neither skips nor
    /// duplicates entries.
    pub fn replay(&self) -> CoreResult<WalReplay> {
        let active = self.active.lock();
        let segments = Self::existing_segments(&self.dir)?
            .into_iter()
            .map(|id| (id, self.dir.join(segment_file_name(id))))
            .collect();
        drop(active);
        Ok(WalReplay::new(segments))
    }

    /// Deletes all fully-superseded segments numbered `<= up_to`.
    ///
    /// The segment currently being written to is never deleted; if it
    /// would be covered, a fresh segment is opened first. Checkpointing
    /// an already-removed segment is a no-op.
    pub fn checkpoint(&self, up_to: SegmentId) -> CoreResult<()> {
        let mut active = self.active.lock();

        if up_to >= active.segment {
            let next = up_to.next();
            tracing::debug!(segment = %next, "opening fresh segment for checkpoint");
            *active = Self::open_segment(&self.dir, next)?;
        }

        let mut removed = 0usize;
        for id in Self::existing_segments(&self.dir)? {
            if id <= up_to && id != active.segment {
                let path = self.dir.join(segment_file_name(id));
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    // Already gone: checkpoint is idempotent.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(CoreError::wal_io(format!(
                        "cannot remove {}: {e}",
                        path.display()
                    ))),
                }
            }
        }

        if removed > 0 {
            Self::sync_dir(&self.dir)?;
            tracing::info!(up_to = %up_to, removed, "WAL checkpoint complete");
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_dir(dir: &Path) -> CoreResult<()> {
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(_dir: &Path) -> CoreResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("dir", &self.dir)
            .field("sync_on_write", &self.sync_on_write)
            .field("current_segment", &self.current_segment())
            .finish_non_exhaustive()
    }
}
