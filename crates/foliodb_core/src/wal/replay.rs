//! WAL replay iterator.

use crate::error::{CoreError, CoreResult};
use crate::types::{SegmentId, WalPosition};
use crate::wal::record::{
    compute_crc32, LoggedOperation, Operation, CRC_SIZE, HEADER_SIZE, WAL_MAGIC, WAL_VERSION,
};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

/// Lazy iterator over every surviving WAL entry.
///
/// Segments are read in ascending id order and records within a segment
/// in byte order, so entries come out in the order they were appended.
///
/// A truncated record at the tail of the final segment is treated as a
/// clean end of log (an interrupted append that was never acknowledged).
/// A checksum or framing failure anywhere else is corruption and stops
/// replay with an error.
pub struct WalReplay {
    /// Remaining segments, in reverse so `pop` yields the next one.
    segments: Vec<(SegmentId, PathBuf)>,
    current: Option<SegmentReader>,
    /// Set after a fatal error; the iterator is fused.
    done: bool,
}

struct SegmentReader {
    segment: SegmentId,
    reader: BufReader<File>,
    position: u64,
    /// Whether this is the last segment, where a torn tail is tolerated.
    is_last: bool,
}

impl WalReplay {
    pub(crate) fn new(mut segments: Vec<(SegmentId, PathBuf)>) -> Self {
        segments.reverse();
        Self {
            segments,
            current: None,
            done: false,
        }
    }

    fn advance_segment(&mut self) -> CoreResult<bool> {
        match self.segments.pop() {
            Some((segment, path)) => {
                let file = File::open(&path).map_err(|e| {
                    CoreError::wal_io(format!("cannot open {}: {e}", path.display()))
                })?;
                self.current = Some(SegmentReader {
                    segment,
                    reader: BufReader::new(file),
                    position: 0,
                    is_last: self.segments.is_empty(),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn next_entry(&mut self) -> CoreResult<Option<LoggedOperation>> {
        loop {
            if self.current.is_none() && !self.advance_segment()? {
                return Ok(None);
            }
            let Some(reader) = self.current.as_mut() else {
                return Ok(None);
            };

            match read_record(reader)? {
                RecordRead::Entry(entry) => return Ok(Some(entry)),
                RecordRead::EndOfSegment => {
                    self.current = None;
                }
            }
        }
    }
}

enum RecordRead {
    Entry(LoggedOperation),
    EndOfSegment,
}

/// Reads one framed record, or detects a clean or torn end of segment.
fn read_record(reader: &mut SegmentReader) -> CoreResult<RecordRead> {
    let start = WalPosition::new(reader.segment, reader.position);

    let mut header = [0u8; HEADER_SIZE];
    match read_exact_or_eof(&mut reader.reader, &mut header)? {
        Fill::Empty => return Ok(RecordRead::EndOfSegment),
        Fill::Partial => return torn_tail(reader, start, "truncated record header"),
        Fill::Full => {}
    }

    if header[..4] != WAL_MAGIC {
        return Err(CoreError::wal_corruption(format!(
            "bad magic at {start}"
        )));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != WAL_VERSION {
        return Err(CoreError::wal_corruption(format!(
            "unsupported WAL version {version} at {start}"
        )));
    }
    let len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;

    let mut body = vec![0u8; len + CRC_SIZE];
    match read_exact_or_eof(&mut reader.reader, &mut body)? {
        Fill::Full => {}
        Fill::Empty | Fill::Partial => {
            return torn_tail(reader, start, "truncated record body")
        }
    }

    let payload = &body[..len];
    let stored_crc = u32::from_le_bytes([body[len], body[len + 1], body[len + 2], body[len + 3]]);

    let mut framed = Vec::with_capacity(HEADER_SIZE + len);
    framed.extend_from_slice(&header);
    framed.extend_from_slice(payload);
    let actual = compute_crc32(&framed);
    if actual != stored_crc {
        return Err(CoreError::ChecksumMismatch {
            expected: stored_crc,
            actual,
        });
    }

    let operation: Operation = serde_json::from_slice(payload)
        .map_err(|e| CoreError::wal_corruption(format!("bad payload at {start}: {e}")))?;

    reader.position += (HEADER_SIZE + len + CRC_SIZE) as u64;
    Ok(RecordRead::Entry(LoggedOperation {
        operation,
        position: start,
    }))
}

/// A torn tail on the last segment is a clean end of log; anywhere else
/// it means a later record was acknowledged past a broken one.
fn torn_tail(reader: &SegmentReader, at: WalPosition, what: &str) -> CoreResult<RecordRead> {
    if reader.is_last {
        tracing::warn!(position = %at, "discarding torn record at WAL tail");
        Ok(RecordRead::EndOfSegment)
    } else {
        Err(CoreError::wal_corruption(format!("{what} at {at}")))
    }
}

enum Fill {
    Full,
    Partial,
    Empty,
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> CoreResult<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 { Fill::Empty } else { Fill::Partial });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(CoreError::wal_io(format!("read failed: {e}"))),
        }
    }
    Ok(Fill::Full)
}

impl Iterator for WalReplay {
    type Item = CoreResult<LoggedOperation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
