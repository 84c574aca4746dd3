//! Random access into sealed segments.
//!
//! Segment columns are forward-only compressed streams. The manager keeps
//! an LRU cache of open segments, each with one decompressor cursor per
//! column; reading at an offset behind a cursor resets that column's
//! stream, reading ahead discards the bytes in between.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use log::debug;

use crate::archive::SEGMENT_COLUMN_FILE_NAMES;
use crate::config::Codec;
use crate::error::{LogPackError, Result};
use crate::io::{open_decompressor, Decompressor};

/// The three columns of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Timestamp column (`ts`).
    Timestamps = 0,
    /// Log-type ID column (`logtype`).
    LogTypes = 1,
    /// Variable column (`var`).
    Vars = 2,
}

impl Column {
    fn file_name(self) -> &'static str {
        SEGMENT_COLUMN_FILE_NAMES[self as usize]
    }
}

struct ColumnCursor {
    decompressor: Box<dyn Decompressor>,
    pos: u64,
}

struct OpenSegment {
    id: u64,
    cursors: Vec<ColumnCursor>,
}

/// LRU cache of open segments.
pub struct SegmentManager {
    segments_dir: PathBuf,
    codec: Codec,
    capacity: usize,
    /// Most recently used at the back.
    open: VecDeque<OpenSegment>,
}

impl SegmentManager {
    /// Creates a manager over `segments_dir` holding at most `capacity`
    /// open segments.
    pub fn new(segments_dir: PathBuf, codec: Codec, capacity: usize) -> Self {
        Self {
            segments_dir,
            codec,
            capacity: capacity.max(1),
            open: VecDeque::new(),
        }
    }

    /// Reads `len` uncompressed bytes of `column` in `segment_id`,
    /// starting at `offset`.
    pub fn read(
        &mut self,
        segment_id: u64,
        column: Column,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>> {
        let segment = self.open_segment(segment_id)?;
        let cursor = &mut segment.cursors[column as usize];

        if offset < cursor.pos {
            cursor.decompressor.reset()?;
            cursor.pos = 0;
        }
        if offset > cursor.pos {
            cursor.decompressor.skip(offset - cursor.pos)?;
            cursor.pos = offset;
        }

        let mut out = Vec::with_capacity(len as usize);
        cursor
            .decompressor
            .read_exact(len as usize, &mut out)
            .map_err(|e| {
                if e.is_end_of_stream() {
                    LogPackError::corrupt(format!(
                        "segment {} {} column ends before offset {} + {}",
                        segment_id,
                        column.file_name(),
                        offset,
                        len
                    ))
                } else {
                    e
                }
            })?;
        cursor.pos += len;
        Ok(out)
    }

    fn open_segment(&mut self, segment_id: u64) -> Result<&mut OpenSegment> {
        if let Some(ix) = self.open.iter().position(|s| s.id == segment_id) {
            // Move to the most-recently-used position.
            if let Some(segment) = self.open.remove(ix) {
                self.open.push_back(segment);
            }
        } else {
            let dir = self.segments_dir.join(segment_id.to_string());
            let mut cursors = Vec::with_capacity(3);
            for name in SEGMENT_COLUMN_FILE_NAMES {
                let path = dir.join(name);
                let file = fs::File::open(&path).map_err(|_| {
                    LogPackError::corrupt(format!("missing segment file {}", path.display()))
                })?;
                cursors.push(ColumnCursor {
                    decompressor: open_decompressor(file, self.codec)?,
                    pos: 0,
                });
            }
            if self.open.len() == self.capacity {
                if let Some(evicted) = self.open.pop_front() {
                    debug!("evicting segment {} from cache", evicted.id);
                }
            }
            self.open.push_back(OpenSegment {
                id: segment_id,
                cursors,
            });
        }
        self.open
            .back_mut()
            .ok_or(LogPackError::NotInitialised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::writer::file::{ColumnData, FileColumns};
    use crate::archive::writer::segment::Segment;
    use tempfile::TempDir;

    fn build_segment(dir: &std::path::Path, id: u64, ts: &[u8], logtypes: &[u8], vars: &[u8]) {
        let mut segment = Segment::open(dir, id, Codec::Zstd(3)).unwrap();
        segment
            .append_file(&FileColumns {
                ts: ColumnData::Mem(ts.to_vec()),
                logtypes: ColumnData::Mem(logtypes.to_vec()),
                vars: ColumnData::Mem(vars.to_vec()),
            })
            .unwrap();
        segment.close().unwrap();
    }

    #[test]
    fn test_forward_and_backward_reads() {
        let dir = TempDir::new().unwrap();
        let ts: Vec<u8> = (0..64).collect();
        build_segment(dir.path(), 0, &ts, b"ltltlt", b"vvvv");

        let mut manager = SegmentManager::new(dir.path().to_path_buf(), Codec::Zstd(3), 2);
        // Forward skip.
        assert_eq!(manager.read(0, Column::Timestamps, 16, 8).unwrap(), &ts[16..24]);
        // Continue forward.
        assert_eq!(manager.read(0, Column::Timestamps, 32, 8).unwrap(), &ts[32..40]);
        // Backtrack forces a reset.
        assert_eq!(manager.read(0, Column::Timestamps, 0, 8).unwrap(), &ts[0..8]);
        // Columns have independent cursors.
        assert_eq!(manager.read(0, Column::LogTypes, 2, 2).unwrap(), b"lt");
        assert_eq!(manager.read(0, Column::Vars, 0, 4).unwrap(), b"vvvv");
    }

    #[test]
    fn test_lru_eviction_reopens_transparently() {
        let dir = TempDir::new().unwrap();
        for id in 0..3u64 {
            build_segment(dir.path(), id, &[id as u8; 16], &[1], &[2]);
        }
        let mut manager = SegmentManager::new(dir.path().to_path_buf(), Codec::Zstd(3), 2);
        assert_eq!(manager.read(0, Column::Timestamps, 0, 4).unwrap(), [0; 4]);
        assert_eq!(manager.read(1, Column::Timestamps, 0, 4).unwrap(), [1; 4]);
        // Opens a third segment, evicting segment 0.
        assert_eq!(manager.read(2, Column::Timestamps, 0, 4).unwrap(), [2; 4]);
        // Segment 0 reopens from scratch and still serves reads.
        assert_eq!(manager.read(0, Column::Timestamps, 4, 4).unwrap(), [0; 4]);
    }

    #[test]
    fn test_read_past_end_is_corruption() {
        let dir = TempDir::new().unwrap();
        build_segment(dir.path(), 0, &[7; 8], &[1], &[2]);
        let mut manager = SegmentManager::new(dir.path().to_path_buf(), Codec::Zstd(3), 1);
        assert!(manager.read(0, Column::Timestamps, 0, 64).is_err());
    }

    #[test]
    fn test_missing_segment_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut manager = SegmentManager::new(dir.path().to_path_buf(), Codec::Zstd(3), 1);
        assert!(matches!(
            manager.read(9, Column::Timestamps, 0, 1),
            Err(LogPackError::CorruptArchive { .. })
        ));
    }
}
