//! Writer-side segments.
//!
//! A segment is the unit of compression: a directory holding one framed
//! compressed stream per column (`ts`, `logtype`, `var`). Files are
//! appended whole; the offsets their columns land at are recorded in their
//! metadata rows so readers can seek back to them.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::archive::SEGMENT_COLUMN_FILE_NAMES;
use crate::config::Codec;
use crate::error::{LogPackError, Result};
use crate::io::{open_compressor, Compressor};

use super::file::FileColumns;

/// An open segment accepting file columns.
pub struct Segment {
    id: u64,
    dir: PathBuf,
    column_files: Vec<fs::File>,
    compressors: Vec<Box<dyn Compressor>>,
    offsets: [u64; 3],
    closed: bool,
}

impl Segment {
    /// Creates the segment directory and opens its three column streams.
    pub fn open(segments_dir: &Path, id: u64, codec: Codec) -> Result<Self> {
        let dir = segments_dir.join(id.to_string());
        fs::create_dir_all(&dir)?;

        let mut column_files = Vec::with_capacity(3);
        let mut compressors = Vec::with_capacity(3);
        for name in SEGMENT_COLUMN_FILE_NAMES {
            let file = fs::File::create(dir.join(name))?;
            column_files.push(file.try_clone()?);
            compressors.push(open_compressor(file, codec));
        }
        debug!("opened segment {}", id);
        Ok(Self {
            id,
            dir,
            column_files,
            compressors,
            offsets: [0; 3],
            closed: false,
        })
    }

    /// Appends a file's three columns, returning the uncompressed offsets
    /// each column starts at within this segment.
    pub fn append_file(&mut self, columns: &FileColumns) -> Result<[u64; 3]> {
        if self.closed {
            return Err(LogPackError::NotInitialised);
        }
        let starts = self.offsets;
        let data = [
            columns.ts.as_ref(),
            columns.logtypes.as_ref(),
            columns.vars.as_ref(),
        ];
        for (ix, bytes) in data.iter().enumerate() {
            self.compressors[ix].write(bytes)?;
            self.offsets[ix] += bytes.len() as u64;
        }
        Ok(starts)
    }

    /// Total uncompressed bytes accepted so far.
    pub fn total_uncompressed(&self) -> u64 {
        self.offsets.iter().sum()
    }

    /// Segment ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// On-disk (compressed) size of the segment's column files.
    pub fn stored_size(&self) -> Result<u64> {
        let mut total = 0;
        for name in SEGMENT_COLUMN_FILE_NAMES {
            total += fs::metadata(self.dir.join(name))?.len();
        }
        Ok(total)
    }

    /// Terminates the three streams and syncs everything to disk.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for compressor in &mut self.compressors {
            compressor.close()?;
        }
        for file in &self.column_files {
            file.sync_all()?;
        }
        // Make the directory entry itself durable.
        fs::File::open(&self.dir)?.sync_all()?;
        self.closed = true;
        debug!(
            "closed segment {} ({} uncompressed bytes)",
            self.id,
            self.total_uncompressed()
        );
        Ok(())
    }

    /// Deletes the segment directory; used to discard a partially written
    /// segment after a failure.
    pub fn discard(self) -> Result<()> {
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::writer::file::ColumnData;
    use tempfile::TempDir;

    fn columns(ts: &[u8], logtypes: &[u8], vars: &[u8]) -> FileColumns {
        FileColumns {
            ts: ColumnData::Mem(ts.to_vec()),
            logtypes: ColumnData::Mem(logtypes.to_vec()),
            vars: ColumnData::Mem(vars.to_vec()),
        }
    }

    #[test]
    fn test_offsets_advance_per_column() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 0, Codec::Passthrough).unwrap();

        let first = segment.append_file(&columns(&[1; 8], &[2; 3], &[3; 16])).unwrap();
        assert_eq!(first, [0, 0, 0]);
        let second = segment.append_file(&columns(&[4; 8], &[5; 2], &[6; 8])).unwrap();
        assert_eq!(second, [8, 3, 16]);
        assert_eq!(segment.total_uncompressed(), 45);

        segment.close().unwrap();
        for name in SEGMENT_COLUMN_FILE_NAMES {
            assert!(dir.path().join("0").join(name).exists());
        }
    }

    #[test]
    fn test_append_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let mut segment = Segment::open(dir.path(), 1, Codec::Passthrough).unwrap();
        segment.close().unwrap();
        assert!(segment.append_file(&columns(&[0; 8], &[0], &[])).is_err());
    }

    #[test]
    fn test_discard_removes_directory() {
        let dir = TempDir::new().unwrap();
        let segment = Segment::open(dir.path(), 2, Codec::Passthrough).unwrap();
        assert!(dir.path().join("2").exists());
        segment.discard().unwrap();
        assert!(!dir.path().join("2").exists());
    }
}
