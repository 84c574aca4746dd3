//! Writer half of a dictionary.

use std::collections::HashMap;
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::config::Codec;
use crate::dict::DictionaryId;
use crate::error::{LogPackError, Result};
use crate::io::{open_compressor, Compressor};

/// Append-only dictionary writer.
///
/// New entries are streamed through the compressor as they are added;
/// [`DictionaryWriter::snapshot`] makes everything added so far visible to
/// readers by flushing the stream and rewriting the count header.
pub struct DictionaryWriter {
    header_file: Option<fs::File>,
    compressor: Option<Box<dyn Compressor>>,
    ids: HashMap<String, DictionaryId>,
    /// Uncompressed bytes streamed so far.
    data_size: u64,
}

impl DictionaryWriter {
    /// Creates a dictionary file at `path` and opens it for appending.
    pub fn open(path: &Path, codec: Codec) -> Result<Self> {
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        // Count header placeholder; rewritten at every snapshot.
        file.write_u64::<LittleEndian>(0)?;
        let compressor = open_compressor(file.try_clone()?, codec);
        Ok(Self {
            header_file: Some(file),
            compressor: Some(compressor),
            ids: HashMap::new(),
            data_size: 0,
        })
    }

    /// Returns the ID for `token`, inserting it if absent. The boolean is
    /// true when the token was newly inserted.
    pub fn add_or_get(&mut self, token: &str) -> Result<(DictionaryId, bool)> {
        if let Some(&id) = self.ids.get(token) {
            return Ok((id, false));
        }
        let compressor = self
            .compressor
            .as_mut()
            .ok_or(LogPackError::NotInitialised)?;

        let id = self.ids.len() as DictionaryId;
        let mut record = Vec::with_capacity(16 + token.len());
        record.write_u64::<LittleEndian>(id)?;
        record.write_u64::<LittleEndian>(token.len() as u64)?;
        record.extend_from_slice(token.as_bytes());
        compressor.write(&record)?;

        self.ids.insert(token.to_string(), id);
        self.data_size += record.len() as u64;
        Ok((id, true))
    }

    /// Makes all entries added so far visible to readers.
    pub fn snapshot(&mut self) -> Result<()> {
        let compressor = self
            .compressor
            .as_mut()
            .ok_or(LogPackError::NotInitialised)?;
        compressor.flush()?;
        self.rewrite_header()
    }

    /// Terminates the stream, writes the final count, and syncs the file.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut compressor) = self.compressor.take() {
            compressor.close()?;
        }
        self.rewrite_header()?;
        if let Some(file) = self.header_file.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Number of distinct entries.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if no entries have been added.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Uncompressed bytes streamed so far.
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    fn rewrite_header(&mut self) -> Result<()> {
        let file = self.header_file.as_mut().ok_or(LogPackError::NotInitialised)?;
        // The header handle shares its offset with the compressor's, so the
        // position is saved and restored around the rewrite.
        let end = file.stream_position()?;
        file.seek(SeekFrom::Start(0))?;
        file.write_u64::<LittleEndian>(self.ids.len() as u64)?;
        file.seek(SeekFrom::Start(end))?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::DictionaryReader;
    use tempfile::TempDir;

    #[test]
    fn test_ids_are_dense_and_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("var.dict");
        let mut writer = DictionaryWriter::open(&path, Codec::Passthrough).unwrap();

        assert_eq!(writer.add_or_get("alpha").unwrap(), (0, true));
        assert_eq!(writer.add_or_get("beta").unwrap(), (1, true));
        assert_eq!(writer.add_or_get("alpha").unwrap(), (0, false));
        assert_eq!(writer.add_or_get("gamma").unwrap(), (2, true));
        assert_eq!(writer.len(), 3);
        writer.close().unwrap();

        let reader = DictionaryReader::open(&path, Codec::Passthrough).unwrap();
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.get(0).unwrap(), "alpha");
        assert_eq!(reader.get(1).unwrap(), "beta");
        assert_eq!(reader.get(2).unwrap(), "gamma");
    }

    #[test]
    fn test_snapshot_bounds_reader_view() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("var.dict");
        let mut writer = DictionaryWriter::open(&path, Codec::Zstd(3)).unwrap();

        writer.add_or_get("committed").unwrap();
        writer.snapshot().unwrap();
        writer.add_or_get("uncommitted").unwrap();
        // No snapshot for the second entry.

        let reader = DictionaryReader::open(&path, Codec::Zstd(3)).unwrap();
        assert_eq!(reader.len(), 1);
        assert_eq!(reader.get(0).unwrap(), "committed");

        writer.close().unwrap();
        let mut reader = reader;
        reader.refresh().unwrap();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.get(1).unwrap(), "uncommitted");
    }

    #[test]
    fn test_open_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("var.dict");
        let mut writer = DictionaryWriter::open(&path, Codec::Passthrough).unwrap();
        writer.close().unwrap();
        assert!(DictionaryWriter::open(&path, Codec::Passthrough).is_err());
    }
}
