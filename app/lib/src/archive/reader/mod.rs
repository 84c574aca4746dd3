//! Reader archive.
//!
//! Opens a sealed (or still-growing) archive for random access: header,
//! dictionaries, segment indexes, metadata store, and an LRU segment
//! manager. Only state committed at a segment close is ever visible;
//! segment directories without committed rows are simply never referenced.

pub mod segment_manager;

pub use segment_manager::{Column, SegmentManager};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::archive::{
    load_segment_index, ArchiveHeader, LOGTYPE_DICT_FILE_NAME, LOGTYPE_SEGMENT_INDEX_FILE_NAME,
    METADATA_DB_NAME, SEGMENTS_DIR_NAME, VAR_DICT_FILE_NAME, VAR_SEGMENT_INDEX_FILE_NAME,
};
use crate::config::ReaderConfig;
use crate::dict::{DictionaryId, DictionaryReader, LogTypeDictionaryReader};
use crate::error::{LogPackError, Result};
use crate::io::{read_i64_le, read_u64_le, read_varint};
use crate::meta::{ArchiveMetadataDb, FileFilter, FileMetadata};
use crate::parse::decode_message;
use crate::time::TimestampPattern;

/// One message as stored: timestamp, log-type ID, variable slots, and the
/// timestamp pattern in effect at its position in the file.
#[derive(Debug, Clone)]
pub struct EncodedMessage {
    /// Message index within its file.
    pub msg_ix: u64,
    /// Stored timestamp (0 in timestampless files).
    pub timestamp: i64,
    /// Log-type dictionary ID.
    pub logtype_id: DictionaryId,
    /// Variable slots, in placeholder order.
    pub vars: Vec<u64>,
    /// Timestamp pattern for reconstruction; empty when the message had no
    /// timestamp.
    pub pattern: TimestampPattern,
}

/// Lazy per-file message cursor over the file's three column ranges.
pub struct FileReader {
    ts_bytes: Vec<u8>,
    logtype_bytes: Vec<u8>,
    var_bytes: Vec<u8>,
    ts_pos: usize,
    logtype_pos: usize,
    var_pos: usize,
    msg_ix: u64,
    num_msgs: u64,
    ts_patterns: Vec<crate::meta::TsPatternChange>,
    pattern_ix: usize,
}

impl FileReader {
    /// Decodes the next message, or `None` past the last.
    ///
    /// `logtypes` supplies each message's variable count.
    pub fn next_message(
        &mut self,
        logtypes: &LogTypeDictionaryReader,
    ) -> Result<Option<EncodedMessage>> {
        if self.msg_ix == self.num_msgs {
            return Ok(None);
        }

        let timestamp = read_i64_le(&self.ts_bytes, &mut self.ts_pos)?;
        let logtype_id = read_varint(&self.logtype_bytes, &mut self.logtype_pos)?;
        let num_vars = logtypes.entry(logtype_id)?.num_vars();
        let mut vars = Vec::with_capacity(num_vars);
        for _ in 0..num_vars {
            vars.push(read_u64_le(&self.var_bytes, &mut self.var_pos)?);
        }

        // Advance to the pattern in effect for this message.
        while self
            .ts_patterns
            .get(self.pattern_ix + 1)
            .map(|c| c.first_msg_ix <= self.msg_ix)
            .unwrap_or(false)
        {
            self.pattern_ix += 1;
        }
        let pattern = self
            .ts_patterns
            .get(self.pattern_ix)
            .map(|c| c.pattern.clone())
            .unwrap_or_else(|| TimestampPattern::new(0, ""));

        let msg_ix = self.msg_ix;
        self.msg_ix += 1;
        Ok(Some(EncodedMessage {
            msg_ix,
            timestamp,
            logtype_id,
            vars,
            pattern,
        }))
    }
}

/// A reader archive.
pub struct Archive {
    path: PathBuf,
    header: ArchiveHeader,
    logtype_dict: LogTypeDictionaryReader,
    var_dict: DictionaryReader,
    logtype_segindex: HashMap<u64, HashSet<DictionaryId>>,
    var_segindex: HashMap<u64, HashSet<DictionaryId>>,
    metadata_db: ArchiveMetadataDb,
    segments: SegmentManager,
}

impl Archive {
    /// Opens the archive directory at `path`.
    ///
    /// The stream codec is taken from the archive header.
    pub fn open(path: &Path, config: &ReaderConfig) -> Result<Self> {
        let header = ArchiveHeader::read_from(path)?;
        let codec = header.codec;
        let logtype_dict =
            LogTypeDictionaryReader::open(&path.join(LOGTYPE_DICT_FILE_NAME), codec)?;
        let var_dict = DictionaryReader::open(&path.join(VAR_DICT_FILE_NAME), codec)?;
        let logtype_segindex = load_segment_index(&path.join(LOGTYPE_SEGMENT_INDEX_FILE_NAME))?;
        let var_segindex = load_segment_index(&path.join(VAR_SEGMENT_INDEX_FILE_NAME))?;
        let metadata_db = ArchiveMetadataDb::open(&path.join(METADATA_DB_NAME))?;
        let segments = SegmentManager::new(
            path.join(SEGMENTS_DIR_NAME),
            codec,
            config.segment_cache_capacity,
        );

        info!("opened archive {} for reading", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            header,
            logtype_dict,
            var_dict,
            logtype_segindex,
            var_segindex,
            metadata_db,
            segments,
        })
    }

    /// Re-reads dictionaries and segment indexes to pick up segments
    /// committed since open. Cheap: both are append-only.
    pub fn refresh_dictionaries(&mut self) -> Result<()> {
        self.logtype_dict.refresh()?;
        self.var_dict.refresh()?;
        self.logtype_segindex =
            load_segment_index(&self.path.join(LOGTYPE_SEGMENT_INDEX_FILE_NAME))?;
        self.var_segindex = load_segment_index(&self.path.join(VAR_SEGMENT_INDEX_FILE_NAME))?;
        Ok(())
    }

    /// The archive header.
    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// The log-type dictionary.
    pub fn logtype_dict(&self) -> &LogTypeDictionaryReader {
        &self.logtype_dict
    }

    /// The variable dictionary.
    pub fn var_dict(&self) -> &DictionaryReader {
        &self.var_dict
    }

    /// Log-type IDs referenced by a segment, per the segment index.
    pub fn segment_logtype_ids(&self, segment_id: u64) -> Option<&HashSet<DictionaryId>> {
        self.logtype_segindex.get(&segment_id)
    }

    /// Variable IDs referenced by a segment, per the segment index.
    pub fn segment_var_ids(&self, segment_id: u64) -> Option<&HashSet<DictionaryId>> {
        self.var_segindex.get(&segment_id)
    }

    /// Committed segment IDs, ascending.
    pub fn segment_ids(&self) -> Result<Vec<u64>> {
        self.metadata_db.segment_ids()
    }

    /// Queries committed file rows.
    pub fn files(&self, filter: &FileFilter) -> Result<Vec<FileMetadata>> {
        self.metadata_db.files(filter)
    }

    /// Recreates the archive's empty directories under `output_dir`.
    pub fn decompress_empty_directories(&self, output_dir: &Path) -> Result<()> {
        for dir in self.metadata_db.empty_directories()? {
            let relative = dir.trim_start_matches('/');
            fs::create_dir_all(output_dir.join(relative))?;
        }
        Ok(())
    }

    /// Opens a message cursor over one file row, reading its three column
    /// ranges from the owning segment.
    pub fn file_reader(&mut self, meta: &FileMetadata) -> Result<FileReader> {
        debug!(
            "reading file {} (split {}) from segment {}",
            meta.orig_path, meta.split_ix, meta.segment_id
        );
        let ts_bytes = self.segments.read(
            meta.segment_id,
            Column::Timestamps,
            meta.ts_col_offset,
            meta.ts_col_len,
        )?;
        let logtype_bytes = self.segments.read(
            meta.segment_id,
            Column::LogTypes,
            meta.logtype_col_offset,
            meta.logtype_col_len,
        )?;
        let var_bytes = self.segments.read(
            meta.segment_id,
            Column::Vars,
            meta.var_col_offset,
            meta.var_col_len,
        )?;

        if ts_bytes.len() as u64 != meta.num_msgs * 8 {
            return Err(LogPackError::corrupt(format!(
                "timestamp column holds {} bytes for {} messages",
                ts_bytes.len(),
                meta.num_msgs
            )));
        }

        Ok(FileReader {
            ts_bytes,
            logtype_bytes,
            var_bytes,
            ts_pos: 0,
            logtype_pos: 0,
            var_pos: 0,
            msg_ix: 0,
            num_msgs: meta.num_msgs,
            ts_patterns: meta.ts_patterns.clone(),
            pattern_ix: 0,
        })
    }

    /// Rebuilds the original text of one message, timestamp re-inserted.
    pub fn reconstruct_message(&self, message: &EncodedMessage) -> Result<String> {
        let entry = self.logtype_dict.entry(message.logtype_id)?;
        let content = decode_message(entry, &message.vars, &self.var_dict)?;
        if message.pattern.is_empty() {
            Ok(content)
        } else {
            message
                .pattern
                .insert_formatted_timestamp(message.timestamp, &content)
        }
    }

    /// Reconstructs a whole file row into `out`.
    pub fn decompress_file(
        &mut self,
        meta: &FileMetadata,
        out: &mut dyn Write,
    ) -> Result<()> {
        let mut reader = self.file_reader(meta)?;
        while let Some(message) = reader.next_message(&self.logtype_dict)? {
            let text = self.reconstruct_message(&message)?;
            out.write_all(text.as_bytes())?;
        }
        Ok(())
    }
}
