//! Writer-side file buffers.
//!
//! A file accumulates three columnar streams for one original input file
//! (or one split of it): timestamps as fixed-width i64, log-type IDs as
//! varints, and variables as fixed-width u64 slots. Buffers start in
//! memory and may be spilled to scratch files under the archive's `logs`
//! directory; a spilled file keeps accepting appends. When the file is
//! appended to a segment its columns are read back, memory-mapped in the
//! spilled case.

use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use uuid::Uuid;

use crate::dict::DictionaryId;
use crate::error::Result;
use crate::io::write_varint;
use crate::meta::{FileMetadata, TsPatternChange};
use crate::parse::EncodedVar;
use crate::time::{EpochTimeMs, TimestampPattern};

/// One column's bytes, however they are held.
pub enum ColumnData {
    /// Bytes still in memory.
    Mem(Vec<u8>),
    /// Bytes mapped from a scratch file.
    Mapped(Mmap),
}

impl AsRef<[u8]> for ColumnData {
    fn as_ref(&self) -> &[u8] {
        match self {
            ColumnData::Mem(bytes) => bytes,
            ColumnData::Mapped(map) => map,
        }
    }
}

/// The three columns of a file, ready for segment insertion.
pub struct FileColumns {
    /// Timestamp column.
    pub ts: ColumnData,
    /// Log-type ID column.
    pub logtypes: ColumnData,
    /// Variable column.
    pub vars: ColumnData,
}

enum Storage {
    InMemory {
        ts: Vec<u8>,
        logtypes: Vec<u8>,
        vars: Vec<u8>,
    },
    OnDisk {
        paths: [PathBuf; 3],
        writers: Option<[BufWriter<fs::File>; 3]>,
        lens: [u64; 3],
    },
}

/// A writer-side file: buffered columnar streams plus the bookkeeping that
/// becomes the file's metadata row.
pub struct File {
    id: u64,
    orig_uuid: Uuid,
    orig_path: String,
    group_id: u64,
    split_ix: u64,
    num_msgs: u64,
    num_uncompressed_bytes: u64,
    begin_ts: i64,
    end_ts: i64,
    has_timestamps: bool,
    ts_patterns: Vec<TsPatternChange>,
    logtype_ids: HashSet<DictionaryId>,
    var_ids: HashSet<DictionaryId>,
    storage: Storage,
    is_open: bool,
}

impl File {
    pub(crate) fn new(
        id: u64,
        orig_path: &str,
        group_id: u64,
        orig_uuid: Uuid,
        split_ix: u64,
    ) -> Self {
        Self {
            id,
            orig_uuid,
            orig_path: orig_path.to_string(),
            group_id,
            split_ix,
            num_msgs: 0,
            num_uncompressed_bytes: 0,
            begin_ts: i64::MAX,
            end_ts: i64::MIN,
            has_timestamps: false,
            ts_patterns: Vec::new(),
            logtype_ids: HashSet::new(),
            var_ids: HashSet::new(),
            storage: Storage::InMemory {
                ts: Vec::new(),
                logtypes: Vec::new(),
                vars: Vec::new(),
            },
            is_open: true,
        }
    }

    /// Appends one encoded message.
    ///
    /// `pattern` is the timestamp pattern the message's leading line
    /// matched, or `None` for a message with no timestamp; changes are
    /// recorded so reconstruction can re-insert timestamps exactly.
    pub(crate) fn append_msg(
        &mut self,
        timestamp: Option<EpochTimeMs>,
        pattern: Option<&TimestampPattern>,
        logtype_id: DictionaryId,
        vars: &[EncodedVar],
        num_raw_bytes: u64,
    ) -> Result<()> {
        self.record_pattern(pattern);

        let ts_value = match timestamp {
            Some(ts) => {
                self.begin_ts = self.begin_ts.min(ts);
                self.end_ts = self.end_ts.max(ts);
                self.has_timestamps = true;
                ts
            }
            None => 0,
        };

        let mut ts_bytes = [0u8; 8];
        LittleEndian::write_i64(&mut ts_bytes, ts_value);
        let mut logtype_bytes = Vec::with_capacity(10);
        write_varint(logtype_id, &mut logtype_bytes);
        let mut var_bytes = Vec::with_capacity(vars.len() * 8);
        for var in vars {
            var_bytes.write_u64::<LittleEndian>(var.slot())?;
            if let EncodedVar::Dict(id) = var {
                self.var_ids.insert(*id);
            }
        }
        self.logtype_ids.insert(logtype_id);

        match &mut self.storage {
            Storage::InMemory { ts, logtypes, vars } => {
                ts.extend_from_slice(&ts_bytes);
                logtypes.extend_from_slice(&logtype_bytes);
                vars.extend_from_slice(&var_bytes);
            }
            Storage::OnDisk { writers, lens, .. } => {
                let writers = writers.as_mut().ok_or(crate::error::LogPackError::NotInitialised)?;
                writers[0].write_all(&ts_bytes)?;
                writers[1].write_all(&logtype_bytes)?;
                writers[2].write_all(&var_bytes)?;
                lens[0] += ts_bytes.len() as u64;
                lens[1] += logtype_bytes.len() as u64;
                lens[2] += var_bytes.len() as u64;
            }
        }

        self.num_msgs += 1;
        self.num_uncompressed_bytes += num_raw_bytes;
        Ok(())
    }

    fn record_pattern(&mut self, pattern: Option<&TimestampPattern>) {
        let effective = match pattern {
            Some(p) => p.clone(),
            None => TimestampPattern::new(0, ""),
        };
        let changed = match self.ts_patterns.last() {
            Some(last) => last.pattern != effective,
            None => true,
        };
        if changed {
            self.ts_patterns.push(TsPatternChange {
                first_msg_ix: self.num_msgs,
                pattern: effective,
            });
        }
    }

    /// Total buffered bytes across the three columns.
    pub fn buffered_size(&self) -> u64 {
        self.stream_lens().iter().sum()
    }

    /// Current byte length of each column stream.
    pub(crate) fn stream_lens(&self) -> [u64; 3] {
        match &self.storage {
            Storage::InMemory { ts, logtypes, vars } => {
                [ts.len() as u64, logtypes.len() as u64, vars.len() as u64]
            }
            Storage::OnDisk { lens, .. } => *lens,
        }
    }

    /// Moves the buffers to scratch files under `logs_dir`. The file keeps
    /// accepting appends afterwards. No-op if already spilled.
    pub(crate) fn spill_to_disk(&mut self, logs_dir: &Path) -> Result<()> {
        let (ts, logtypes, vars) = match &mut self.storage {
            Storage::InMemory { ts, logtypes, vars } => {
                (std::mem::take(ts), std::mem::take(logtypes), std::mem::take(vars))
            }
            Storage::OnDisk { .. } => return Ok(()),
        };

        let paths = [
            logs_dir.join(format!("{}.ts", self.id)),
            logs_dir.join(format!("{}.logtype", self.id)),
            logs_dir.join(format!("{}.var", self.id)),
        ];
        let lens = [ts.len() as u64, logtypes.len() as u64, vars.len() as u64];
        let mut writers = Vec::with_capacity(3);
        for (path, bytes) in paths.iter().zip([&ts, &logtypes, &vars]) {
            let mut writer = BufWriter::new(fs::File::create(path)?);
            writer.write_all(bytes)?;
            writers.push(writer);
        }
        let mut writers = writers.into_iter();
        let writers = [
            writers.next().ok_or(crate::error::LogPackError::NotInitialised)?,
            writers.next().ok_or(crate::error::LogPackError::NotInitialised)?,
            writers.next().ok_or(crate::error::LogPackError::NotInitialised)?,
        ];
        self.storage = Storage::OnDisk {
            paths,
            writers: Some(writers),
            lens,
        };
        Ok(())
    }

    /// Hands out the file's columns for segment insertion. Spilled columns
    /// are flushed and memory-mapped.
    pub(crate) fn take_columns(&mut self) -> Result<FileColumns> {
        match &mut self.storage {
            Storage::InMemory { ts, logtypes, vars } => Ok(FileColumns {
                ts: ColumnData::Mem(std::mem::take(ts)),
                logtypes: ColumnData::Mem(std::mem::take(logtypes)),
                vars: ColumnData::Mem(std::mem::take(vars)),
            }),
            Storage::OnDisk { paths, writers, .. } => {
                if let Some(writers) = writers.take() {
                    for mut writer in writers {
                        writer.flush()?;
                    }
                }
                let mut maps = Vec::with_capacity(3);
                for path in paths.iter() {
                    let file = fs::File::open(path)?;
                    // Safety: the scratch file is owned by this writer and
                    // not modified while mapped.
                    maps.push(ColumnData::Mapped(unsafe { Mmap::map(&file)? }));
                }
                let mut maps = maps.into_iter();
                Ok(FileColumns {
                    ts: maps.next().ok_or(crate::error::LogPackError::NotInitialised)?,
                    logtypes: maps.next().ok_or(crate::error::LogPackError::NotInitialised)?,
                    vars: maps.next().ok_or(crate::error::LogPackError::NotInitialised)?,
                })
            }
        }
    }

    /// Removes scratch files once the file's columns live in a segment.
    pub(crate) fn cleanup_scratch(&self) -> Result<()> {
        if let Storage::OnDisk { paths, .. } = &self.storage {
            for path in paths {
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Builds the metadata row for this file once placed in a segment.
    ///
    /// `lens` are the column lengths captured before the buffers were
    /// taken for segment insertion.
    pub(crate) fn to_metadata(
        &self,
        segment_id: u64,
        column_offsets: [u64; 3],
        lens: [u64; 3],
    ) -> FileMetadata {
        FileMetadata {
            id: self.id,
            orig_uuid: self.orig_uuid,
            orig_path: self.orig_path.clone(),
            group_id: self.group_id,
            num_msgs: self.num_msgs,
            num_uncompressed_bytes: self.num_uncompressed_bytes,
            begin_ts: self.begin_ts(),
            end_ts: self.end_ts(),
            ts_col_offset: column_offsets[0],
            ts_col_len: lens[0],
            logtype_col_offset: column_offsets[1],
            logtype_col_len: lens[1],
            var_col_offset: column_offsets[2],
            var_col_len: lens[2],
            segment_id,
            split_ix: self.split_ix,
            ts_patterns: self.ts_patterns.clone(),
        }
    }

    /// Key ordering files within a segment: group, then end timestamp,
    /// then path, with the file identity as the final tiebreak.
    pub(crate) fn sort_key(&self) -> (u64, i64, String, Uuid, u64) {
        (
            self.group_id,
            self.end_ts(),
            self.orig_path.clone(),
            self.orig_uuid,
            self.id,
        )
    }

    /// Original input path.
    pub fn orig_path(&self) -> &str {
        &self.orig_path
    }

    /// UUID of the original input file.
    pub fn orig_uuid(&self) -> Uuid {
        self.orig_uuid
    }

    /// Split index of this file.
    pub fn split_ix(&self) -> u64 {
        self.split_ix
    }

    /// Path-hash group this file belongs to.
    pub fn group_id(&self) -> u64 {
        self.group_id
    }

    /// Number of messages appended.
    pub fn num_msgs(&self) -> u64 {
        self.num_msgs
    }

    /// True once any message carried a timestamp.
    pub fn has_timestamps(&self) -> bool {
        self.has_timestamps
    }

    /// Earliest timestamp, or 0 for a timestampless file.
    pub fn begin_ts(&self) -> i64 {
        if self.has_timestamps {
            self.begin_ts
        } else {
            0
        }
    }

    /// Latest timestamp, or 0 for a timestampless file.
    pub fn end_ts(&self) -> i64 {
        if self.has_timestamps {
            self.end_ts
        } else {
            0
        }
    }

    /// Log-type IDs referenced by this file.
    pub(crate) fn logtype_ids(&self) -> &HashSet<DictionaryId> {
        &self.logtype_ids
    }

    /// Variable dictionary IDs referenced by this file.
    pub(crate) fn var_ids(&self) -> &HashSet<DictionaryId> {
        &self.var_ids
    }

    pub(crate) fn is_open(&self) -> bool {
        self.is_open
    }

    pub(crate) fn set_closed(&mut self) {
        self.is_open = false;
    }
}
