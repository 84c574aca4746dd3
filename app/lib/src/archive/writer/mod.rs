//! Writer archive.
//!
//! The writer owns everything mutable: the open files, the two open
//! segments (one for files with timestamps, one for files without), both
//! dictionary writers, and the metadata stores. Files move through a fixed
//! lifecycle: created, appended to, closed, marked ready for a segment,
//! appended to a segment, and finally persisted as a metadata row when the
//! segment closes — after which the writer no longer holds them.
//!
//! Nothing in an open segment is visible to readers. Visibility is granted
//! atomically at segment close: streams are flushed and synced, dictionary
//! snapshots taken, and the segment's file rows committed in a single
//! metadata transaction.

pub mod file;
pub mod segment;

pub use file::File;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{
    append_segment_index, ArchiveHeader, LOGS_DIR_NAME, LOGTYPE_DICT_FILE_NAME,
    LOGTYPE_SEGMENT_INDEX_FILE_NAME, METADATA_DB_NAME, SEGMENTS_DIR_NAME, VAR_DICT_FILE_NAME,
    VAR_SEGMENT_INDEX_FILE_NAME,
};
use crate::config::{ArchiveWriterConfig, Codec};
use crate::dict::{DictionaryId, DictionaryWriter};
use crate::error::{LogPackError, Result};
use crate::meta::{ArchiveMetadataDb, ArchiveRecord, FileMetadata, GlobalMetadataDb};
use crate::parse::{encode_message, Message};

use segment::Segment;

/// Stable hash of an original path, used to cluster splits of one file
/// inside a segment.
pub fn group_id_for_path(path: &str) -> u64 {
    u64::from(crc32fast::hash(path.as_bytes()))
}

/// The two segment lanes a writer keeps open.
#[derive(Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Timestamped,
    Timestampless,
}

struct SegmentBuilder {
    segment: Segment,
    logtype_ids: HashSet<DictionaryId>,
    var_ids: HashSet<DictionaryId>,
    file_rows: Vec<FileMetadata>,
}

/// A writer archive.
pub struct Archive {
    header: ArchiveHeader,
    path: PathBuf,
    logs_dir: PathBuf,
    segments_dir: PathBuf,
    global_db_path: PathBuf,
    codec: Codec,
    target_segment_uncompressed_size: u64,
    file_split_threshold: u64,
    in_memory_file_size_threshold: u64,
    logtype_dict: DictionaryWriter,
    var_dict: DictionaryWriter,
    metadata_db: Option<ArchiveMetadataDb>,
    next_file_id: u64,
    files: HashMap<u64, File>,
    /// Files awaiting segment insertion, kept in their deterministic
    /// in-segment order: group ID, end timestamp, path, file identity.
    ready: BTreeMap<(u64, i64, String, Uuid, u64), u64>,
    ready_size: u64,
    next_segment_id: u64,
    segment_with_ts: Option<SegmentBuilder>,
    segment_without_ts: Option<SegmentBuilder>,
    closed: bool,
}

impl Archive {
    /// Creates the archive directory structure, opens the dictionaries and
    /// metadata stores, and registers the archive in the global registry.
    ///
    /// Fails if the archive directory already exists.
    pub fn open(config: &ArchiveWriterConfig) -> Result<Self> {
        let path = config.output_dir.join(config.archive_id.to_string());
        if path.exists() {
            return Err(LogPackError::BadInput(format!(
                "archive {} already exists",
                path.display()
            )));
        }
        fs::create_dir_all(&config.output_dir)?;
        fs::create_dir(&path)?;
        let logs_dir = path.join(LOGS_DIR_NAME);
        let segments_dir = path.join(SEGMENTS_DIR_NAME);
        fs::create_dir(&logs_dir)?;
        fs::create_dir(&segments_dir)?;

        let header = ArchiveHeader::new(
            config.archive_id,
            config.creator_id,
            config.creation_num,
            config.codec,
        );
        header.write_to(&path)?;

        let logtype_dict =
            DictionaryWriter::open(&path.join(LOGTYPE_DICT_FILE_NAME), config.codec)?;
        let var_dict = DictionaryWriter::open(&path.join(VAR_DICT_FILE_NAME), config.codec)?;
        let metadata_db = ArchiveMetadataDb::open(&path.join(METADATA_DB_NAME))?;

        let mut global_db = GlobalMetadataDb::open(&config.global_metadata_db_path)?;
        global_db.upsert_archive(&ArchiveRecord {
            id: config.archive_id,
            begin_ts: 0,
            end_ts: 0,
            creator_uuid: config.creator_id,
            creation_num: config.creation_num,
        })?;
        global_db.close()?;

        info!("opened archive {}", path.display());
        Ok(Self {
            header,
            path,
            logs_dir,
            segments_dir,
            global_db_path: config.global_metadata_db_path.clone(),
            codec: config.codec,
            target_segment_uncompressed_size: config.target_segment_uncompressed_size,
            file_split_threshold: config.file_split_threshold,
            in_memory_file_size_threshold: config.in_memory_file_size_threshold,
            logtype_dict,
            var_dict,
            metadata_db: Some(metadata_db),
            next_file_id: 0,
            files: HashMap::new(),
            ready: BTreeMap::new(),
            ready_size: 0,
            next_segment_id: 0,
            segment_with_ts: None,
            segment_without_ts: None,
            closed: false,
        })
    }

    /// Archive ID.
    pub fn id(&self) -> Uuid {
        self.header.archive_id
    }

    /// Archive directory path.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Uncompressed bytes held by the two dictionaries.
    pub fn data_size_of_dictionaries(&self) -> u64 {
        self.logtype_dict.data_size() + self.var_dict.data_size()
    }

    /// Creates a new in-memory file for `orig_path` and returns its ID.
    pub fn create_file(
        &mut self,
        orig_path: &str,
        group_id: u64,
        orig_uuid: Uuid,
        split_ix: u64,
    ) -> u64 {
        let id = self.next_file_id;
        self.next_file_id += 1;
        self.files
            .insert(id, File::new(id, orig_path, group_id, orig_uuid, split_ix));
        id
    }

    /// Encodes `message` and appends it to the given file.
    ///
    /// The file's buffers are spilled to scratch storage once they pass the
    /// in-memory threshold.
    pub fn write_msg(&mut self, file_id: u64, message: &Message) -> Result<()> {
        let content = message.content_without_timestamp();
        let (template, vars) = encode_message(&content, &mut self.var_dict)?;
        let (logtype_id, _) = self.logtype_dict.add_or_get(&template)?;

        let file = self
            .files
            .get_mut(&file_id)
            .ok_or_else(|| LogPackError::BadInput(format!("unknown file ID {}", file_id)))?;
        if !file.is_open() {
            return Err(LogPackError::BadInput(format!(
                "file ID {} is closed",
                file_id
            )));
        }
        file.append_msg(
            message.timestamp,
            message.pattern,
            logtype_id,
            &vars,
            message.num_bytes(),
        )?;

        if file.buffered_size() >= self.in_memory_file_size_threshold {
            file.spill_to_disk(&self.logs_dir)?;
        }
        Ok(())
    }

    /// True once the file's buffers have reached the split threshold and
    /// the caller should seal this split and continue in a new one.
    pub fn file_exceeds_split_threshold(&self, file_id: u64) -> bool {
        self.files
            .get(&file_id)
            .map(|f| f.buffered_size() >= self.file_split_threshold)
            .unwrap_or(false)
    }

    /// Seals the given file as a split and opens the next split of the same
    /// original file, returning the new file ID.
    pub fn split_file(&mut self, file_id: u64) -> Result<u64> {
        let (orig_path, group_id, orig_uuid, split_ix) = {
            let file = self
                .files
                .get(&file_id)
                .ok_or_else(|| LogPackError::BadInput(format!("unknown file ID {}", file_id)))?;
            (
                file.orig_path().to_string(),
                file.group_id(),
                file.orig_uuid(),
                file.split_ix(),
            )
        };
        self.close_file(file_id)?;
        self.mark_file_ready_for_segment(file_id)?;
        Ok(self.create_file(&orig_path, group_id, orig_uuid, split_ix + 1))
    }

    /// Closes a file; no further messages may be appended.
    pub fn close_file(&mut self, file_id: u64) -> Result<()> {
        self.files
            .get_mut(&file_id)
            .ok_or_else(|| LogPackError::BadInput(format!("unknown file ID {}", file_id)))?
            .set_closed();
        Ok(())
    }

    /// Spills a closed file's buffers to scratch storage, bounding memory
    /// while it waits for a segment.
    pub fn release_file(&mut self, file_id: u64) -> Result<()> {
        let logs_dir = self.logs_dir.clone();
        self.files
            .get_mut(&file_id)
            .ok_or_else(|| LogPackError::BadInput(format!("unknown file ID {}", file_id)))?
            .spill_to_disk(&logs_dir)
    }

    /// Queues a file for segment insertion.
    ///
    /// Ready files accumulate in deterministic order and are drained into
    /// the matching open segment once enough bytes are queued.
    pub fn mark_file_ready_for_segment(&mut self, file_id: u64) -> Result<()> {
        let (key, size) = {
            let file = self
                .files
                .get_mut(&file_id)
                .ok_or_else(|| LogPackError::BadInput(format!("unknown file ID {}", file_id)))?;
            file.set_closed();
            (file.sort_key(), file.buffered_size())
        };
        self.ready_size += size;
        self.ready.insert(key, file_id);

        if self.ready_size >= self.target_segment_uncompressed_size {
            self.flush_ready_files()?;
        }
        Ok(())
    }

    /// Records empty directories so decompression can recreate them.
    pub fn add_empty_directories(&mut self, paths: &[String]) -> Result<()> {
        self.metadata_db
            .as_mut()
            .ok_or(LogPackError::NotInitialised)?
            .add_empty_directories(paths)
    }

    /// Drains the ready set, in order, into the open segments, closing a
    /// segment whenever it reaches the target size.
    fn flush_ready_files(&mut self) -> Result<()> {
        let drained: Vec<u64> = std::mem::take(&mut self.ready).into_values().collect();
        self.ready_size = 0;

        for file_id in drained {
            let mut file = self
                .files
                .remove(&file_id)
                .ok_or_else(|| LogPackError::BadInput(format!("unknown file ID {}", file_id)))?;

            let kind = if file.has_timestamps() {
                SegmentKind::Timestamped
            } else {
                SegmentKind::Timestampless
            };
            self.append_file_to_segment(&mut file, kind)?;
            file.cleanup_scratch()?;

            let target = self.target_segment_uncompressed_size;
            let should_close = self
                .builder(kind)
                .as_ref()
                .map(|b| b.segment.total_uncompressed() >= target)
                .unwrap_or(false);
            if should_close {
                self.close_segment(kind)?;
            }
        }
        Ok(())
    }

    fn builder(&mut self, kind: SegmentKind) -> &mut Option<SegmentBuilder> {
        match kind {
            SegmentKind::Timestamped => &mut self.segment_with_ts,
            SegmentKind::Timestampless => &mut self.segment_without_ts,
        }
    }

    fn append_file_to_segment(&mut self, file: &mut File, kind: SegmentKind) -> Result<()> {
        if self.builder(kind).is_none() {
            let segment = Segment::open(&self.segments_dir, self.next_segment_id, self.codec)?;
            self.next_segment_id += 1;
            *self.builder(kind) = Some(SegmentBuilder {
                segment,
                logtype_ids: HashSet::new(),
                var_ids: HashSet::new(),
                file_rows: Vec::new(),
            });
        }

        // Column lengths are captured before the buffers are taken.
        let lens = file.stream_lens();
        let columns = file.take_columns()?;
        let builder = self
            .builder(kind)
            .as_mut()
            .ok_or(LogPackError::NotInitialised)?;
        let offsets = builder.segment.append_file(&columns)?;
        builder.logtype_ids.extend(file.logtype_ids().iter().copied());
        builder.var_ids.extend(file.var_ids().iter().copied());
        builder
            .file_rows
            .push(file.to_metadata(builder.segment.id(), offsets, lens));
        debug!(
            "appended file {} ({} msgs) to segment {}",
            file.orig_path(),
            file.num_msgs(),
            builder.segment.id()
        );
        Ok(())
    }

    /// Seals a segment: flushes and syncs its streams, snapshots the
    /// dictionaries and segment indexes, and commits the segment's file
    /// rows in one transaction. Only then does anything in the segment
    /// become visible to readers.
    fn close_segment(&mut self, kind: SegmentKind) -> Result<()> {
        let Some(mut builder) = self.builder(kind).take() else {
            return Ok(());
        };
        if builder.file_rows.is_empty() {
            // Nothing committed; leave no orphan directory behind.
            return builder.segment.discard();
        }

        builder.segment.close()?;
        let segment_id = builder.segment.id();

        append_segment_index(
            &self.path.join(LOGTYPE_SEGMENT_INDEX_FILE_NAME),
            segment_id,
            &builder.logtype_ids,
        )?;
        append_segment_index(
            &self.path.join(VAR_SEGMENT_INDEX_FILE_NAME),
            segment_id,
            &builder.var_ids,
        )?;
        self.logtype_dict.snapshot()?;
        self.var_dict.snapshot()?;

        self.metadata_db
            .as_mut()
            .ok_or(LogPackError::NotInitialised)?
            .persist_files(&builder.file_rows)?;

        // Update stable bookkeeping and the committed timestamp range.
        let mut paths: Vec<String> = Vec::with_capacity(builder.file_rows.len());
        for row in &builder.file_rows {
            self.header.stable_uncompressed_size += row.num_uncompressed_bytes;
            if kind == SegmentKind::Timestamped {
                self.header.expand_ts_range(row.begin_ts, row.end_ts);
            }
            paths.push(row.orig_path.clone());
        }
        self.header.stable_size += builder.segment.stored_size()?;
        self.header.write_to(&self.path)?;

        let (begin_ts, end_ts) = self.header.ts_range();
        let mut global_db = GlobalMetadataDb::open(&self.global_db_path)?;
        global_db.upsert_archive(&ArchiveRecord {
            id: self.header.archive_id,
            begin_ts,
            end_ts,
            creator_uuid: self.header.creator_id,
            creation_num: self.header.creation_num,
        })?;
        global_db.add_file_paths(self.header.archive_id, &paths)?;
        global_db.close()?;

        info!(
            "sealed segment {} with {} files",
            segment_id,
            builder.file_rows.len()
        );
        Ok(())
    }

    /// Seals everything: remaining files are marked ready, drained into
    /// segments, both segments closed, and the dictionaries finalised.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        // Any file still held is sealed with the archive. Marking can
        // trigger a drain, so re-check membership as we go.
        let mut remaining: Vec<u64> = self.files.keys().copied().collect();
        remaining.sort_unstable();
        for file_id in remaining {
            let queued = self.ready.values().any(|&id| id == file_id);
            if !queued && self.files.contains_key(&file_id) {
                self.mark_file_ready_for_segment(file_id)?;
            }
        }
        self.flush_ready_files()?;
        self.close_segment(SegmentKind::Timestamped)?;
        self.close_segment(SegmentKind::Timestampless)?;

        debug!(
            "dictionaries hold {} uncompressed bytes",
            self.data_size_of_dictionaries()
        );
        self.logtype_dict.close()?;
        self.var_dict.close()?;
        self.header.write_to(&self.path)?;
        if let Some(db) = self.metadata_db.take() {
            db.close()?;
        }

        // The scratch directory is empty once every file reached a segment.
        match fs::remove_dir(&self.logs_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove logs dir: {}", e),
        }

        self.closed = true;
        info!("closed archive {}", self.path.display());
        Ok(())
    }

    /// Deletes the archive directory and its registry row. Used when
    /// compression fails partway.
    pub fn discard(mut self) -> Result<()> {
        self.closed = true;
        fs::remove_dir_all(&self.path)?;
        let mut global_db = GlobalMetadataDb::open(&self.global_db_path)?;
        global_db.remove_archive(self.header.archive_id)?;
        global_db.close()?;
        Ok(())
    }
}

impl Drop for Archive {
    /// An archive never sealed is discarded; readers must not observe a
    /// half-written archive directory.
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "discarding unsealed archive {}",
                self.path.display()
            );
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}
