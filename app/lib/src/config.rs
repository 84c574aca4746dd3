//! Configuration types for archive writers and readers.

use std::path::PathBuf;

use uuid::Uuid;

/// Which streaming codec segment and dictionary streams are written with.
///
/// The passthrough variant keeps the chunked framing but stores chunks
/// uncompressed; it exists for debugging archives with standard tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Block compression at the given level.
    Zstd(i32),
    /// No compression, framing only.
    Passthrough,
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Zstd(3)
    }
}

/// Settings for opening a writer archive.
///
/// `creator_id` and `creation_num` order the archives produced by a single
/// compression run, so that files split across archives can be reassembled
/// in order.
#[derive(Debug, Clone)]
pub struct ArchiveWriterConfig {
    /// ID of the archive; becomes its directory name.
    pub archive_id: Uuid,

    /// ID of the writer creating this archive.
    pub creator_id: Uuid,

    /// Sequence number of this archive among those made by `creator_id`.
    pub creation_num: u64,

    /// Directory the archive directory is created under.
    pub output_dir: PathBuf,

    /// Path of the global metadata store the archive registers itself in.
    pub global_metadata_db_path: PathBuf,

    /// A segment is sealed once it holds at least this many uncompressed
    /// bytes.
    ///
    /// Default: 256 MiB
    pub target_segment_uncompressed_size: u64,

    /// A file is sealed as a split once its buffered streams reach this many
    /// bytes, and a new split of the same original file is opened.
    ///
    /// Default: 1 GiB
    pub file_split_threshold: u64,

    /// An in-memory file is spilled to scratch storage once its buffers
    /// exceed this many bytes.
    ///
    /// Default: 64 MiB
    pub in_memory_file_size_threshold: u64,

    /// Codec used for segment and dictionary streams.
    pub codec: Codec,
}

impl ArchiveWriterConfig {
    /// Creates a config with fresh archive and creator IDs and default
    /// thresholds. The global metadata store defaults to `metadata.db`
    /// inside `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        let global_metadata_db_path = output_dir.join(crate::archive::GLOBAL_METADATA_DB_NAME);
        Self {
            archive_id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            creation_num: 0,
            output_dir,
            global_metadata_db_path,
            target_segment_uncompressed_size: 256 * 1024 * 1024,
            file_split_threshold: 1024 * 1024 * 1024,
            in_memory_file_size_threshold: 64 * 1024 * 1024,
            codec: Codec::default(),
        }
    }

    /// Sets the target uncompressed segment size.
    pub fn with_target_segment_uncompressed_size(mut self, size: u64) -> Self {
        self.target_segment_uncompressed_size = size;
        self
    }

    /// Sets the file split threshold.
    pub fn with_file_split_threshold(mut self, size: u64) -> Self {
        self.file_split_threshold = size;
        self
    }

    /// Sets the in-memory file spill threshold.
    pub fn with_in_memory_file_size_threshold(mut self, size: u64) -> Self {
        self.in_memory_file_size_threshold = size;
        self
    }

    /// Sets the stream codec.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the creator identity used to order archives from one run.
    pub fn with_creator(mut self, creator_id: Uuid, creation_num: u64) -> Self {
        self.creator_id = creator_id;
        self.creation_num = creation_num;
        self
    }
}

/// Settings for opening a reader archive.
///
/// The stream codec is not configured here; readers take it from the
/// archive header.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Maximum number of segments the segment manager keeps open at once.
    /// Least-recently-used segments are evicted past this bound.
    ///
    /// Default: 4
    pub segment_cache_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            segment_cache_capacity: 4,
        }
    }
}

impl ReaderConfig {
    /// Sets the segment cache capacity.
    pub fn with_segment_cache_capacity(mut self, capacity: usize) -> Self {
        self.segment_cache_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_config_defaults() {
        let config = ArchiveWriterConfig::new("/tmp/archives");
        assert_eq!(config.target_segment_uncompressed_size, 256 * 1024 * 1024);
        assert_eq!(config.creation_num, 0);
        assert_ne!(config.archive_id, config.creator_id);
        assert!(config
            .global_metadata_db_path
            .to_string_lossy()
            .ends_with("metadata.db"));
    }

    #[test]
    fn test_writer_config_builders() {
        let config = ArchiveWriterConfig::new("/tmp/archives")
            .with_target_segment_uncompressed_size(1024)
            .with_file_split_threshold(4096)
            .with_codec(Codec::Passthrough);
        assert_eq!(config.target_segment_uncompressed_size, 1024);
        assert_eq!(config.file_split_threshold, 4096);
        assert_eq!(config.codec, Codec::Passthrough);
    }

    #[test]
    fn test_reader_config_capacity_floor() {
        let config = ReaderConfig::default().with_segment_cache_capacity(0);
        assert_eq!(config.segment_cache_capacity, 1);
    }
}
