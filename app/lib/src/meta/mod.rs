//! Embedded relational metadata stores.
//!
//! Each archive carries a `metadata.db` with one row per sealed file split
//! plus the archive's empty directories; the archive root carries a global
//! `metadata.db` registering archives and mapping original paths to the
//! archives holding their data. All writes are batched and committed at
//! segment-close boundaries.

mod archive_db;
mod global_db;

pub use archive_db::{ArchiveMetadataDb, FileFilter};
pub use global_db::{ArchiveRecord, GlobalMetadataDb};

use uuid::Uuid;

use crate::error::{LogPackError, Result};
use crate::time::TimestampPattern;

/// A point in a file where the timestamp pattern changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsPatternChange {
    /// Index of the first message using `pattern`.
    pub first_msg_ix: u64,
    /// The pattern in effect from that message on. Empty format for
    /// messages with no timestamp.
    pub pattern: TimestampPattern,
}

/// Serialises a pattern change list into the `ts_patterns` column.
pub fn serialize_ts_patterns(changes: &[TsPatternChange]) -> String {
    changes
        .iter()
        .map(|c| {
            format!(
                "{} {} {}",
                c.first_msg_ix,
                c.pattern.num_spaces_before_ts(),
                c.pattern.format()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses the `ts_patterns` column back into a change list.
pub fn parse_ts_patterns(serialized: &str) -> Result<Vec<TsPatternChange>> {
    if serialized.is_empty() {
        return Ok(Vec::new());
    }
    serialized
        .lines()
        .map(|line| {
            let mut fields = line.splitn(3, ' ');
            let first_msg_ix = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| LogPackError::corrupt("malformed ts_patterns row"))?;
            let num_spaces = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| LogPackError::corrupt("malformed ts_patterns row"))?;
            let format = fields.next().unwrap_or("");
            Ok(TsPatternChange {
                first_msg_ix,
                pattern: TimestampPattern::new(num_spaces, format),
            })
        })
        .collect()
}

/// Metadata row describing one sealed file split.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File ID, unique within its archive.
    pub id: u64,
    /// UUID of the original input file; shared by all of its splits.
    pub orig_uuid: Uuid,
    /// Original path of the input file.
    pub orig_path: String,
    /// Stable hash of `orig_path`; clusters splits within a segment.
    pub group_id: u64,
    /// Number of messages in this split.
    pub num_msgs: u64,
    /// Raw input bytes this split covers.
    pub num_uncompressed_bytes: u64,
    /// Earliest message timestamp, or 0 for a timestampless split.
    pub begin_ts: i64,
    /// Latest message timestamp, or 0 for a timestampless split.
    pub end_ts: i64,
    /// Offset of this split's timestamp column within its segment.
    pub ts_col_offset: u64,
    /// Length of the timestamp column in bytes.
    pub ts_col_len: u64,
    /// Offset of the log-type column within its segment.
    pub logtype_col_offset: u64,
    /// Length of the log-type column in bytes.
    pub logtype_col_len: u64,
    /// Offset of the variable column within its segment.
    pub var_col_offset: u64,
    /// Length of the variable column in bytes.
    pub var_col_len: u64,
    /// Segment holding this split's columns.
    pub segment_id: u64,
    /// Index of this split within its original file.
    pub split_ix: u64,
    /// Timestamp pattern change list for reconstruction.
    pub ts_patterns: Vec<TsPatternChange>,
}
