//! On-disk archive layout.
//!
//! An archive is a directory:
//!
//! ```text
//! <archive-id>/
//!   metadata            archive header (fixed-width, uncompressed)
//!   logtype.dict        log-type dictionary stream
//!   var.dict            variable dictionary stream
//!   logtype.segindex    segment ID -> log-type ID set (uncompressed)
//!   var.segindex        segment ID -> variable ID set (uncompressed)
//!   logs/               scratch buffers for spilled files (writer only)
//!   segments/<id>/      one directory per segment with files ts,
//!                       logtype, var; each a framed compressed stream
//!   metadata.db         per-archive relational metadata
//! ```
//!
//! The archive-root directory holds one such directory per archive plus a
//! global `metadata.db`.

pub mod reader;
pub mod writer;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use uuid::Uuid;

use crate::config::Codec;
use crate::error::{LogPackError, Result};

/// Magic bytes opening the archive header.
pub const MAGIC: [u8; 4] = *b"LPAK";
/// Archive format version.
pub const FORMAT_VERSION: u16 = 1;

/// Archive header file name.
pub const METADATA_FILE_NAME: &str = "metadata";
/// Log-type dictionary file name.
pub const LOGTYPE_DICT_FILE_NAME: &str = "logtype.dict";
/// Variable dictionary file name.
pub const VAR_DICT_FILE_NAME: &str = "var.dict";
/// Log-type segment index file name.
pub const LOGTYPE_SEGMENT_INDEX_FILE_NAME: &str = "logtype.segindex";
/// Variable segment index file name.
pub const VAR_SEGMENT_INDEX_FILE_NAME: &str = "var.segindex";
/// Scratch directory for spilled files.
pub const LOGS_DIR_NAME: &str = "logs";
/// Segments directory name.
pub const SEGMENTS_DIR_NAME: &str = "segments";
/// Per-archive metadata store file name.
pub const METADATA_DB_NAME: &str = "metadata.db";
/// Global metadata store file name (in the archive root).
pub const GLOBAL_METADATA_DB_NAME: &str = "metadata.db";

/// Names of the three column files inside a segment directory.
pub const SEGMENT_COLUMN_FILE_NAMES: [&str; 3] = ["ts", "logtype", "var"];

const HEADER_LEN: usize = 80;

/// The archive header: identity, ordering, and stable-size bookkeeping.
///
/// Rewritten in full at every segment close; the file is small enough that
/// the rewrite is atomic in practice and self-describing on recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Archive ID.
    pub archive_id: Uuid,
    /// Writer that created the archive.
    pub creator_id: Uuid,
    /// Sequence number among the creator's archives.
    pub creation_num: u64,
    /// Codec the archive's streams are written with; readers take it from
    /// here.
    pub codec: Codec,
    /// Earliest committed message timestamp (`i64::MAX` when none).
    pub begin_ts: i64,
    /// Latest committed message timestamp (`i64::MIN` when none).
    pub end_ts: i64,
    /// Uncompressed bytes sealed into segments so far.
    pub stable_uncompressed_size: u64,
    /// On-disk bytes of sealed segments and dictionary snapshots.
    pub stable_size: u64,
}

impl ArchiveHeader {
    /// Creates a header for an empty archive.
    pub fn new(archive_id: Uuid, creator_id: Uuid, creation_num: u64, codec: Codec) -> Self {
        Self {
            archive_id,
            creator_id,
            creation_num,
            codec,
            begin_ts: i64::MAX,
            end_ts: i64::MIN,
            stable_uncompressed_size: 0,
            stable_size: 0,
        }
    }

    /// Widens the committed timestamp range to include `ts`.
    pub fn expand_ts_range(&mut self, begin_ts: i64, end_ts: i64) {
        self.begin_ts = self.begin_ts.min(begin_ts);
        self.end_ts = self.end_ts.max(end_ts);
    }

    /// Timestamp range normalised for consumers: `(0, 0)` when the archive
    /// holds no timestamped messages.
    pub fn ts_range(&self) -> (i64, i64) {
        if self.begin_ts > self.end_ts {
            (0, 0)
        } else {
            (self.begin_ts, self.end_ts)
        }
    }

    /// Writes the header file under `archive_dir`.
    pub fn write_to(&self, archive_dir: &Path) -> Result<()> {
        let mut buf = [0u8; HEADER_LEN];
        buf[..4].copy_from_slice(&MAGIC);
        LittleEndian::write_u16(&mut buf[4..6], FORMAT_VERSION);
        match self.codec {
            Codec::Zstd(level) => {
                buf[6] = 0;
                buf[7] = level.clamp(0, i32::from(i8::MAX)) as u8;
            }
            Codec::Passthrough => buf[6] = 1,
        }
        buf[8..24].copy_from_slice(self.archive_id.as_bytes());
        buf[24..40].copy_from_slice(self.creator_id.as_bytes());
        LittleEndian::write_u64(&mut buf[40..48], self.creation_num);
        LittleEndian::write_i64(&mut buf[48..56], self.begin_ts);
        LittleEndian::write_i64(&mut buf[56..64], self.end_ts);
        LittleEndian::write_u64(&mut buf[64..72], self.stable_uncompressed_size);
        LittleEndian::write_u64(&mut buf[72..80], self.stable_size);

        let path = archive_dir.join(METADATA_FILE_NAME);
        let mut file = fs::File::create(path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads and validates the header file under `archive_dir`.
    pub fn read_from(archive_dir: &Path) -> Result<Self> {
        let path = archive_dir.join(METADATA_FILE_NAME);
        let mut buf = [0u8; HEADER_LEN];
        let mut file = fs::File::open(path)?;
        file.read_exact(&mut buf)
            .map_err(|_| LogPackError::corrupt("archive header truncated"))?;

        if buf[..4] != MAGIC {
            return Err(LogPackError::corrupt("bad archive magic"));
        }
        let version = LittleEndian::read_u16(&buf[4..6]);
        if version != FORMAT_VERSION {
            return Err(LogPackError::unsupported(format!(
                "archive format version {}",
                version
            )));
        }
        let codec = match buf[6] {
            0 => Codec::Zstd(i32::from(buf[7])),
            1 => Codec::Passthrough,
            other => {
                return Err(LogPackError::unsupported(format!(
                    "codec kind {}",
                    other
                )));
            }
        };
        let mut archive_id = [0u8; 16];
        archive_id.copy_from_slice(&buf[8..24]);
        let mut creator_id = [0u8; 16];
        creator_id.copy_from_slice(&buf[24..40]);
        Ok(Self {
            archive_id: Uuid::from_bytes(archive_id),
            creator_id: Uuid::from_bytes(creator_id),
            creation_num: LittleEndian::read_u64(&buf[40..48]),
            codec,
            begin_ts: LittleEndian::read_i64(&buf[48..56]),
            end_ts: LittleEndian::read_i64(&buf[56..64]),
            stable_uncompressed_size: LittleEndian::read_u64(&buf[64..72]),
            stable_size: LittleEndian::read_u64(&buf[72..80]),
        })
    }
}

/// Appends one segment's dictionary-ID set to a segment index file.
///
/// Packed form: `segment_id: u64, count: u64, ids: u64 * count`, appended
/// at each segment close.
pub fn append_segment_index(path: &Path, segment_id: u64, ids: &HashSet<u64>) -> Result<()> {
    let mut sorted: Vec<u64> = ids.iter().copied().collect();
    sorted.sort_unstable();

    let mut buf = Vec::with_capacity(16 + sorted.len() * 8);
    let mut scratch = [0u8; 8];
    LittleEndian::write_u64(&mut scratch, segment_id);
    buf.extend_from_slice(&scratch);
    LittleEndian::write_u64(&mut scratch, sorted.len() as u64);
    buf.extend_from_slice(&scratch);
    for id in sorted {
        LittleEndian::write_u64(&mut scratch, id);
        buf.extend_from_slice(&scratch);
    }

    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    Ok(())
}

/// Loads a segment index file into a map of segment ID to ID set.
///
/// A trailing partial record (from an interrupted writer) is ignored.
pub fn load_segment_index(path: &Path) -> Result<HashMap<u64, HashSet<u64>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };

    let mut index = HashMap::new();
    let mut pos = 0;
    while pos + 16 <= bytes.len() {
        let segment_id = LittleEndian::read_u64(&bytes[pos..pos + 8]);
        let count = LittleEndian::read_u64(&bytes[pos + 8..pos + 16]) as usize;
        let end = pos + 16 + count * 8;
        if end > bytes.len() {
            break;
        }
        let ids = bytes[pos + 16..end]
            .chunks_exact(8)
            .map(LittleEndian::read_u64)
            .collect();
        index.insert(segment_id, ids);
        pos = end;
    }
    Ok(index)
}
