//! Per-archive metadata store.

use std::path::Path;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::{LogPackError, Result};
use crate::meta::{parse_ts_patterns, serialize_ts_patterns, FileMetadata};

/// Filter for file-row queries.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// Restrict to rows of one original path.
    pub orig_path: Option<String>,
    /// Restrict to rows sealed into one segment.
    pub segment_id: Option<u64>,
    /// Restrict to rows whose timestamp range intersects `[low, high]`.
    pub ts_range: Option<(i64, i64)>,
}

/// The archive's `metadata.db`: one row per sealed file split, plus empty
/// directories.
pub struct ArchiveMetadataDb {
    conn: Connection,
}

impl ArchiveMetadataDb {
    /// Opens (creating if needed) the metadata store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                 id INTEGER PRIMARY KEY,
                 orig_uuid TEXT NOT NULL,
                 orig_path TEXT NOT NULL,
                 group_id INTEGER NOT NULL,
                 num_msgs INTEGER NOT NULL,
                 num_uncompressed_bytes INTEGER NOT NULL,
                 begin_ts INTEGER NOT NULL,
                 end_ts INTEGER NOT NULL,
                 ts_col_offset INTEGER NOT NULL,
                 ts_col_len INTEGER NOT NULL,
                 logtype_col_offset INTEGER NOT NULL,
                 logtype_col_len INTEGER NOT NULL,
                 var_col_offset INTEGER NOT NULL,
                 var_col_len INTEGER NOT NULL,
                 segment_id INTEGER NOT NULL,
                 split_ix INTEGER NOT NULL,
                 ts_patterns TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS files_path ON files (orig_path);
             CREATE INDEX IF NOT EXISTS files_segment ON files (segment_id);
             CREATE TABLE IF NOT EXISTS empty_directories (
                 path TEXT PRIMARY KEY
             );",
        )?;
        Ok(Self { conn })
    }

    /// Inserts the given file rows in a single transaction.
    pub fn persist_files(&mut self, rows: &[FileMetadata]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO files (
                     id, orig_uuid, orig_path, group_id, num_msgs,
                     num_uncompressed_bytes, begin_ts, end_ts,
                     ts_col_offset, ts_col_len,
                     logtype_col_offset, logtype_col_len,
                     var_col_offset, var_col_len,
                     segment_id, split_ix, ts_patterns
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                           ?13, ?14, ?15, ?16, ?17)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.id as i64,
                    row.orig_uuid.to_string(),
                    row.orig_path,
                    row.group_id as i64,
                    row.num_msgs as i64,
                    row.num_uncompressed_bytes as i64,
                    row.begin_ts,
                    row.end_ts,
                    row.ts_col_offset as i64,
                    row.ts_col_len as i64,
                    row.logtype_col_offset as i64,
                    row.logtype_col_len as i64,
                    row.var_col_offset as i64,
                    row.var_col_len as i64,
                    row.segment_id as i64,
                    row.split_ix as i64,
                    serialize_ts_patterns(&row.ts_patterns),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Records empty directories discovered during compression.
    pub fn add_empty_directories(&mut self, paths: &[String]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO empty_directories (path) VALUES (?1)")?;
            for path in paths {
                stmt.execute(params![path])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Queries file rows, most-restrictive filters first, ordered by
    /// split index so that splits of one file concatenate in order.
    pub fn files(&self, filter: &FileFilter) -> Result<Vec<FileMetadata>> {
        let mut sql = String::from(
            "SELECT id, orig_uuid, orig_path, group_id, num_msgs,
                    num_uncompressed_bytes, begin_ts, end_ts,
                    ts_col_offset, ts_col_len,
                    logtype_col_offset, logtype_col_len,
                    var_col_offset, var_col_len,
                    segment_id, split_ix, ts_patterns
             FROM files WHERE 1=1",
        );
        let mut bindings: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(path) = &filter.orig_path {
            sql.push_str(" AND orig_path = ?");
            bindings.push(Box::new(path.clone()));
        }
        if let Some(segment_id) = filter.segment_id {
            sql.push_str(" AND segment_id = ?");
            bindings.push(Box::new(segment_id as i64));
        }
        if let Some((low, high)) = filter.ts_range {
            sql.push_str(" AND end_ts >= ? AND begin_ts <= ?");
            bindings.push(Box::new(low));
            bindings.push(Box::new(high));
        }
        sql.push_str(" ORDER BY orig_path, split_ix, id");

        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = bindings.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(&params[..], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, i64>(10)?,
                row.get::<_, i64>(11)?,
                row.get::<_, i64>(12)?,
                row.get::<_, i64>(13)?,
                row.get::<_, i64>(14)?,
                row.get::<_, i64>(15)?,
                row.get::<_, String>(16)?,
            ))
        })?;

        let mut files = Vec::new();
        for row in rows {
            let (
                id,
                orig_uuid,
                orig_path,
                group_id,
                num_msgs,
                num_uncompressed_bytes,
                begin_ts,
                end_ts,
                ts_col_offset,
                ts_col_len,
                logtype_col_offset,
                logtype_col_len,
                var_col_offset,
                var_col_len,
                segment_id,
                split_ix,
                ts_patterns,
            ) = row?;
            files.push(FileMetadata {
                id: id as u64,
                orig_uuid: Uuid::parse_str(&orig_uuid)
                    .map_err(|_| LogPackError::corrupt("malformed file UUID"))?,
                orig_path,
                group_id: group_id as u64,
                num_msgs: num_msgs as u64,
                num_uncompressed_bytes: num_uncompressed_bytes as u64,
                begin_ts,
                end_ts,
                ts_col_offset: ts_col_offset as u64,
                ts_col_len: ts_col_len as u64,
                logtype_col_offset: logtype_col_offset as u64,
                logtype_col_len: logtype_col_len as u64,
                var_col_offset: var_col_offset as u64,
                var_col_len: var_col_len as u64,
                segment_id: segment_id as u64,
                split_ix: split_ix as u64,
                ts_patterns: parse_ts_patterns(&ts_patterns)?,
            });
        }
        Ok(files)
    }

    /// Distinct segment IDs with committed rows, ascending.
    pub fn segment_ids(&self) -> Result<Vec<u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT segment_id FROM files ORDER BY segment_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(|id| id as u64).collect())
    }

    /// Recorded empty directories.
    pub fn empty_directories(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM empty_directories ORDER BY path")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(paths)
    }

    /// Closes the store. Surfaces `Busy` if statements are still live.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|_| LogPackError::Busy)
    }
}
