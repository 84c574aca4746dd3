//! Across-archive metadata registry.

use std::path::Path;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::{LogPackError, Result};

/// Registry row for one archive.
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    /// Archive ID (its directory name).
    pub id: Uuid,
    /// Earliest message timestamp in the archive.
    pub begin_ts: i64,
    /// Latest message timestamp in the archive.
    pub end_ts: i64,
    /// Writer that created the archive.
    pub creator_uuid: Uuid,
    /// Sequence number among that writer's archives.
    pub creation_num: u64,
}

/// The archive root's global `metadata.db`.
///
/// Used by the decompressor to find which archives hold data for a path,
/// and by any consumer to enumerate archives in creation order. Opened per
/// operation; the embedded store's file locking serialises concurrent
/// writers.
pub struct GlobalMetadataDb {
    conn: Connection,
}

impl GlobalMetadataDb {
    /// Opens (creating if needed) the global registry at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS archives (
                 id TEXT PRIMARY KEY,
                 begin_ts INTEGER NOT NULL,
                 end_ts INTEGER NOT NULL,
                 creator_uuid TEXT NOT NULL,
                 creation_num INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS file_paths (
                 orig_path TEXT NOT NULL,
                 archive_id TEXT NOT NULL,
                 UNIQUE (orig_path, archive_id)
             );
             CREATE INDEX IF NOT EXISTS file_paths_path ON file_paths (orig_path);",
        )?;
        Ok(Self { conn })
    }

    /// Inserts or updates an archive's registry row.
    pub fn upsert_archive(&mut self, record: &ArchiveRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO archives
                 (id, begin_ts, end_ts, creator_uuid, creation_num)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                record.begin_ts,
                record.end_ts,
                record.creator_uuid.to_string(),
                record.creation_num as i64,
            ],
        )?;
        Ok(())
    }

    /// Records that `archive_id` holds data for the given original paths.
    pub fn add_file_paths(&mut self, archive_id: Uuid, paths: &[String]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO file_paths (orig_path, archive_id) VALUES (?1, ?2)",
            )?;
            let archive_id = archive_id.to_string();
            for path in paths {
                stmt.execute(params![path, archive_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Removes an archive and its path mappings from the registry.
    pub fn remove_archive(&mut self, archive_id: Uuid) -> Result<()> {
        let id = archive_id.to_string();
        self.conn
            .execute("DELETE FROM file_paths WHERE archive_id = ?1", params![id])?;
        self.conn
            .execute("DELETE FROM archives WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// All archive IDs in `(creator_uuid, creation_num)` order, which is
    /// the order splits of one file must be concatenated in.
    pub fn archive_ids(&self) -> Result<Vec<Uuid>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM archives ORDER BY creator_uuid, creation_num")?;
        self.collect_ids(&mut stmt, [])
    }

    /// Archive IDs holding data for `orig_path`, in creation order.
    pub fn archive_ids_for_path(&self, orig_path: &str) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id FROM archives a
             JOIN file_paths p ON p.archive_id = a.id
             WHERE p.orig_path = ?1
             ORDER BY a.creator_uuid, a.creation_num",
        )?;
        self.collect_ids(&mut stmt, params![orig_path])
    }

    fn collect_ids<P: rusqlite::Params>(
        &self,
        stmt: &mut rusqlite::Statement<'_>,
        bindings: P,
    ) -> Result<Vec<Uuid>> {
        let ids = stmt
            .query_map(bindings, |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids.into_iter()
            .map(|id| {
                Uuid::parse_str(&id).map_err(|_| LogPackError::corrupt("malformed archive ID"))
            })
            .collect()
    }

    /// Closes the registry. Surfaces `Busy` if statements are still live.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|_| LogPackError::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_archive_ordering_follows_creator_and_creation_num() {
        let dir = TempDir::new().unwrap();
        let mut db = GlobalMetadataDb::open(&dir.path().join("metadata.db")).unwrap();

        let creator = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        // Inserted out of order on purpose.
        db.upsert_archive(&ArchiveRecord {
            id: second,
            begin_ts: 0,
            end_ts: 0,
            creator_uuid: creator,
            creation_num: 1,
        })
        .unwrap();
        db.upsert_archive(&ArchiveRecord {
            id: first,
            begin_ts: 0,
            end_ts: 0,
            creator_uuid: creator,
            creation_num: 0,
        })
        .unwrap();

        assert_eq!(db.archive_ids().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_path_lookup() {
        let dir = TempDir::new().unwrap();
        let mut db = GlobalMetadataDb::open(&dir.path().join("metadata.db")).unwrap();

        let creator = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for (id, n) in [(a, 0), (b, 1)] {
            db.upsert_archive(&ArchiveRecord {
                id,
                begin_ts: 0,
                end_ts: 0,
                creator_uuid: creator,
                creation_num: n,
            })
            .unwrap();
        }
        db.add_file_paths(a, &["/var/log/x".to_string()]).unwrap();
        db.add_file_paths(b, &["/var/log/x".to_string(), "/var/log/y".to_string()])
            .unwrap();

        assert_eq!(db.archive_ids_for_path("/var/log/x").unwrap(), vec![a, b]);
        assert_eq!(db.archive_ids_for_path("/var/log/y").unwrap(), vec![b]);
        assert!(db.archive_ids_for_path("/absent").unwrap().is_empty());
        db.close().unwrap();
    }
}
