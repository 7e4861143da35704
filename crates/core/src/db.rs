use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::Result;
use crate::models::{FileId, Platform};
use crate::payload::SaveSet;
use crate::reconcile::{self, IdAllocator, StoredFile, StoredSet};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Server-side storage of screenshot sets, keyed by project and test.
pub struct SqliteScreenshotStore {
    conn: Connection,
}

impl SqliteScreenshotStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS screenshot_sets (
              id INTEGER PRIMARY KEY NOT NULL,
              project_id TEXT NOT NULL,
              test_id TEXT NOT NULL,
              position INTEGER NOT NULL,
              name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS screenshot_files (
              id INTEGER PRIMARY KEY NOT NULL,
              set_id INTEGER NOT NULL REFERENCES screenshot_sets(id) ON DELETE CASCADE,
              platform TEXT NOT NULL,
              content_type TEXT NOT NULL,
              data BLOB NOT NULL,
              UNIQUE(set_id, platform)
            );

            CREATE INDEX IF NOT EXISTS idx_sets_test ON screenshot_sets(project_id, test_id);
            "#,
        )?;
        Ok(())
    }

    pub fn load_sets(&self, project_id: &str, test_id: &str) -> Result<Vec<StoredSet>> {
        load_sets(&self.conn, project_id, test_id)
    }

    /// Applies a save request for one test and returns the stored result.
    pub fn apply_save(
        &mut self,
        project_id: &str,
        test_id: &str,
        request: &[SaveSet],
        parts: &[Vec<u8>],
    ) -> Result<Vec<StoredSet>> {
        // Ids come from MAX(id), so they must be read under the write lock.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = load_sets(&tx, project_id, test_id)?;
        let mut ids = next_ids(&tx)?;
        let sets = reconcile::reconcile(&existing, request, parts, &mut ids)?;

        tx.execute(
            "DELETE FROM screenshot_sets WHERE project_id = ?1 AND test_id = ?2",
            params![project_id, test_id],
        )?;
        for (position, set) in sets.iter().enumerate() {
            tx.execute(
                r#"
                INSERT INTO screenshot_sets (id, project_id, test_id, position, name)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![set.id as i64, project_id, test_id, position as i64, set.name],
            )?;
            for (platform, file) in &set.files {
                tx.execute(
                    r#"
                    INSERT INTO screenshot_files (id, set_id, platform, content_type, data)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        file.id as i64,
                        set.id as i64,
                        platform.as_str(),
                        file.content_type,
                        file.data
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(sets)
    }

    /// Stored bytes of one file, provided it belongs to the given test.
    pub fn file_image(
        &self,
        project_id: &str,
        test_id: &str,
        file_id: FileId,
    ) -> Result<Option<(String, Vec<u8>)>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT f.content_type, f.data
                FROM screenshot_files f
                JOIN screenshot_sets s ON s.id = f.set_id
                WHERE f.id = ?1 AND s.project_id = ?2 AND s.test_id = ?3
                "#,
                params![file_id as i64, project_id, test_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }
}

fn load_sets(conn: &Connection, project_id: &str, test_id: &str) -> Result<Vec<StoredSet>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, name FROM screenshot_sets
        WHERE project_id = ?1 AND test_id = ?2
        ORDER BY position
        "#,
    )?;
    let heads = stmt
        .query_map(params![project_id, test_id], |r| {
            let id: i64 = r.get(0)?;
            let name: String = r.get(1)?;
            Ok((id, name))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut files_stmt = conn.prepare(
        r#"
        SELECT id, platform, content_type, data FROM screenshot_files
        WHERE set_id = ?1
        "#,
    )?;
    let mut sets = Vec::with_capacity(heads.len());
    for (id, name) in heads {
        let files = files_stmt
            .query_map(params![id], |r| {
                let file_id: i64 = r.get(0)?;
                let platform: String = r.get(1)?;
                Ok((
                    Platform::new(platform),
                    StoredFile {
                        id: file_id as u64,
                        content_type: r.get(2)?,
                        data: r.get(3)?,
                    },
                ))
            })?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
        sets.push(StoredSet {
            id: id as u64,
            name,
            files,
        });
    }
    Ok(sets)
}

fn next_ids(conn: &Connection) -> Result<IdAllocator> {
    let next_set: i64 = conn.query_row(
        "SELECT COALESCE(MAX(id), -1) + 1 FROM screenshot_sets",
        [],
        |r| r.get(0),
    )?;
    let next_file: i64 = conn.query_row(
        "SELECT COALESCE(MAX(id), -1) + 1 FROM screenshot_files",
        [],
        |r| r.get(0),
    )?;
    Ok(IdAllocator::new(next_set.max(0) as u64, next_file.max(0) as u64))
}
