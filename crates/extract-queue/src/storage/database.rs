//! SQLite database for page checkpoints and document status
//!
//! Page resume and startup recovery both read from these tables after a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::providers::{CheckpointStore, StatusStore};
use crate::types::{DocumentKey, DocumentStatus, PageCheckpoint, StatusEntry};

/// SQLite-backed checkpoint and status store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::storage(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA temp_store=MEMORY;
        "#).map_err(|e| Error::storage(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(r#"
            -- One row per extracted page
            CREATE TABLE IF NOT EXISTS page_checkpoints (
                project_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                page INTEGER NOT NULL,
                result_json TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                PRIMARY KEY (project_id, document_id, page)
            );

            -- Durable status surfaced to the rest of the system
            CREATE TABLE IF NOT EXISTS document_status (
                project_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (project_id, document_id)
            );

            CREATE INDEX IF NOT EXISTS idx_document_status_status ON document_status(status);
        "#).map_err(|e| Error::storage(format!("Failed to create tables: {}", e)))?;

        Ok(())
    }

    // ==================== Checkpoint Operations ====================

    fn completed_pages(&self, key: &DocumentKey) -> Result<BTreeSet<u32>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT page FROM page_checkpoints WHERE project_id = ?1 AND document_id = ?2"
        ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

        let pages = stmt
            .query_map(params![key.project_id, key.document_id], |row| row.get::<_, u32>(0))
            .map_err(|e| Error::storage(format!("Failed to list pages: {}", e)))?
            .collect::<rusqlite::Result<BTreeSet<u32>>>()?;

        Ok(pages)
    }

    fn upsert_page(&self, key: &DocumentKey, page: u32, result: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock();
        let result_json = serde_json::to_string(result)?;

        conn.execute(
            r#"
            INSERT INTO page_checkpoints (project_id, document_id, page, result_json, saved_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(project_id, document_id, page) DO UPDATE SET
                result_json = excluded.result_json,
                saved_at = excluded.saved_at
            "#,
            params![
                key.project_id,
                key.document_id,
                page,
                result_json,
                Utc::now().to_rfc3339(),
            ],
        ).map_err(|e| Error::storage(format!("Failed to save page {} of {}: {}", page, key, e)))?;

        Ok(())
    }

    fn all_pages(&self, key: &DocumentKey) -> Result<Vec<PageCheckpoint>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"
            SELECT page, result_json, saved_at FROM page_checkpoints
            WHERE project_id = ?1 AND document_id = ?2
            ORDER BY page ASC
            "#
        ).map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![key.project_id, key.document_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| Error::storage(format!("Failed to load pages: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(page, result_json, saved_at)| {
                let result = serde_json::from_str(&result_json).map_err(|e| {
                    Error::corrupt_record(format!("{} page {}", key, page), e.to_string())
                })?;
                Ok(PageCheckpoint {
                    page,
                    result,
                    saved_at: parse_timestamp(&saved_at),
                })
            })
            .collect()
    }

    fn delete_pages(&self, key: &DocumentKey) -> Result<usize> {
        let conn = self.conn.lock();

        let count = conn.execute(
            "DELETE FROM page_checkpoints WHERE project_id = ?1 AND document_id = ?2",
            params![key.project_id, key.document_id],
        ).map_err(|e| Error::storage(format!("Failed to clear pages of {}: {}", key, e)))?;

        Ok(count)
    }

    // ==================== Status Operations ====================

    fn get_status(&self, key: &DocumentKey) -> Result<Option<StatusEntry>> {
        let conn = self.conn.lock();

        let row = conn.query_row(
            r#"
            SELECT project_id, document_id, status, error, updated_at FROM document_status
            WHERE project_id = ?1 AND document_id = ?2
            "#,
            params![key.project_id, key.document_id],
            row_to_raw_status,
        ).optional()
        .map_err(|e| Error::storage(format!("Failed to read status of {}: {}", key, e)))?;

        row.map(RawStatusRow::into_entry).transpose()
    }

    fn put_status(&self, key: &DocumentKey, status: DocumentStatus, error: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO document_status (project_id, document_id, status, error, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(project_id, document_id) DO UPDATE SET
                status = excluded.status,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
            params![
                key.project_id,
                key.document_id,
                status.as_str(),
                error,
                Utc::now().to_rfc3339(),
            ],
        ).map_err(|e| Error::storage(format!("Failed to write status of {}: {}", key, e)))?;

        Ok(())
    }

    fn statuses_in(&self, statuses: &[DocumentStatus]) -> Result<Vec<StatusEntry>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            r#"
            SELECT project_id, document_id, status, error, updated_at FROM document_status
            WHERE status IN ({})
            ORDER BY project_id ASC, document_id ASC
            "#,
            placeholders
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params_from_iter(statuses.iter().map(|s| s.as_str())), row_to_raw_status)
            .map_err(|e| Error::storage(format!("Failed to list statuses: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(RawStatusRow::into_entry).collect()
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get_completed_pages(&self, key: &DocumentKey) -> Result<BTreeSet<u32>> {
        self.completed_pages(key)
    }

    async fn save_page(
        &self,
        key: &DocumentKey,
        page: u32,
        result: &serde_json::Value,
    ) -> Result<()> {
        self.upsert_page(key, page, result)
    }

    async fn load_all_pages(&self, key: &DocumentKey) -> Result<Vec<PageCheckpoint>> {
        self.all_pages(key)
    }

    async fn clear_pages(&self, key: &DocumentKey) -> Result<usize> {
        self.delete_pages(key)
    }
}

#[async_trait]
impl StatusStore for SqliteStore {
    async fn read_status(&self, key: &DocumentKey) -> Result<Option<StatusEntry>> {
        self.get_status(key)
    }

    async fn write_status(
        &self,
        key: &DocumentKey,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.put_status(key, status, error)
    }

    async fn list_by_status(&self, statuses: &[DocumentStatus]) -> Result<Vec<StatusEntry>> {
        self.statuses_in(statuses)
    }
}

// ==================== Helper Functions ====================

struct RawStatusRow {
    project_id: String,
    document_id: String,
    status: String,
    error: Option<String>,
    updated_at: String,
}

impl RawStatusRow {
    fn into_entry(self) -> Result<StatusEntry> {
        let key = DocumentKey::new(self.project_id, self.document_id);
        let status = DocumentStatus::try_from(self.status.as_str())
            .map_err(|e| Error::corrupt_record(key.to_string(), e.to_string()))?;
        Ok(StatusEntry {
            key,
            status,
            error: self.error,
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

fn row_to_raw_status(row: &rusqlite::Row) -> rusqlite::Result<RawStatusRow> {
    Ok(RawStatusRow {
        project_id: row.get(0)?,
        document_id: row.get(1)?,
        status: row.get(2)?,
        error: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_upsert_and_order() {
        let db = SqliteStore::in_memory().unwrap();
        let key = DocumentKey::new("proj", "doc");

        db.upsert_page(&key, 3, &json!({"text": "c"})).unwrap();
        db.upsert_page(&key, 1, &json!({"text": "a"})).unwrap();
        db.upsert_page(&key, 3, &json!({"text": "c2"})).unwrap();

        let pages = db.all_pages(&key).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page, 1);
        assert_eq!(pages[1].result, json!({"text": "c2"}));

        let other = DocumentKey::new("proj", "other");
        assert!(db.completed_pages(&other).unwrap().is_empty());
    }

    #[test]
    fn test_clear_pages_is_scoped_to_document() {
        let db = SqliteStore::in_memory().unwrap();
        let key = DocumentKey::new("proj", "doc");
        let other = DocumentKey::new("proj", "other");

        for page in 1..=4 {
            db.upsert_page(&key, page, &json!(page)).unwrap();
        }
        db.upsert_page(&other, 1, &json!(1)).unwrap();

        assert_eq!(db.delete_pages(&key).unwrap(), 4);
        assert!(db.completed_pages(&key).unwrap().is_empty());
        assert_eq!(db.completed_pages(&other).unwrap().len(), 1);
    }

    #[test]
    fn test_status_write_read_and_list() {
        let db = SqliteStore::in_memory().unwrap();
        let a = DocumentKey::new("proj", "a");
        let b = DocumentKey::new("proj", "b");

        db.put_status(&a, DocumentStatus::Queued, None).unwrap();
        db.put_status(&a, DocumentStatus::Failed, Some("boom")).unwrap();
        db.put_status(&b, DocumentStatus::Processing, None).unwrap();

        let entry = db.get_status(&a).unwrap().unwrap();
        assert_eq!(entry.status, DocumentStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("boom"));

        let stuck = db
            .statuses_in(&[DocumentStatus::Processing, DocumentStatus::Queued])
            .unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].key, b);

        assert!(db.statuses_in(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let key = DocumentKey::new("proj", "doc");

        {
            let db = SqliteStore::new(&path).unwrap();
            db.upsert_page(&key, 1, &json!("one")).unwrap();
            db.put_status(&key, DocumentStatus::Processing, None).unwrap();
        }

        let db = SqliteStore::new(&path).unwrap();
        assert_eq!(db.completed_pages(&key).unwrap().len(), 1);
        assert_eq!(
            db.get_status(&key).unwrap().unwrap().status,
            DocumentStatus::Processing
        );
    }
}
