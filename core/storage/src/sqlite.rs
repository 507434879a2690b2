//! SQLite-based record backend.
//!
//! Persists records and settings in a single database file. The connection
//! is shared behind a mutex and every statement runs on the blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use snipmaster_common::{Error, Language, Record, RecordId, Result, SyncStatus};
use crate::backend::RecordBackend;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        code TEXT NOT NULL,
        language TEXT NOT NULL,
        category TEXT NOT NULL,
        created TEXT NOT NULL,
        last_modified TEXT NOT NULL,
        sync_status TEXT NOT NULL,
        sync_failures INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_records_language ON records(language);
    CREATE INDEX IF NOT EXISTS idx_records_last_modified ON records(last_modified);
    CREATE INDEX IF NOT EXISTS idx_records_sync_status ON records(sync_status);

    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

const SELECT_COLUMNS: &str =
    "SELECT id, code, language, category, created, last_modified, sync_status, sync_failures FROM records";

/// SQLite record backend.
pub struct SqliteBackend {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteBackend {
    /// Backend for the database file at `path`. Nothing is touched until `open`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Storage("sqlite connection lock poisoned".to_string()))?;
            let conn = guard
                .as_ref()
                .ok_or_else(|| Error::StorageUnavailable("database not opened".to_string()))?;
            f(conn).map_err(|e| Error::Storage(e.to_string()))
        })
        .await
        .map_err(|e| Error::Storage(format!("blocking task failed: {}", e)))?
    }

    async fn query_records(
        &self,
        sql: String,
        param: Option<String>,
    ) -> Result<Vec<Record>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = match param {
                Some(p) => stmt.query_map([p], row_to_record)?,
                None => stmt.query_map([], row_to_record)?,
            };
            rows.collect()
        })
        .await
    }
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Record> {
    let id: String = row.get(0)?;
    let status: String = row.get(6)?;
    let failures: i64 = row.get(7)?;

    Ok(Record {
        id: RecordId::new(id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        code: row.get(1)?,
        language: Language::from(row.get::<_, String>(2)?),
        category: row.get(3)?,
        created: parse_time(4, row.get(4)?)?,
        last_modified: parse_time(5, row.get(5)?)?,
        sync_status: status
            .parse::<SyncStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
        sync_failures: u32::try_from(failures).unwrap_or(u32::MAX),
    })
}

#[async_trait]
impl RecordBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn open(&self) -> Result<()> {
        let path = self.path.clone();
        let slot = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| Error::Storage("sqlite connection lock poisoned".to_string()))?;
            if guard.is_some() {
                return Ok(());
            }

            let conn = Connection::open(&path).map_err(|e| {
                Error::StorageUnavailable(format!("{}: {}", path.display(), e))
            })?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| Error::StorageUnavailable(format!("schema setup failed: {}", e)))?;

            info!("Record database opened at {}", path.display());
            *guard = Some(conn);
            Ok(())
        })
        .await
        .map_err(|e| Error::Storage(format!("blocking task failed: {}", e)))?
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let id = id.as_str().to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                [id],
                row_to_record,
            )
            .optional()
        })
        .await
    }

    async fn put(&self, record: &Record) -> Result<()> {
        debug!("Upserting record: {}", record.id);
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO records
                (id, code, language, category, created, last_modified, sync_status, sync_failures)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    record.id.as_str(),
                    record.code,
                    record.language.as_str(),
                    record.category,
                    format_time(&record.created),
                    format_time(&record.last_modified),
                    record.sync_status.as_str(),
                    record.sync_failures as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, id: &RecordId) -> Result<()> {
        debug!("Deleting record: {}", id);
        let id = id.as_str().to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM records WHERE id = ?1", [id])?;
            Ok(())
        })
        .await
    }

    async fn all(&self) -> Result<Vec<Record>> {
        self.query_records(SELECT_COLUMNS.to_string(), None).await
    }

    async fn by_language(&self, language: Language) -> Result<Vec<Record>> {
        self.query_records(
            format!("{} WHERE language = ?1", SELECT_COLUMNS),
            Some(language.as_str().to_string()),
        )
        .await
    }

    async fn by_status(&self, status: SyncStatus) -> Result<Vec<Record>> {
        self.query_records(
            format!("{} WHERE sync_status = ?1", SELECT_COLUMNS),
            Some(status.as_str().to_string()),
        )
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Record>> {
        self.query_records(
            format!(
                "{} ORDER BY last_modified DESC LIMIT {}",
                SELECT_COLUMNS, limit
            ),
            None,
        )
        .await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
        })
        .await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipmaster_common::DEFAULT_CATEGORY;

    fn record(id: &str, language: Language) -> Record {
        let now = Utc::now();
        Record {
            id: RecordId::new(id).unwrap(),
            code: "SELECT 1;".to_string(),
            language,
            category: DEFAULT_CATEGORY.to_string(),
            created: now,
            last_modified: now,
            sync_status: SyncStatus::Pending,
            sync_failures: 2,
        }
    }

    #[tokio::test]
    async fn test_record_operations() {
        let backend = SqliteBackend::in_memory();
        backend.open().await.unwrap();

        let rec = record("1", Language::Sql);
        backend.put(&rec).await.unwrap();

        let loaded = backend.get(&rec.id).await.unwrap().unwrap();
        assert_eq!(loaded, rec);

        backend.remove(&rec.id).await.unwrap();
        assert!(backend.get(&rec.id).await.unwrap().is_none());
        // Removing again is fine.
        backend.remove(&rec.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_index_queries() {
        let backend = SqliteBackend::in_memory();
        backend.open().await.unwrap();

        backend.put(&record("1", Language::Sql)).await.unwrap();
        let mut synced = record("2", Language::Css);
        synced.sync_status = SyncStatus::Synced;
        backend.put(&synced).await.unwrap();

        assert_eq!(backend.by_language(Language::Sql).await.unwrap().len(), 1);
        assert_eq!(backend.by_status(SyncStatus::Pending).await.unwrap().len(), 1);
        assert_eq!(backend.by_status(SyncStatus::Synced).await.unwrap()[0].id.as_str(), "2");
        assert_eq!(backend.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snippets.db");

        {
            let backend = SqliteBackend::new(&path);
            backend.open().await.unwrap();
            backend.put(&record("7", Language::Bash)).await.unwrap();
            backend.set_setting("last_sync_time", "x").await.unwrap();
        }

        let backend = SqliteBackend::new(&path);
        backend.open().await.unwrap();
        assert!(backend.get(&RecordId::new("7").unwrap()).await.unwrap().is_some());
        assert_eq!(
            backend.get_setting("last_sync_time").await.unwrap().as_deref(),
            Some("x")
        );
    }

    #[tokio::test]
    async fn test_unopenable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::new(dir.path().join("missing").join("nested.db"));
        assert!(matches!(
            backend.open().await,
            Err(Error::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_not_opened() {
        let backend = SqliteBackend::in_memory();
        assert!(matches!(
            backend.all().await,
            Err(Error::StorageUnavailable(_))
        ));
    }
}
