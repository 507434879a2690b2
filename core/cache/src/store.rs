//! Named response caches.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use snipmaster_common::{Error, Result};

use crate::request::{CachedResponse, ResponseKind};

/// A set of named caches mapping request keys to responses.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Names of every existing cache.
    async fn cache_names(&self) -> Result<Vec<String>>;

    /// Look up `key` in one cache.
    async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>>;

    /// Look up `key` in every cache; the first hit wins.
    async fn match_any(&self, key: &str) -> Result<Option<CachedResponse>> {
        for name in self.cache_names().await? {
            if let Some(hit) = self.get(&name, key).await? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    /// Store one response, creating the cache if needed.
    async fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<()>;

    /// Store several responses as one unit: either all land or none do.
    async fn put_all(&self, cache: &str, entries: Vec<(String, CachedResponse)>) -> Result<()>;

    /// Remove a whole cache. Returns whether it existed.
    async fn delete_cache(&self, cache: &str) -> Result<bool>;
}

/// In-memory cache storage.
#[derive(Clone, Default)]
pub struct MemoryCacheStorage {
    caches: Arc<RwLock<BTreeMap<String, HashMap<String, CachedResponse>>>>,
    read_only: Arc<AtomicBool>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write, like a storage quota that has run out.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(Error::CacheWrite("cache storage is read-only".to_string()));
        }
        Ok(())
    }

    fn poisoned<T>(_: T) -> Error {
        Error::Storage("cache storage lock poisoned".to_string())
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn cache_names(&self) -> Result<Vec<String>> {
        let caches = self.caches.read().map_err(Self::poisoned)?;
        Ok(caches.keys().cloned().collect())
    }

    async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
        let caches = self.caches.read().map_err(Self::poisoned)?;
        Ok(caches.get(cache).and_then(|c| c.get(key)).cloned())
    }

    async fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<()> {
        self.check_writable()?;
        let mut caches = self.caches.write().map_err(Self::poisoned)?;
        caches
            .entry(cache.to_string())
            .or_default()
            .insert(key.to_string(), response.clone());
        Ok(())
    }

    async fn put_all(&self, cache: &str, entries: Vec<(String, CachedResponse)>) -> Result<()> {
        self.check_writable()?;
        let mut caches = self.caches.write().map_err(Self::poisoned)?;
        caches.entry(cache.to_string()).or_default().extend(entries);
        Ok(())
    }

    async fn delete_cache(&self, cache: &str) -> Result<bool> {
        self.check_writable()?;
        let mut caches = self.caches.write().map_err(Self::poisoned)?;
        Ok(caches.remove(cache).is_some())
    }
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS caches (
        name TEXT PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS cache_entries (
        cache TEXT NOT NULL REFERENCES caches(name) ON DELETE CASCADE,
        key TEXT NOT NULL,
        status INTEGER NOT NULL,
        headers TEXT NOT NULL,
        body BLOB NOT NULL,
        kind TEXT NOT NULL,
        stored_at TEXT NOT NULL,
        PRIMARY KEY (cache, key)
    );
"#;

/// SQLite-backed cache storage that survives restarts.
pub struct SqliteCacheStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStorage {
    /// Open or create the cache database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path).map_err(|e| {
                Error::StorageUnavailable(format!("{}: {}", path.display(), e))
            })?;
            Self::init(&conn)?;
            info!("Cache database opened at {}", path.display());
            Ok::<_, Error>(conn)
        })
        .await
        .map_err(|e| Error::Storage(format!("blocking task failed: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .and_then(|_| conn.execute_batch(SCHEMA))
            .map_err(|e| Error::StorageUnavailable(format!("schema setup failed: {}", e)))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Storage("cache connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::Storage(format!("blocking task failed: {}", e)))?
    }
}

fn encode_headers(headers: &HeaderMap) -> Result<String> {
    let pairs: Vec<(&str, String)> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    Ok(serde_json::to_string(&pairs)?)
}

fn decode_headers(raw: &str) -> Result<HeaderMap> {
    let pairs: Vec<(String, String)> = serde_json::from_str(raw)?;
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!("Dropping unreadable cached header {:?}", name),
        }
    }
    Ok(headers)
}

fn insert_entry(conn: &Connection, cache: &str, key: &str, response: &CachedResponse) -> Result<()> {
    let write_err = |e: rusqlite::Error| Error::CacheWrite(e.to_string());

    conn.execute("INSERT OR IGNORE INTO caches (name) VALUES (?1)", [cache])
        .map_err(write_err)?;
    conn.execute(
        r#"
        INSERT OR REPLACE INTO cache_entries
        (cache, key, status, headers, body, kind, stored_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            cache,
            key,
            response.status.as_u16(),
            encode_headers(&response.headers)?,
            response.body.as_ref(),
            response.kind.as_str(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        ],
    )
    .map_err(write_err)?;
    Ok(())
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn cache_names(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM caches ORDER BY rowid")
                .map_err(|e| Error::Storage(e.to_string()))?;
            let names = stmt
                .query_map([], |row| row.get(0))
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
                .map_err(|e| Error::Storage(e.to_string()))?;
            Ok(names)
        })
        .await
    }

    async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
        let (cache, key) = (cache.to_string(), key.to_string());
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT status, headers, body, kind FROM cache_entries WHERE cache = ?1 AND key = ?2",
                    params![cache, key],
                    |row| {
                        Ok((
                            row.get::<_, u16>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| Error::Storage(e.to_string()))?;

            let Some((status, headers, body, kind)) = row else {
                return Ok(None);
            };

            Ok(Some(CachedResponse {
                status: StatusCode::from_u16(status)
                    .map_err(|e| Error::Serialization(e.to_string()))?,
                headers: decode_headers(&headers)?,
                body: Bytes::from(body),
                kind: ResponseKind::parse(&kind).unwrap_or(ResponseKind::Basic),
            }))
        })
        .await
    }

    async fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<()> {
        let (cache, key, response) = (cache.to_string(), key.to_string(), response.clone());
        self.with_conn(move |conn| insert_entry(conn, &cache, &key, &response))
            .await
    }

    async fn put_all(&self, cache: &str, entries: Vec<(String, CachedResponse)>) -> Result<()> {
        let cache = cache.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| Error::CacheWrite(e.to_string()))?;
            for (key, response) in &entries {
                insert_entry(&tx, &cache, key, response)?;
            }
            tx.commit().map_err(|e| Error::CacheWrite(e.to_string()))?;
            debug!("Stored {} entries in {}", entries.len(), cache);
            Ok(())
        })
        .await
    }

    async fn delete_cache(&self, cache: &str) -> Result<bool> {
        let cache = cache.to_string();
        self.with_conn(move |conn| {
            let removed = conn
                .execute("DELETE FROM caches WHERE name = ?1", [&cache])
                .map_err(|e| Error::Storage(e.to_string()))?;
            Ok(removed > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    fn response(body: &'static str) -> CachedResponse {
        CachedResponse::ok(body).with_content_type("text/css")
    }

    async fn exercise(storage: &dyn CacheStorage) {
        assert!(storage.cache_names().await.unwrap().is_empty());
        assert!(storage.match_any("GET /a").await.unwrap().is_none());

        storage.put("static", "GET /a", &response("a")).await.unwrap();
        storage
            .put_all(
                "dynamic",
                vec![
                    ("GET /b".to_string(), response("b")),
                    ("GET /c".to_string(), response("c")),
                ],
            )
            .await
            .unwrap();

        let names = storage.cache_names().await.unwrap();
        assert_eq!(names.len(), 2);

        let hit = storage.get("static", "GET /a").await.unwrap().unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"a"));
        assert_eq!(hit.headers.get(CONTENT_TYPE).unwrap(), "text/css");
        assert!(storage.get("dynamic", "GET /a").await.unwrap().is_none());
        assert!(storage.match_any("GET /c").await.unwrap().is_some());

        storage.put("static", "GET /a", &response("a2")).await.unwrap();
        let hit = storage.get("static", "GET /a").await.unwrap().unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"a2"));

        assert!(storage.delete_cache("dynamic").await.unwrap());
        assert!(!storage.delete_cache("dynamic").await.unwrap());
        assert!(storage.match_any("GET /c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_storage() {
        exercise(&MemoryCacheStorage::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_storage() {
        exercise(&SqliteCacheStorage::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_sqlite_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let storage = SqliteCacheStorage::open(&path).await.unwrap();
            storage.put("static", "GET /a", &response("a")).await.unwrap();
        }

        let storage = SqliteCacheStorage::open(&path).await.unwrap();
        assert_eq!(storage.cache_names().await.unwrap(), vec!["static"]);
        assert!(storage.get("static", "GET /a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_read_only_memory_storage() {
        let storage = MemoryCacheStorage::new();
        storage.set_read_only(true);
        assert!(matches!(
            storage.put("static", "GET /a", &response("a")).await,
            Err(Error::CacheWrite(_))
        ));
        assert!(storage.cache_names().await.unwrap().is_empty());
    }
}
