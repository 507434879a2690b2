//! In-memory record backend for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use snipmaster_common::{Error, Language, Record, RecordId, Result, SyncStatus};
use crate::backend::RecordBackend;

/// Record container plus its secondary indexes.
#[derive(Debug, Default)]
struct Containers {
    records: BTreeMap<RecordId, Record>,
    by_language: HashMap<Language, BTreeSet<RecordId>>,
    by_status: HashMap<SyncStatus, BTreeSet<RecordId>>,
    by_modified: BTreeSet<(DateTime<Utc>, RecordId)>,
    settings: HashMap<String, String>,
}

impl Containers {
    fn unindex(&mut self, record: &Record) {
        if let Some(ids) = self.by_language.get_mut(&record.language) {
            ids.remove(&record.id);
        }
        if let Some(ids) = self.by_status.get_mut(&record.sync_status) {
            ids.remove(&record.id);
        }
        self.by_modified
            .remove(&(record.last_modified, record.id.clone()));
    }

    fn index(&mut self, record: &Record) {
        self.by_language
            .entry(record.language)
            .or_default()
            .insert(record.id.clone());
        self.by_status
            .entry(record.sync_status)
            .or_default()
            .insert(record.id.clone());
        self.by_modified
            .insert((record.last_modified, record.id.clone()));
    }

    fn collect<'a>(&self, ids: impl Iterator<Item = &'a RecordId>) -> Vec<Record> {
        ids.filter_map(|id| self.records.get(id).cloned()).collect()
    }
}

/// In-memory record backend.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same containers, which lets tests
/// open two stores over one "database".
#[derive(Clone)]
pub struct MemoryBackend {
    containers: Arc<RwLock<Option<Containers>>>,
    blocked: bool,
    failing: Arc<AtomicBool>,
}

impl MemoryBackend {
    /// Create a new, not yet opened, memory backend.
    pub fn new() -> Self {
        Self {
            containers: Arc::new(RwLock::new(None)),
            blocked: false,
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A backend whose `open` always fails, like storage disabled by a
    /// private browsing mode.
    pub fn blocked() -> Self {
        Self {
            blocked: true,
            ..Self::new()
        }
    }

    /// Make every operation after `open` fail with a storage error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn read<T>(&self, f: impl FnOnce(&Containers) -> T) -> Result<T> {
        self.check_failing()?;
        let guard = self
            .containers
            .read()
            .map_err(|_| Error::Storage("memory backend lock poisoned".to_string()))?;
        let containers = guard
            .as_ref()
            .ok_or_else(|| Error::StorageUnavailable("memory backend not opened".to_string()))?;
        Ok(f(containers))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Containers) -> T) -> Result<T> {
        self.check_failing()?;
        let mut guard = self
            .containers
            .write()
            .map_err(|_| Error::Storage("memory backend lock poisoned".to_string()))?;
        let containers = guard
            .as_mut()
            .ok_or_else(|| Error::StorageUnavailable("memory backend not opened".to_string()))?;
        Ok(f(containers))
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Storage("injected storage failure".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self) -> Result<()> {
        if self.blocked {
            return Err(Error::StorageUnavailable(
                "memory backend is blocked".to_string(),
            ));
        }

        let mut guard = self
            .containers
            .write()
            .map_err(|_| Error::Storage("memory backend lock poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(Containers::default());
        }
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        self.read(|c| c.records.get(id).cloned())
    }

    async fn put(&self, record: &Record) -> Result<()> {
        self.write(|c| {
            if let Some(previous) = c.records.remove(&record.id) {
                c.unindex(&previous);
            }
            c.index(record);
            c.records.insert(record.id.clone(), record.clone());
        })
    }

    async fn remove(&self, id: &RecordId) -> Result<()> {
        self.write(|c| {
            if let Some(previous) = c.records.remove(id) {
                c.unindex(&previous);
            }
        })
    }

    async fn all(&self) -> Result<Vec<Record>> {
        self.read(|c| c.records.values().cloned().collect())
    }

    async fn by_language(&self, language: Language) -> Result<Vec<Record>> {
        self.read(|c| match c.by_language.get(&language) {
            Some(ids) => c.collect(ids.iter()),
            None => Vec::new(),
        })
    }

    async fn by_status(&self, status: SyncStatus) -> Result<Vec<Record>> {
        self.read(|c| match c.by_status.get(&status) {
            Some(ids) => c.collect(ids.iter()),
            None => Vec::new(),
        })
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Record>> {
        self.read(|c| c.collect(c.by_modified.iter().rev().take(limit).map(|(_, id)| id)))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.read(|c| c.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.write(|c| {
            c.settings.insert(key.to_string(), value.to_string());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipmaster_common::DEFAULT_CATEGORY;

    fn record(id: &str, language: Language, status: SyncStatus) -> Record {
        let now = Utc::now();
        Record {
            id: RecordId::new(id).unwrap(),
            code: format!("// {}", id),
            language,
            category: DEFAULT_CATEGORY.to_string(),
            created: now,
            last_modified: now,
            sync_status: status,
            sync_failures: 0,
        }
    }

    #[tokio::test]
    async fn test_operations_before_open_fail() {
        let backend = MemoryBackend::new();
        let err = backend.all().await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_blocked_backend() {
        let backend = MemoryBackend::blocked();
        assert!(matches!(
            backend.open().await,
            Err(Error::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.open().await.unwrap();
        backend
            .put(&record("1", Language::Css, SyncStatus::Pending))
            .await
            .unwrap();
        backend.open().await.unwrap();
        assert_eq!(backend.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_indexes_follow_updates() {
        let backend = MemoryBackend::new();
        backend.open().await.unwrap();

        let mut rec = record("1", Language::Python, SyncStatus::Pending);
        backend.put(&rec).await.unwrap();
        assert_eq!(backend.by_status(SyncStatus::Pending).await.unwrap().len(), 1);

        rec.sync_status = SyncStatus::Synced;
        rec.language = Language::Ruby;
        backend.put(&rec).await.unwrap();

        assert!(backend.by_status(SyncStatus::Pending).await.unwrap().is_empty());
        assert_eq!(backend.by_status(SyncStatus::Synced).await.unwrap().len(), 1);
        assert!(backend.by_language(Language::Python).await.unwrap().is_empty());
        assert_eq!(backend.by_language(Language::Ruby).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recent_orders_by_last_modified() {
        let backend = MemoryBackend::new();
        backend.open().await.unwrap();

        let older = record("a", Language::C, SyncStatus::Pending);
        let mut newer = record("b", Language::C, SyncStatus::Pending);
        newer.last_modified = newer.created + chrono::Duration::seconds(10);
        backend.put(&older).await.unwrap();
        backend.put(&newer).await.unwrap();

        let recent = backend.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id.as_str(), "b");
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let backend = MemoryBackend::new();
        backend.open().await.unwrap();
        backend.set_failing(true);
        assert!(matches!(backend.all().await, Err(Error::Storage(_))));
        backend.set_failing(false);
        assert!(backend.all().await.is_ok());
    }

    #[tokio::test]
    async fn test_settings() {
        let backend = MemoryBackend::new();
        backend.open().await.unwrap();
        assert!(backend.get_setting("k").await.unwrap().is_none());
        backend.set_setting("k", "v").await.unwrap();
        assert_eq!(backend.get_setting("k").await.unwrap().as_deref(), Some("v"));
    }
}
