//! Record backend trait definition.

use async_trait::async_trait;

use snipmaster_common::{Language, Record, RecordId, Result, SyncStatus};

/// Durable storage backend for records and scalar settings.
///
/// A backend holds two containers: the record container, indexed by
/// language, last modification time and sync status, and a flat settings
/// container for process-wide scalars (last sync time, migration flag).
/// Every single-record write is atomic.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Get the backend name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Open the backend, creating containers and indexes on first use.
    ///
    /// # Postconditions
    /// - Calling again on an open backend is a no-op
    ///
    /// # Errors
    /// - `StorageUnavailable` when durable storage is absent or blocked
    async fn open(&self) -> Result<()>;

    /// Fetch one record. Absence is `Ok(None)`.
    async fn get(&self, id: &RecordId) -> Result<Option<Record>>;

    /// Insert or replace a record.
    async fn put(&self, record: &Record) -> Result<()>;

    /// Remove a record. Removing an absent id succeeds.
    async fn remove(&self, id: &RecordId) -> Result<()>;

    /// Every record, order unspecified.
    async fn all(&self) -> Result<Vec<Record>>;

    /// Records with the given language (language index).
    async fn by_language(&self, language: Language) -> Result<Vec<Record>>;

    /// Records with the given sync status (sync status index).
    async fn by_status(&self, status: SyncStatus) -> Result<Vec<Record>>;

    /// Most recently modified records first (last-modified index).
    async fn recent(&self, limit: usize) -> Result<Vec<Record>>;

    /// Read a scalar from the settings container.
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Write a scalar to the settings container.
    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
