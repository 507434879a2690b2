//! Record store: the single source of truth for snippets and their sync state.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use snipmaster_common::{
    Language, Record, RecordDraft, RecordId, Result, SyncStatus, DEFAULT_CATEGORY,
};

use crate::backend::RecordBackend;
use crate::broadcast::{LastSyncNotice, SyncBroadcast};

/// Settings key holding the last successful sync time.
pub const LAST_SYNC_KEY: &str = "last_sync_time";
/// Settings key touched on every sync so other instances notice it.
pub const SYNC_EVENT_KEY: &str = "sync_event";

/// Durable record storage with sync-state tracking.
///
/// All mutations go through `save`, `delete` and the acknowledgement
/// helpers. Read-modify-write sequences are serialized by an internal lock so
/// each of them applies to a single record atomically.
pub struct RecordStore {
    backend: Arc<dyn RecordBackend>,
    broadcast: SyncBroadcast,
    instance_id: Uuid,
    write_lock: Mutex<()>,
}

impl RecordStore {
    /// Open a store over `backend` with a private broadcast channel.
    ///
    /// # Errors
    /// - `StorageUnavailable` if the backend cannot be opened
    pub async fn open(backend: Arc<dyn RecordBackend>) -> Result<Self> {
        Self::open_with_broadcast(backend, SyncBroadcast::default()).await
    }

    /// Open a store that shares `broadcast` with other instances.
    pub async fn open_with_broadcast(
        backend: Arc<dyn RecordBackend>,
        broadcast: SyncBroadcast,
    ) -> Result<Self> {
        let store = Self {
            backend,
            broadcast,
            instance_id: Uuid::new_v4(),
            write_lock: Mutex::new(()),
        };
        store.open_connection().await?;
        Ok(store)
    }

    /// Open (or re-open) the underlying storage. Idempotent.
    pub async fn open_connection(&self) -> Result<()> {
        self.backend.open().await?;
        debug!("Record store {} ready on {}", self.instance_id, self.backend.name());
        Ok(())
    }

    /// Identifier of this store instance in broadcast notices.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Name of the backend in use.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub(crate) fn backend(&self) -> &Arc<dyn RecordBackend> {
        &self.backend
    }

    /// Every record, order unspecified.
    pub async fn get_all(&self) -> Result<Vec<Record>> {
        self.backend.all().await
    }

    /// One record, or `None` if it does not exist.
    pub async fn get_by_id(&self, id: &RecordId) -> Result<Option<Record>> {
        self.backend.get(id).await
    }

    /// Records with the given language.
    pub async fn get_by_language(&self, language: Language) -> Result<Vec<Record>> {
        self.backend.by_language(language).await
    }

    /// Records still waiting for remote acknowledgement.
    pub async fn get_pending_sync(&self) -> Result<Vec<Record>> {
        self.backend.by_status(SyncStatus::Pending).await
    }

    /// The `limit` most recently modified records, newest first.
    pub async fn get_recent(&self, limit: usize) -> Result<Vec<Record>> {
        self.backend.recent(limit).await
    }

    /// Number of records in each sync status.
    pub async fn count_by_status(&self) -> Result<HashMap<SyncStatus, usize>> {
        let mut counts = HashMap::new();
        for record in self.backend.all().await? {
            *counts.entry(record.sync_status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Insert or update a record.
    ///
    /// # Postconditions
    /// - A draft without id gets one derived from the current time
    /// - `created` of an existing record is preserved
    /// - `last_modified` is refreshed and strictly advances for edits
    /// - With `mark_pending` the record is `pending` and its failure count
    ///   resets; without it the draft's status (or the stored one) is kept
    ///
    /// Returns the record as stored.
    pub async fn save(&self, draft: RecordDraft, mark_pending: bool) -> Result<Record> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let (id, existing) = match draft.id {
            Some(id) => {
                let existing = self.backend.get(&id).await?;
                (id, existing)
            }
            None => (self.unused_id(now).await?, None),
        };

        let created = existing
            .as_ref()
            .map(|r| r.created)
            .or(draft.created)
            .unwrap_or(now);

        let mut last_modified = now.max(created);
        if let Some(previous) = existing.as_ref() {
            last_modified = last_modified.max(previous.last_modified + Duration::microseconds(1));
        }

        let (sync_status, sync_failures) = if mark_pending {
            (SyncStatus::Pending, 0)
        } else {
            let status = draft
                .sync_status
                .or(existing.as_ref().map(|r| r.sync_status))
                .unwrap_or(SyncStatus::Pending);
            (status, existing.as_ref().map(|r| r.sync_failures).unwrap_or(0))
        };

        let category = draft
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        let record = Record {
            id,
            code: draft.code,
            language: draft.language,
            category,
            created,
            last_modified,
            sync_status,
            sync_failures,
        };

        self.backend.put(&record).await?;
        debug!("Saved record {} ({})", record.id, record.sync_status);
        Ok(record)
    }

    /// Remove a record. Absent ids are not an error.
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.backend.remove(id).await?;
        debug!("Deleted record {}", id);
        Ok(())
    }

    /// Mark a record as acknowledged by the remote authority.
    ///
    /// Leaves `last_modified` untouched. Returns `None` if the record no
    /// longer exists.
    pub async fn mark_as_synced(&self, id: &RecordId) -> Result<Option<Record>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.backend.get(id).await? else {
            return Ok(None);
        };

        record.sync_status = SyncStatus::Synced;
        record.sync_failures = 0;
        self.backend.put(&record).await?;
        Ok(Some(record))
    }

    /// Mark the record synced if it is unchanged since `snapshot` was read.
    ///
    /// Returns `false` when the record was deleted or edited while its
    /// snapshot was being pushed; an edit made meanwhile stays pending.
    pub async fn acknowledge(&self, snapshot: &Record) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.current_for(snapshot).await? else {
            return Ok(false);
        };

        record.sync_status = SyncStatus::Synced;
        record.sync_failures = 0;
        self.backend.put(&record).await?;
        Ok(true)
    }

    /// Count a failed remote attempt against the record.
    ///
    /// When `quarantine_after` is set and the consecutive failure count
    /// reaches it, the record moves to `error` and leaves the pending set.
    /// Returns the updated record, or `None` if it changed in the meantime.
    pub async fn record_failure(
        &self,
        snapshot: &Record,
        quarantine_after: Option<u32>,
    ) -> Result<Option<Record>> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.current_for(snapshot).await? else {
            return Ok(None);
        };

        record.sync_failures = record.sync_failures.saturating_add(1);
        if let Some(max) = quarantine_after {
            if record.sync_failures >= max {
                warn!(
                    "Record {} failed {} times, quarantining",
                    record.id, record.sync_failures
                );
                record.sync_status = SyncStatus::Error;
            }
        }

        self.backend.put(&record).await?;
        Ok(Some(record))
    }

    /// Move every quarantined record back to `pending`.
    pub async fn requeue_failed(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let failed = self.backend.by_status(SyncStatus::Error).await?;

        for mut record in failed.iter().cloned() {
            record.sync_status = SyncStatus::Pending;
            record.sync_failures = 0;
            self.backend.put(&record).await?;
        }

        if !failed.is_empty() {
            info!("Requeued {} failed records", failed.len());
        }
        Ok(failed.len())
    }

    /// Time of the last pass that synced at least one record.
    pub async fn get_last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.backend.get_setting(LAST_SYNC_KEY).await? else {
            return Ok(None);
        };

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(time) => Ok(Some(time.with_timezone(&Utc))),
            Err(e) => {
                warn!("Ignoring unreadable last sync time {:?}: {}", raw, e);
                Ok(None)
            }
        }
    }

    /// Persist the last sync time and tell other instances about it.
    pub async fn set_last_sync_time(&self, time: DateTime<Utc>) -> Result<()> {
        self.backend
            .set_setting(LAST_SYNC_KEY, &time.to_rfc3339())
            .await?;

        if let Err(e) = self
            .backend
            .set_setting(SYNC_EVENT_KEY, &time.timestamp_millis().to_string())
            .await
        {
            warn!("Could not write sync event marker: {}", e);
        }

        self.broadcast.publish(LastSyncNotice {
            origin: self.instance_id,
            time,
        });
        Ok(())
    }

    /// Receive last-sync notices published by any instance sharing the channel.
    pub fn subscribe_sync_notices(&self) -> broadcast::Receiver<LastSyncNotice> {
        self.broadcast.subscribe()
    }

    async fn unused_id(&self, now: DateTime<Utc>) -> Result<RecordId> {
        let mut id = RecordId::from_timestamp(now);
        while self.backend.get(&id).await?.is_some() {
            id = id.successor();
        }
        Ok(id)
    }

    async fn current_for(&self, snapshot: &Record) -> Result<Option<Record>> {
        match self.backend.get(&snapshot.id).await? {
            Some(current) if current.last_modified == snapshot.last_modified => Ok(Some(current)),
            Some(_) => {
                debug!("Record {} changed since it was read, leaving it alone", snapshot.id);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
