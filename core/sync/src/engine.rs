//! Core sync engine that pushes pending records to the remote authority.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use snipmaster_common::{Error, Record, RecordId, Result};
use snipmaster_storage::RecordStore;

use crate::background::BackgroundScheduler;
use crate::events::{AppStatus, EventBus, SyncEvent};
use crate::remote::RemoteAuthority;
use crate::retry::RetryPolicy;
use crate::state::{PassPhase, SyncState};

/// Tag under which full passes are registered with the background scheduler.
pub const SYNC_TAG: &str = "sync-snippets";

/// Configuration for the sync engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// When records are set aside after repeated failures.
    pub retry: RetryPolicy,
    /// Upper bound for a single remote call. `None` waits indefinitely.
    pub remote_timeout: Option<Duration>,
}

/// Result of syncing one record on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleSyncOutcome {
    /// The remote accepted the record and it is now synced.
    Synced,
    /// The remote accepted the record, but it was edited meanwhile and
    /// stays pending.
    Superseded,
    /// The record is missing or not pending.
    NothingToDo,
    /// The remote rejected the record; the reason is kept for display.
    Failed(String),
}

/// Overall verdict of a full pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassOutcome {
    /// Another pass was running; nothing was attempted.
    AlreadySyncing,
    /// No record was pending.
    NothingToSync,
    /// Every pending record ended up synced.
    Succeeded,
    /// Some records were pushed, others are still pending.
    PartiallyFailed,
    /// The remote rejected every record.
    Failed,
}

/// Tallies of one full pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Verdict derived from the tallies.
    pub outcome: PassOutcome,
    /// Records that were pending when the pass started.
    pub total: usize,
    /// Records pushed and marked synced.
    pub succeeded: usize,
    /// Records the remote rejected.
    pub failed: usize,
    /// Records pushed but edited meanwhile; they stay pending.
    #[serde(default)]
    pub superseded: usize,
}

impl SyncReport {
    fn empty(outcome: PassOutcome) -> Self {
        Self {
            outcome,
            total: 0,
            succeeded: 0,
            failed: 0,
            superseded: 0,
        }
    }

    fn from_tallies(total: usize, succeeded: usize, failed: usize, superseded: usize) -> Self {
        let outcome = if failed == 0 && superseded == 0 {
            PassOutcome::Succeeded
        } else if succeeded > 0 || superseded > 0 {
            PassOutcome::PartiallyFailed
        } else {
            PassOutcome::Failed
        };
        Self {
            outcome,
            total,
            succeeded,
            failed,
            superseded,
        }
    }

    /// Whether the pass ran and every attempt succeeded.
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            PassOutcome::Succeeded | PassOutcome::NothingToSync
        )
    }

    fn phase(&self) -> PassPhase {
        match self.outcome {
            PassOutcome::Succeeded | PassOutcome::NothingToSync => PassPhase::Succeeded,
            PassOutcome::PartiallyFailed => PassPhase::PartiallyFailed,
            PassOutcome::Failed | PassOutcome::AlreadySyncing => PassPhase::Failed,
        }
    }
}

/// What `sync_or_defer` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferOutcome {
    /// Handed to the background scheduler.
    Deferred,
    /// Ran inline.
    Ran(SyncReport),
}

/// Main sync engine.
///
/// Owns the pass state machine, so at most one full pass runs per engine.
pub struct SyncEngine {
    /// Local records and sync metadata.
    store: Arc<RecordStore>,
    /// Authority that acknowledges pushed records.
    remote: Arc<dyn RemoteAuthority>,
    /// Where deferred passes go; `None` runs them inline.
    scheduler: Option<Arc<dyn BackgroundScheduler>>,
    /// Retry cap and remote timeout.
    config: EngineConfig,
    /// Status events for every subscriber.
    events: EventBus,
    /// Pass state machine.
    state: SyncState,
}

impl SyncEngine {
    pub fn new(
        store: Arc<RecordStore>,
        remote: Arc<dyn RemoteAuthority>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            remote,
            scheduler: None,
            config,
            events: EventBus::default(),
            state: SyncState::new(),
        }
    }

    /// Defer passes to `scheduler` when it is available.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn BackgroundScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Publish on an existing bus instead of a private one.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Push one record to the remote authority.
    ///
    /// An `Err` is a remote verdict, not a fault of the engine; callers turn
    /// it into a tally.
    pub async fn sync_with_remote(&self, record: &Record) -> Result<()> {
        match self.config.remote_timeout {
            Some(limit) => tokio::time::timeout(limit, self.remote.push(record))
                .await
                .map_err(|_| {
                    Error::RemoteSync(format!("no answer for {} within {:?}", record.id, limit))
                })?,
            None => self.remote.push(record).await,
        }
    }

    /// Sync one record if it exists and is pending.
    pub async fn sync_single(&self, id: &RecordId) -> Result<SingleSyncOutcome> {
        let Some(record) = self.store.get_by_id(id).await? else {
            return Ok(SingleSyncOutcome::NothingToDo);
        };
        if !record.is_pending() {
            return Ok(SingleSyncOutcome::NothingToDo);
        }

        match self.sync_with_remote(&record).await {
            Ok(()) => {
                if self.store.acknowledge(&record).await? {
                    Ok(SingleSyncOutcome::Synced)
                } else {
                    debug!("Record {} changed during sync, it stays pending", id);
                    Ok(SingleSyncOutcome::Superseded)
                }
            }
            Err(e) => {
                warn!("Could not sync record {}: {}", id, e);
                self.store
                    .record_failure(&record, self.config.retry.quarantine_after())
                    .await?;
                Ok(SingleSyncOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Run a full pass over every pending record.
    ///
    /// Remote failures never abort the pass; they are counted and the record
    /// stays pending for the next trigger. A storage failure ends the pass
    /// and is returned.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let Some(guard) = self.state.try_begin() else {
            info!("Sync already in progress");
            return Ok(SyncReport::empty(PassOutcome::AlreadySyncing));
        };

        self.events.emit_status(AppStatus::Syncing, "Starting sync...");

        match self.run_pass().await {
            Ok(report) => {
                guard.finish(report.phase());
                self.emit_final(&report);
                info!(
                    "Sync pass finished: {} of {} synced, {} failed",
                    report.succeeded, report.total, report.failed
                );
                Ok(report)
            }
            Err(e) => {
                error!("Sync pass failed: {}", e);
                guard.finish(PassPhase::Failed);
                self.events
                    .emit_status(AppStatus::SyncError, "Sync failed completely");
                Err(e)
            }
        }
    }

    async fn run_pass(&self) -> Result<SyncReport> {
        let pending = self.store.get_pending_sync().await?;
        if pending.is_empty() {
            return Ok(SyncReport::empty(PassOutcome::NothingToSync));
        }

        let total = pending.len();
        let quarantine = self.config.retry.quarantine_after();
        let mut succeeded = 0;
        let mut failed = 0;
        let mut superseded = 0;

        debug!("Syncing {} pending records via {}", total, self.remote.name());

        for (attempt, record) in pending.iter().enumerate() {
            match self.sync_with_remote(record).await {
                Ok(()) => {
                    if self.store.acknowledge(record).await? {
                        succeeded += 1;
                    } else {
                        debug!("Record {} changed during sync, it stays pending", record.id);
                        superseded += 1;
                    }
                }
                Err(e) => {
                    warn!("Could not sync record {}: {}", record.id, e);
                    self.store.record_failure(record, quarantine).await?;
                    failed += 1;
                }
            }

            self.events.emit_status(
                AppStatus::Syncing,
                format!("Syncing {}/{}", attempt + 1, total),
            );
        }

        if succeeded > 0 {
            let now = Utc::now();
            self.store.set_last_sync_time(now).await?;
            self.events.emit(SyncEvent::LastSyncUpdated { time: now });
        }

        Ok(SyncReport::from_tallies(total, succeeded, failed, superseded))
    }

    fn emit_final(&self, report: &SyncReport) {
        match report.outcome {
            PassOutcome::AlreadySyncing => {}
            PassOutcome::NothingToSync => {
                self.events.emit_status(AppStatus::SyncSuccess, "Nothing to sync");
            }
            PassOutcome::Succeeded => {
                self.events.emit_status(
                    AppStatus::SyncSuccess,
                    format!("All {} snippets synced", report.succeeded),
                );
            }
            PassOutcome::PartiallyFailed if report.failed == 0 => {
                self.events.emit_status(
                    AppStatus::SyncSuccess,
                    format!(
                        "Synced {}/{} snippets. {} changed during sync and stay pending.",
                        report.succeeded, report.total, report.superseded
                    ),
                );
            }
            PassOutcome::PartiallyFailed => {
                self.events.emit_status(
                    AppStatus::SyncError,
                    format!(
                        "Synced {}/{} snippets. {} failed.",
                        report.succeeded, report.total, report.failed
                    ),
                );
            }
            PassOutcome::Failed => {
                self.events.emit_status(
                    AppStatus::SyncError,
                    format!("Could not sync any of {} snippets", report.total),
                );
            }
        }
    }

    /// Hand a full pass to the background scheduler, or run it now.
    pub async fn sync_or_defer(&self) -> Result<DeferOutcome> {
        if let Some(scheduler) = self.scheduler.as_ref().filter(|s| s.is_supported()) {
            match scheduler.register(SYNC_TAG).await {
                Ok(()) => {
                    debug!("Sync deferred to background worker");
                    return Ok(DeferOutcome::Deferred);
                }
                Err(e) => warn!("Background registration failed, syncing now: {}", e),
            }
        }

        Ok(DeferOutcome::Ran(self.sync_all().await?))
    }

    /// Entry point for the background worker.
    ///
    /// Returns `None` for tags this engine does not own.
    pub async fn handle_background_task(&self, tag: &str) -> Result<Option<SyncReport>> {
        if tag != SYNC_TAG {
            debug!("Ignoring background task {}", tag);
            return Ok(None);
        }
        self.sync_all().await.map(Some)
    }
}
