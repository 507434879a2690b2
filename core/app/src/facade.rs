//! The assembled application core.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use snipmaster_cache::{
    CacheRouter, CacheStorage, HttpFetcher, MemoryCacheStorage, SqliteCacheStorage,
};
use snipmaster_common::{Error, Language, Record, RecordDraft, RecordId, Result, SyncStatus};
use snipmaster_storage::{
    BackendRegistry, LegacySource, MigrationOutcome, RecordStore, SyncBroadcast,
};
use snipmaster_sync::{
    BackgroundWorker, ConnectivityMonitor, DeferOutcome, HttpRemote, PassPhase, RemoteAuthority,
    SimulatedRemote, SingleSyncOutcome, SyncEngine, SyncEvent, SyncReport,
};

use crate::config::{AppConfig, RemoteConfig};
use crate::hooks::{NoopHooks, SnippetHooks};

/// Point-in-time overview for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub backend: String,
    pub online: bool,
    pub total: usize,
    pub pending: usize,
    pub synced: usize,
    pub failed: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub phase: PassPhase,
}

/// Builder for [`SnipMaster`].
pub struct SnipMasterBuilder {
    config: AppConfig,
    registry: BackendRegistry,
    remote: Option<Arc<dyn RemoteAuthority>>,
    hooks: Arc<dyn SnippetHooks>,
    broadcast: Option<SyncBroadcast>,
}

impl SnipMasterBuilder {
    /// Use a custom backend registry.
    pub fn registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Use this remote instead of the one described by the config.
    pub fn remote(mut self, remote: Arc<dyn RemoteAuthority>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn SnippetHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Share last-sync notices with other instances over the same data.
    pub fn broadcast(mut self, broadcast: SyncBroadcast) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    /// Open the store, import legacy data and start the sync machinery.
    ///
    /// # Errors
    /// - Backend not registered or misconfigured
    /// - Storage unavailable
    pub async fn open(self) -> Result<SnipMaster> {
        let config = self.config;

        if let Some(dir) = config.database_dir() {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let backend = self
            .registry
            .resolve(&config.backend, config.backend_config.clone())?;
        let broadcast = self.broadcast.unwrap_or_default();
        let store = Arc::new(RecordStore::open_with_broadcast(backend, broadcast).await?);
        info!("Opened {} record store", store.backend_name());

        // An unreadable legacy list must not lock the user out; the flag stays
        // unset so a later open or `migrate` retries it.
        let migration = match store.migrate_legacy(LegacySource::Settings).await {
            Ok(outcome) => {
                debug!("Legacy migration: {:?}", outcome);
                Some(outcome)
            }
            Err(Error::Serialization(reason)) => {
                warn!("Skipping legacy migration: {}", reason);
                None
            }
            Err(e) => return Err(e),
        };

        let remote = match self.remote {
            Some(remote) => remote,
            None => build_remote(&config.remote)?,
        };

        let mut tasks = Vec::new();
        let mut engine = SyncEngine::new(store.clone(), remote, config.sync.engine_config());
        let worker = if config.sync.background {
            let (worker, handle) = BackgroundWorker::new();
            engine = engine.with_scheduler(Arc::new(worker.clone()));
            Some((worker, handle))
        } else {
            None
        };
        let engine = Arc::new(engine);

        let worker = worker.map(|(worker, handle)| {
            let engine = engine.clone();
            let hooks = self.hooks.clone();
            let task = tokio::spawn(handle.run(move |tag| {
                let engine = engine.clone();
                let hooks = hooks.clone();
                async move {
                    if let Some(report) = engine.handle_background_task(&tag).await? {
                        hooks.on_synced(&report);
                    }
                    Ok(())
                }
            }));
            (worker, task)
        });

        tasks.push(forward_sync_notices(&store, &engine));

        let cache = match &config.cache {
            Some(cache_config) => {
                let storage: Arc<dyn CacheStorage> = match &config.cache_path {
                    Some(path) => Arc::new(SqliteCacheStorage::open(path).await?),
                    None => Arc::new(MemoryCacheStorage::new()),
                };
                let fetcher = Arc::new(HttpFetcher::new(cache_config.origin.clone())?);
                Some(CacheRouter::new(cache_config.clone(), storage, fetcher))
            }
            None => None,
        };

        let connectivity = ConnectivityMonitor::new(engine.clone(), config.online);
        let (worker, worker_task) = match worker {
            Some((worker, task)) => (Some(worker), Some(task)),
            None => (None, None),
        };

        Ok(SnipMaster {
            config,
            store,
            engine,
            connectivity,
            cache,
            hooks: self.hooks,
            migration,
            worker,
            worker_task: Mutex::new(worker_task),
            tasks,
        })
    }
}

fn build_remote(config: &RemoteConfig) -> Result<Arc<dyn RemoteAuthority>> {
    let remote: Arc<dyn RemoteAuthority> = match config {
        RemoteConfig::Simulated {
            latency_ms,
            success_rate,
        } => Arc::new(SimulatedRemote::new(
            Duration::from_millis(*latency_ms),
            *success_rate,
        )),
        RemoteConfig::Http { base_url } => {
            let remote = HttpRemote::new(base_url)?;
            info!("Syncing with {}", remote.endpoint());
            Arc::new(remote)
        }
    };
    Ok(remote)
}

/// Relay last-sync times written by other instances onto this engine's bus.
fn forward_sync_notices(store: &RecordStore, engine: &Arc<SyncEngine>) -> JoinHandle<()> {
    let mut notices = store.subscribe_sync_notices();
    let own_id = store.instance_id();
    let events = engine.events().clone();

    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) if notice.origin != own_id => {
                    debug!("Last sync updated by another instance");
                    events.emit(SyncEvent::LastSyncUpdated { time: notice.time });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} last-sync notices", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Offline-first snippet manager core.
///
/// Owns the record store, the sync engine and everything wired to them.
pub struct SnipMaster {
    config: AppConfig,
    store: Arc<RecordStore>,
    engine: Arc<SyncEngine>,
    connectivity: ConnectivityMonitor,
    cache: Option<CacheRouter>,
    hooks: Arc<dyn SnippetHooks>,
    migration: Option<MigrationOutcome>,
    worker: Option<BackgroundWorker>,
    worker_task: Mutex<Option<JoinHandle<()>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SnipMaster {
    pub fn builder(config: AppConfig) -> SnipMasterBuilder {
        SnipMasterBuilder {
            config,
            registry: BackendRegistry::with_defaults(),
            remote: None,
            hooks: Arc::new(NoopHooks),
            broadcast: None,
        }
    }

    /// Open with the default registry, the configured remote and no hooks.
    pub async fn open(config: AppConfig) -> Result<Self> {
        Self::builder(config).open().await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Request router, when caching is configured.
    pub fn cache(&self) -> Option<&CacheRouter> {
        self.cache.as_ref()
    }

    /// What the legacy import did when this instance was opened.
    ///
    /// `None` if the legacy list could not be parsed and was left in place.
    pub fn migration(&self) -> Option<MigrationOutcome> {
        self.migration
    }

    /// Create or edit a snippet. The result is pending until synced.
    pub async fn save(&self, draft: RecordDraft) -> Result<Record> {
        if draft.code.trim().is_empty() {
            return Err(Error::InvalidInput("snippet code is empty".to_string()));
        }
        let record = self.store.save(draft, true).await?;
        self.hooks.on_saved(&record);
        Ok(record)
    }

    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        self.store.delete(id).await?;
        self.hooks.on_deleted(id);
        Ok(())
    }

    pub async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        self.store.get_by_id(id).await
    }

    pub async fn list(&self) -> Result<Vec<Record>> {
        self.store.get_all().await
    }

    pub async fn list_by_language(&self, language: Language) -> Result<Vec<Record>> {
        self.store.get_by_language(language).await
    }

    pub async fn pending(&self) -> Result<Vec<Record>> {
        self.store.get_pending_sync().await
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<Record>> {
        self.store.get_recent(limit).await
    }

    /// Run a full pass now.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let report = self.engine.sync_all().await?;
        self.hooks.on_synced(&report);
        Ok(report)
    }

    /// Run a full pass on the background worker if there is one.
    pub async fn sync_or_defer(&self) -> Result<DeferOutcome> {
        let outcome = self.engine.sync_or_defer().await?;
        if let DeferOutcome::Ran(report) = &outcome {
            self.hooks.on_synced(report);
        }
        Ok(outcome)
    }

    pub async fn sync_single(&self, id: &RecordId) -> Result<SingleSyncOutcome> {
        self.engine.sync_single(id).await
    }

    /// Put quarantined records back in the queue.
    pub async fn requeue_failed(&self) -> Result<usize> {
        self.store.requeue_failed().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.engine.subscribe()
    }

    pub fn went_offline(&self) {
        self.connectivity.went_offline();
    }

    pub async fn came_online(&self) -> Result<Option<DeferOutcome>> {
        self.connectivity.came_online().await
    }

    pub async fn status(&self) -> Result<StatusSummary> {
        let counts = self.store.count_by_status().await?;
        let count = |status: SyncStatus| counts.get(&status).copied().unwrap_or(0);

        Ok(StatusSummary {
            backend: self.store.backend_name().to_string(),
            online: self.connectivity.is_online(),
            total: counts.values().sum(),
            pending: count(SyncStatus::Pending),
            synced: count(SyncStatus::Synced),
            failed: count(SyncStatus::Error),
            last_sync: self.store.get_last_sync_time().await?,
            phase: self.engine.state().phase(),
        })
    }

    /// Stop the background worker after its queued passes and detach
    /// listeners.
    pub async fn shutdown(&self) {
        if let Some(worker) = &self.worker {
            worker.shutdown().await;
        }
        let task = self
            .worker_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Background worker ended abnormally: {}", e);
            }
        }
        for task in &self.tasks {
            task.abort();
        }
        info!("SnipMaster shut down");
    }
}

impl Drop for SnipMaster {
    fn drop(&mut self) {
        if let Ok(slot) = self.worker_task.get_mut() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}
