//! Reaction to reachability changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use snipmaster_common::Result;

use crate::engine::{DeferOutcome, SyncEngine};
use crate::events::AppStatus;

/// Tracks whether the remote is reachable and kicks off a sync when it
/// becomes reachable again with changes waiting.
pub struct ConnectivityMonitor {
    engine: Arc<SyncEngine>,
    online: AtomicBool,
}

impl ConnectivityMonitor {
    pub fn new(engine: Arc<SyncEngine>, online: bool) -> Self {
        Self {
            engine,
            online: AtomicBool::new(online),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn went_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
        info!("Connection lost, working offline");
        self.engine.events().emit_status(
            AppStatus::Offline,
            "You are offline. Changes are saved locally and synced later.",
        );
    }

    /// Mark the connection as restored.
    ///
    /// With pending records a sync is started (deferred when a background
    /// scheduler is available). Returns what was done, or `None` when there
    /// was nothing pending.
    pub async fn came_online(&self) -> Result<Option<DeferOutcome>> {
        self.online.store(true, Ordering::SeqCst);
        info!("Connection restored");

        let events = self.engine.events();
        events.emit_status(AppStatus::Online, "You are online");

        let result = self.sync_pending().await;
        if let Err(e) = &result {
            error!("Sync after reconnect failed: {}", e);
            events.emit_status(AppStatus::SyncError, "Error while syncing changes");
        }
        result
    }

    async fn sync_pending(&self) -> Result<Option<DeferOutcome>> {
        let pending = self.engine.store().get_pending_sync().await?;
        if pending.is_empty() {
            return Ok(None);
        }

        self.engine.events().emit_status(
            AppStatus::Syncing,
            format!("Syncing {} changes...", pending.len()),
        );
        self.engine.sync_or_defer().await.map(Some)
    }
}
