//! Cross-instance notification of completed syncs.
//!
//! Several stores may be open over the same durable backend at once (one per
//! open window or process). When one of them records a sync, the others learn
//! about it through a shared [`SyncBroadcast`] instead of polling the settings
//! container.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Published whenever a store persists a new last-sync time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSyncNotice {
    /// Instance id of the store that wrote the value.
    pub origin: Uuid,
    /// The new last-sync time.
    pub time: DateTime<Utc>,
}

/// Shared side channel between store instances.
#[derive(Debug, Clone)]
pub struct SyncBroadcast {
    tx: broadcast::Sender<LastSyncNotice>,
}

impl SyncBroadcast {
    /// Create a new channel buffering up to `capacity` notices per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every notice published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LastSyncNotice> {
        self.tx.subscribe()
    }

    /// Publish a notice. Having no listeners is not an error.
    pub fn publish(&self, notice: LastSyncNotice) {
        if self.tx.send(notice).is_err() {
            debug!("No listeners for last-sync notice");
        }
    }
}

impl Default for SyncBroadcast {
    fn default() -> Self {
        Self::new(16)
    }
}
