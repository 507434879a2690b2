//! Status notifications for whoever presents sync progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::trace;

/// Coarse application status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppStatus {
    Online,
    Offline,
    Syncing,
    SyncError,
    SyncSuccess,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Online => "online",
            AppStatus::Offline => "offline",
            AppStatus::Syncing => "syncing",
            AppStatus::SyncError => "sync-error",
            AppStatus::SyncSuccess => "sync-success",
        }
    }

    /// Whether a pass reports this status as its final event.
    pub fn ends_pass(&self) -> bool {
        matches!(self, AppStatus::SyncSuccess | AppStatus::SyncError)
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: AppStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    /// Status change with a human readable message.
    Status(StatusEvent),
    /// A pass synced at least one record at `time`.
    LastSyncUpdated { time: DateTime<Utc> },
}

impl SyncEvent {
    pub fn status(status: AppStatus, message: impl Into<String>) -> Self {
        SyncEvent::Status(StatusEvent {
            status,
            message: message.into(),
        })
    }
}

/// Fan-out of sync events to any number of subscribers.
///
/// Emitting never blocks and never fails; events sent while nobody listens
/// are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        trace!("Event: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn emit_status(&self, status: AppStatus, message: impl Into<String>) {
        self.emit(SyncEvent::status(status, message));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Follow `events` until a pass ends, handing each status to `on_status`.
///
/// Returns the final status, or `None` if `limit` elapses or the bus closes
/// first. Lagging behind skips the lost events.
pub async fn wait_for_pass_end(
    events: &mut broadcast::Receiver<SyncEvent>,
    limit: Duration,
    mut on_status: impl FnMut(&StatusEvent),
) -> Option<StatusEvent> {
    let follow = async {
        loop {
            match events.recv().await {
                Ok(SyncEvent::Status(status)) => {
                    on_status(&status);
                    if status.status.ends_pass() {
                        return Some(status);
                    }
                }
                Ok(SyncEvent::LastSyncUpdated { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    trace!("Skipped {} sync events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(limit, follow).await.ok().flatten()
}
