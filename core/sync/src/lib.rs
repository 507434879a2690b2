//! SnipMaster Sync Engine
//!
//! This module pushes locally saved snippets to a remote authority:
//! - Remote authorities (simulated and HTTP)
//! - Full and single-record sync passes with at most one pass at a time
//! - Status events for presentation layers
//! - Deferred execution through a background worker
//! - Reconnect handling

pub mod background;
pub mod connectivity;
pub mod engine;
pub mod events;
pub mod remote;
pub mod retry;
pub mod state;

#[cfg(test)]
mod testing;

// Re-export main types
pub use background::{BackgroundScheduler, BackgroundWorker, BackgroundWorkerHandle};
pub use connectivity::ConnectivityMonitor;
pub use engine::{
    DeferOutcome, EngineConfig, PassOutcome, SingleSyncOutcome, SyncEngine, SyncReport, SYNC_TAG,
};
pub use events::{wait_for_pass_end, AppStatus, EventBus, StatusEvent, SyncEvent};
pub use remote::{HttpRemote, RemoteAuthority, SimulatedRemote};
pub use retry::RetryPolicy;
pub use state::{PassGuard, PassPhase, SyncState};
