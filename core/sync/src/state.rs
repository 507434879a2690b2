//! Sync pass state tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Phase of the sync pass machine.
///
/// `Idle -> Running -> {Succeeded, PartiallyFailed, Failed} -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassPhase {
    Idle,
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl PassPhase {
    /// Whether a pass can end in this phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PassPhase::Succeeded | PassPhase::PartiallyFailed | PassPhase::Failed
        )
    }
}

#[derive(Debug)]
struct Inner {
    phase: PassPhase,
    last_outcome: Option<PassPhase>,
    last_finished: Option<DateTime<Utc>>,
}

/// Mutual exclusion and bookkeeping for sync passes of one engine.
#[derive(Debug, Clone)]
pub struct SyncState {
    inner: Arc<Mutex<Inner>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                phase: PassPhase::Idle,
                last_outcome: None,
                last_finished: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The state is plain data, so a panic elsewhere cannot leave it torn.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a pass unless one is already running.
    pub fn try_begin(&self) -> Option<PassGuard> {
        let mut inner = self.lock();
        if inner.phase == PassPhase::Running {
            return None;
        }
        inner.phase = PassPhase::Running;
        Some(PassGuard {
            state: self.clone(),
            finished: false,
        })
    }

    pub fn phase(&self) -> PassPhase {
        self.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == PassPhase::Running
    }

    /// Terminal phase of the most recent completed pass.
    pub fn last_outcome(&self) -> Option<PassPhase> {
        self.lock().last_outcome
    }

    pub fn last_finished(&self) -> Option<DateTime<Utc>> {
        self.lock().last_finished
    }

    fn complete(&self, outcome: PassPhase) {
        let mut inner = self.lock();
        inner.last_outcome = Some(outcome);
        inner.last_finished = Some(Utc::now());
        inner.phase = PassPhase::Idle;
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// A running pass. Dropping it unfinished records the pass as failed.
#[derive(Debug)]
pub struct PassGuard {
    state: SyncState,
    finished: bool,
}

impl PassGuard {
    /// End the pass with `outcome`. Non-terminal phases count as failure.
    pub fn finish(mut self, outcome: PassPhase) {
        let outcome = if outcome.is_terminal() {
            outcome
        } else {
            PassPhase::Failed
        };
        self.state.complete(outcome);
        self.finished = true;
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.state.complete(PassPhase::Failed);
        }
    }
}
