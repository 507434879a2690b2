//! Controllable remote for engine and monitor tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

use snipmaster_common::{Error, Record, RecordId, Result};

use crate::remote::RemoteAuthority;

#[derive(Default)]
pub(crate) struct ScriptedRemote {
    failing: Mutex<HashSet<RecordId>>,
    fail_all: AtomicBool,
    calls: AtomicUsize,
    gated: bool,
    pub entered: Notify,
    pub release: Notify,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every push waits for `release` after signalling `entered`.
    pub fn gated() -> Self {
        Self {
            gated: true,
            ..Self::default()
        }
    }

    pub fn fail_id(&self, id: &RecordId) {
        self.failing.lock().unwrap().insert(id.clone());
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteAuthority for ScriptedRemote {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn push(&self, record: &Record) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.gated {
            self.entered.notify_one();
            self.release.notified().await;
        }

        if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&record.id) {
            return Err(Error::RemoteSync(format!("rejected {}", record.id)));
        }
        Ok(())
    }
}
