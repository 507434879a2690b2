//! Scripted network for router tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use snipmaster_common::{Error, Result};

use crate::fetch::Fetcher;
use crate::request::{CacheRequest, CachedResponse};

#[derive(Default)]
pub(crate) struct FakeFetcher {
    responses: Mutex<HashMap<Url, CachedResponse>>,
    offline: AtomicBool,
    hanging: AtomicBool,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: Url, response: CachedResponse) {
        self.responses.lock().unwrap().insert(url, response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Requests never complete.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("offline".to_string()));
        }

        let response = self.responses.lock().unwrap().get(&request.url).cloned();
        response.ok_or_else(|| Error::Network(format!("no route to {}", request.url)))
    }
}
