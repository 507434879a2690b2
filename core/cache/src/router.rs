//! Strategy dispatch and cache lifecycle.

use futures::future::try_join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use snipmaster_common::{Error, Result};

use crate::classify::{classify, Strategy};
use crate::config::CacheConfig;
use crate::fetch::Fetcher;
use crate::request::{CacheRequest, CachedResponse};
use crate::store::CacheStorage;

/// Lifecycle of one router version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; this version never takes over.
    Redundant,
}

/// Answers requests from the caches or the network according to their
/// classification.
pub struct CacheRouter {
    config: CacheConfig,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    state: Mutex<WorkerState>,
    controlling: AtomicBool,
    revalidations: TaskTracker,
}

impl CacheRouter {
    pub fn new(
        config: CacheConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
            state: Mutex::new(WorkerState::Parsed),
            controlling: AtomicBool::new(false),
            revalidations: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: WorkerState) {
        debug!("Cache router state: {:?}", state);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Whether this version has claimed the open clients.
    pub fn is_controlling(&self) -> bool {
        self.controlling.load(Ordering::SeqCst)
    }

    /// Answer `request` using its classified strategy.
    pub async fn handle(&self, request: &CacheRequest) -> Result<CachedResponse> {
        let strategy = classify(request);
        debug!("{} {} -> {}", request.method, request.url, strategy);

        match strategy {
            Strategy::NetworkOnly => self.fetcher.fetch(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
        }
    }

    async fn cache_first(&self, request: &CacheRequest) -> Result<CachedResponse> {
        let key = request.cache_key();
        if let Some(hit) = lookup(self.storage.as_ref(), None, &key).await {
            return Ok(hit);
        }

        let response = self.fetcher.fetch(request).await?;
        if response.is_cacheable() {
            store(
                self.storage.as_ref(),
                &self.config.static_cache(),
                &key,
                &response,
            )
            .await;
        }
        Ok(response)
    }

    async fn network_first(&self, request: &CacheRequest) -> Result<CachedResponse> {
        let key = request.cache_key();
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    store(
                        self.storage.as_ref(),
                        &self.config.dynamic_cache(),
                        &key,
                        &response,
                    )
                    .await;
                }
                Ok(response)
            }
            Err(e) => {
                debug!("Network failed for {}, trying caches: {}", request.url, e);
                if let Some(hit) = lookup(self.storage.as_ref(), None, &key).await {
                    return Ok(hit);
                }

                if request.accepts("text/html") {
                    let offline = CacheRequest::get(self.config.resolve(&self.config.offline_page)?);
                    if let Some(page) =
                        lookup(self.storage.as_ref(), None, &offline.cache_key()).await
                    {
                        return Ok(page);
                    }
                }
                Err(e)
            }
        }
    }

    async fn stale_while_revalidate(&self, request: &CacheRequest) -> Result<CachedResponse> {
        let cache = self.config.snippets_cache();
        let key = request.cache_key();

        let cached = lookup(self.storage.as_ref(), Some(&cache), &key).await;
        match cached {
            Some(hit) => {
                let storage = self.storage.clone();
                let fetcher = self.fetcher.clone();
                let request = request.clone();

                self.revalidations.spawn(async move {
                    match fetcher.fetch(&request).await {
                        Ok(fresh) if fresh.status.is_success() => {
                            store(storage.as_ref(), &cache, &key, &fresh).await;
                        }
                        Ok(fresh) => {
                            debug!("Not replacing {} with status {}", key, fresh.status)
                        }
                        Err(e) => warn!("Failed to update cache for {}: {}", key, e),
                    }
                });
                Ok(hit)
            }
            None => {
                let response = self.fetcher.fetch(request).await?;
                if response.status.is_success() {
                    store(self.storage.as_ref(), &cache, &key, &response).await;
                }
                Ok(response)
            }
        }
    }

    /// Wait until every background revalidation started so far has finished.
    pub async fn settle(&self) {
        self.revalidations.close();
        self.revalidations.wait().await;
        self.revalidations.reopen();
    }

    /// Fetch the shell manifest into the static cache, then take over.
    ///
    /// The manifest is stored only if every resource was fetched with a
    /// success status; a single failure leaves the static cache untouched
    /// and marks this version redundant.
    pub async fn install(&self) -> Result<()> {
        self.set_state(WorkerState::Installing);
        info!("Caching app shell ({} resources)", self.config.shell.len());

        match self.fetch_shell().await {
            Ok(entries) => {
                if let Err(e) = self
                    .storage
                    .put_all(&self.config.static_cache(), entries)
                    .await
                {
                    error!("Storing app shell failed: {}", e);
                    self.set_state(WorkerState::Redundant);
                    return Err(e);
                }
            }
            Err(e) => {
                error!("Install failed: {}", e);
                self.set_state(WorkerState::Redundant);
                return Err(e);
            }
        }

        self.set_state(WorkerState::Installed);
        info!("Install completed");

        // Take over without waiting for older versions to go away.
        self.activate().await.map(|_| ())
    }

    async fn fetch_shell(&self) -> Result<Vec<(String, CachedResponse)>> {
        let requests = self
            .config
            .shell
            .iter()
            .map(|path| self.config.resolve(path).map(CacheRequest::get))
            .collect::<Result<Vec<_>>>()?;

        try_join_all(requests.into_iter().map(|request| async move {
            let response = self.fetcher.fetch(&request).await?;
            if !response.status.is_success() {
                return Err(Error::Network(format!(
                    "{} returned {}",
                    request.url, response.status
                )));
            }
            Ok((request.cache_key(), response))
        }))
        .await
    }

    /// Delete caches left behind by other versions and claim clients.
    ///
    /// Returns the names of the deleted caches.
    pub async fn activate(&self) -> Result<Vec<String>> {
        self.set_state(WorkerState::Activating);

        let current = self.config.current_caches();
        let mut deleted = Vec::new();
        for name in self.storage.cache_names().await? {
            if self.config.owns(&name) && !current.contains(&name) {
                info!("Deleting old cache {}", name);
                self.storage.delete_cache(&name).await?;
                deleted.push(name);
            }
        }

        self.set_state(WorkerState::Activated);
        self.controlling.store(true, Ordering::SeqCst);
        info!("Activation completed, controlling clients");
        Ok(deleted)
    }
}

async fn lookup(
    storage: &dyn CacheStorage,
    cache: Option<&str>,
    key: &str,
) -> Option<CachedResponse> {
    let result = match cache {
        Some(cache) => storage.get(cache, key).await,
        None => storage.match_any(key).await,
    };
    result.unwrap_or_else(|e| {
        warn!("Cache lookup for {} failed: {}", key, e);
        None
    })
}

async fn store(storage: &dyn CacheStorage, cache: &str, key: &str, response: &CachedResponse) {
    if let Err(e) = storage.put(cache, key, response).await {
        warn!("Could not cache {} in {}: {}", key, cache, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ResponseKind;
    use crate::store::MemoryCacheStorage;
    use crate::testing::FakeFetcher;
    use bytes::Bytes;
    use http::header::{HeaderValue, ACCEPT};
    use http::StatusCode;
    use std::time::Duration;
    use url::Url;

    const ORIGIN: &str = "https://app.test/";

    struct Fixture {
        storage: Arc<MemoryCacheStorage>,
        fetcher: Arc<FakeFetcher>,
        router: CacheRouter,
    }

    fn fixture() -> Fixture {
        let mut config = CacheConfig::for_origin(Url::parse(ORIGIN).unwrap());
        config.shell = vec!["/".into(), "/offline.html".into(), "/scripts/app.js".into()];

        let storage = Arc::new(MemoryCacheStorage::new());
        let fetcher = Arc::new(FakeFetcher::new());
        let router = CacheRouter::new(config, storage.clone(), fetcher.clone());
        Fixture {
            storage,
            fetcher,
            router,
        }
    }

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    fn body(response: &CachedResponse) -> &[u8] {
        response.body.as_ref()
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let fx = fixture();
        let request = CacheRequest::get(url("/scripts/app.js"));
        fx.storage
            .put("snipmaster-static-v2", &request.cache_key(), &CachedResponse::ok("cached"))
            .await
            .unwrap();

        let response = fx.router.handle(&request).await.unwrap();
        assert_eq!(body(&response), b"cached");
        assert_eq!(fx.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fills_static_cache() {
        let fx = fixture();
        fx.fetcher.serve(url("/styles/main.css"), CachedResponse::ok("css"));
        fx.fetcher.serve(
            url("/images/cdn.png"),
            CachedResponse::ok("img").with_kind(ResponseKind::Cors),
        );

        let css = CacheRequest::get(url("/styles/main.css"));
        fx.router.handle(&css).await.unwrap();
        assert!(fx
            .storage
            .get("snipmaster-static-v2", &css.cache_key())
            .await
            .unwrap()
            .is_some());

        // Only same-origin basic responses are stored.
        let png = CacheRequest::get(url("/images/cdn.png"));
        fx.router.handle(&png).await.unwrap();
        assert!(fx.storage.match_any(&png.cache_key()).await.unwrap().is_none());

        fx.router.handle(&css).await.unwrap();
        assert_eq!(fx.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_network_first_caches_and_falls_back() {
        let fx = fixture();
        let request = CacheRequest::get(url("/api/status"));
        fx.fetcher.serve(url("/api/status"), CachedResponse::ok("live"));

        let live = fx.router.handle(&request).await.unwrap();
        assert_eq!(body(&live), b"live");
        assert!(fx
            .storage
            .get("snipmaster-dynamic-v2", &request.cache_key())
            .await
            .unwrap()
            .is_some());

        fx.fetcher.set_offline(true);
        let fallback = fx.router.handle(&request).await.unwrap();
        assert_eq!(body(&fallback), b"live");
    }

    #[tokio::test]
    async fn test_network_first_does_not_cache_errors() {
        let fx = fixture();
        let request = CacheRequest::get(url("/api/missing"));
        fx.fetcher.serve(
            url("/api/missing"),
            CachedResponse::new(StatusCode::NOT_FOUND, "nope"),
        );

        let response = fx.router.handle(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(fx.storage.match_any(&request.cache_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_page_for_html_requests() {
        let fx = fixture();
        let offline = CacheRequest::get(url("/offline.html"));
        fx.storage
            .put("snipmaster-static-v2", &offline.cache_key(), &CachedResponse::ok("offline"))
            .await
            .unwrap();
        fx.fetcher.set_offline(true);

        let page = fx
            .router
            .handle(&CacheRequest::navigate(url("/editor")))
            .await
            .unwrap();
        assert_eq!(body(&page), b"offline");

        let json = CacheRequest::get(url("/api/things"))
            .with_header(ACCEPT, HeaderValue::from_static("application/json"));
        assert!(matches!(
            fx.router.handle(&json).await,
            Err(Error::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_while_revalidate() {
        let fx = fixture();
        let request = CacheRequest::get(url("/data/snippets"));

        fx.fetcher.serve(url("/data/snippets"), CachedResponse::ok("v1"));
        let first = fx.router.handle(&request).await.unwrap();
        assert_eq!(body(&first), b"v1");

        fx.fetcher.serve(url("/data/snippets"), CachedResponse::ok("v2"));
        let stale = fx.router.handle(&request).await.unwrap();
        assert_eq!(body(&stale), b"v1");

        fx.router.settle().await;
        let fresh = fx.router.handle(&request).await.unwrap();
        assert_eq!(body(&fresh), b"v2");
        fx.router.settle().await;
    }

    #[tokio::test]
    async fn test_stale_hit_does_not_wait_for_network() {
        let fx = fixture();
        let request = CacheRequest::get(url("/data/snippets"));
        fx.storage
            .put("snipmaster-snippets-data-v2", &request.cache_key(), &CachedResponse::ok("stale"))
            .await
            .unwrap();
        fx.fetcher.set_hanging(true);

        let response = tokio::time::timeout(Duration::from_secs(1), fx.router.handle(&request))
            .await
            .expect("stale response should not wait for the network")
            .unwrap();
        assert_eq!(body(&response), b"stale");
    }

    #[tokio::test]
    async fn test_failed_revalidation_is_swallowed() {
        let fx = fixture();
        let request = CacheRequest::get(url("/data/snippets"));
        fx.storage
            .put("snipmaster-snippets-data-v2", &request.cache_key(), &CachedResponse::ok("stale"))
            .await
            .unwrap();
        fx.fetcher.set_offline(true);

        let response = fx.router.handle(&request).await.unwrap();
        assert_eq!(body(&response), b"stale");
        fx.router.settle().await;

        let cached = fx
            .storage
            .get("snipmaster-snippets-data-v2", &request.cache_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.body, Bytes::from_static(b"stale"));
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_answers() {
        let fx = fixture();
        fx.storage.set_read_only(true);
        fx.fetcher.serve(url("/scripts/app.js"), CachedResponse::ok("js"));

        let response = fx
            .router
            .handle(&CacheRequest::get(url("/scripts/app.js")))
            .await
            .unwrap();
        assert_eq!(body(&response), b"js");
    }

    #[tokio::test]
    async fn test_network_only_never_touches_cache() {
        let fx = fixture();
        let request = CacheRequest::get(Url::parse("chrome-extension://abc/x.js").unwrap());
        fx.fetcher.serve(request.url.clone(), CachedResponse::ok("ext"));

        fx.router.handle(&request).await.unwrap();
        assert!(fx.storage.cache_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_then_activate() {
        let fx = fixture();
        for path in ["/", "/offline.html", "/scripts/app.js"] {
            fx.fetcher.serve(url(path), CachedResponse::ok(path.to_string()));
        }
        fx.storage
            .put("snipmaster-static-v1", "GET x", &CachedResponse::ok("old"))
            .await
            .unwrap();
        fx.storage
            .put("other-app-v1", "GET x", &CachedResponse::ok("foreign"))
            .await
            .unwrap();
        assert_eq!(fx.router.state(), WorkerState::Parsed);

        fx.router.install().await.unwrap();

        assert_eq!(fx.router.state(), WorkerState::Activated);
        assert!(fx.router.is_controlling());

        let names = fx.storage.cache_names().await.unwrap();
        assert!(names.contains(&"snipmaster-static-v2".to_string()));
        assert!(names.contains(&"other-app-v1".to_string()));
        assert!(!names.contains(&"snipmaster-static-v1".to_string()));

        let shell = CacheRequest::get(url("/offline.html"));
        assert!(fx
            .storage
            .get("snipmaster-static-v2", &shell.cache_key())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let fx = fixture();
        fx.fetcher.serve(url("/"), CachedResponse::ok("index"));
        fx.fetcher.serve(url("/offline.html"), CachedResponse::ok("offline"));
        fx.fetcher.serve(
            url("/scripts/app.js"),
            CachedResponse::new(StatusCode::NOT_FOUND, ""),
        );
        fx.storage
            .put("snipmaster-static-v1", "GET x", &CachedResponse::ok("old"))
            .await
            .unwrap();

        assert!(fx.router.install().await.is_err());
        assert_eq!(fx.router.state(), WorkerState::Redundant);
        assert!(!fx.router.is_controlling());
        assert_eq!(
            fx.storage.cache_names().await.unwrap(),
            vec!["snipmaster-static-v1".to_string()]
        );
    }
}
