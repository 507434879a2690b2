//! Network access for the router.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use snipmaster_common::{Error, Result};

use crate::request::{CacheRequest, CachedResponse, ResponseKind};

/// Performs the network half of a strategy.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `request`. Any HTTP status is a response; only failures to get
    /// one at all are errors.
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse>;
}

/// Fetcher backed by reqwest.
pub struct HttpFetcher {
    http: Client,
    origin: Url,
}

impl HttpFetcher {
    /// Responses from `origin` are classified as same-origin.
    pub fn new(origin: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("SnipMaster/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, origin })
    }

    fn kind_for(&self, url: &Url) -> ResponseKind {
        if url.origin() == self.origin.origin() {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse> {
        let response = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to fetch {}: {}", request.url, e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let kind = self.kind_for(response.url());
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read {}: {}", request.url, e)))?;

        debug!("Fetched {} -> {}", request.url, status);
        Ok(CachedResponse {
            status,
            headers,
            body,
            kind,
        })
    }
}
