//! Request and response snapshots handled by the router.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

/// How the request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    SameOrigin,
    #[default]
    Cors,
    NoCors,
}

/// An outbound request as seen by the router.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    /// HTTP method; part of the cache key.
    pub method: Method,
    /// Absolute request URL.
    pub url: Url,
    /// Request headers; `Accept` and `Cache-Control` influence routing.
    pub headers: HeaderMap,
    pub mode: RequestMode,
}

impl CacheRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            mode: RequestMode::default(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A page navigation, which accepts HTML.
    pub fn navigate(url: Url) -> Self {
        Self::get(url)
            .with_mode(RequestMode::Navigate)
            .with_header(ACCEPT, HeaderValue::from_static("text/html"))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Identity under which responses to this request are cached.
    ///
    /// Method and URL only; headers and the fragment do not take part.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }

    /// Whether the `Accept` header mentions `mime`.
    pub fn accepts(&self, mime: &str) -> bool {
        self.headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains(mime))
    }

    /// Whether the request asks to skip every cache.
    pub fn bypasses_cache(&self) -> bool {
        self.headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|directive| directive.trim().eq_ignore_ascii_case("no-cache"))
    }
}

/// Classification of a response relative to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin response.
    Basic,
    /// Cross-origin response with readable content.
    Cors,
    /// Cross-origin response without readable content.
    Opaque,
    Error,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Basic => "basic",
            ResponseKind::Cors => "cors",
            ResponseKind::Opaque => "opaque",
            ResponseKind::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "basic" => Some(ResponseKind::Basic),
            "cors" => Some(ResponseKind::Cors),
            "opaque" => Some(ResponseKind::Opaque),
            "error" => Some(ResponseKind::Error),
            _ => None,
        }
    }
}

/// A response snapshot that can be stored and replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Origin classification; only `Basic` counts as our own content.
    pub kind: ResponseKind,
}

impl CachedResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_content_type(mut self, value: &'static str) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(value));
        self
    }

    /// Plain 200 response from our own origin.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK && self.kind == ResponseKind::Basic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_cache_key_ignores_headers() {
        let plain = CacheRequest::get(url("https://app.test/a.js"));
        let with_accept = plain
            .clone()
            .with_header(ACCEPT, HeaderValue::from_static("*/*"));
        assert_eq!(plain.cache_key(), with_accept.cache_key());
        assert_eq!(plain.cache_key(), "GET https://app.test/a.js");

        let post = CacheRequest::new(Method::POST, url("https://app.test/a.js"));
        assert_ne!(plain.cache_key(), post.cache_key());
    }

    #[test]
    fn test_cache_key_ignores_fragment() {
        let anchored = CacheRequest::get(url("https://app.test/a.css#section"));
        let plain = CacheRequest::get(url("https://app.test/a.css"));
        assert_eq!(anchored.cache_key(), plain.cache_key());
        assert_eq!(anchored.cache_key(), "GET https://app.test/a.css");

        let query = CacheRequest::get(url("https://app.test/a.css?v=2#section"));
        assert_eq!(query.cache_key(), "GET https://app.test/a.css?v=2");
    }

    #[test]
    fn test_bypass_directive() {
        let req = CacheRequest::get(url("https://app.test/"))
            .with_header(CACHE_CONTROL, HeaderValue::from_static("max-age=0, No-Cache"));
        assert!(req.bypasses_cache());

        let req = CacheRequest::get(url("https://app.test/"))
            .with_header(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        assert!(!req.bypasses_cache());
    }

    #[test]
    fn test_navigate_accepts_html() {
        let req = CacheRequest::navigate(url("https://app.test/"));
        assert_eq!(req.mode, RequestMode::Navigate);
        assert!(req.accepts("text/html"));
        assert!(!req.accepts("application/json"));
    }

    #[test]
    fn test_cacheable() {
        assert!(CachedResponse::ok("x").is_cacheable());
        assert!(!CachedResponse::ok("x").with_kind(ResponseKind::Cors).is_cacheable());
        assert!(!CachedResponse::new(StatusCode::NOT_FOUND, "x").is_cacheable());
    }
}
