//! Request classification.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::request::{CacheRequest, RequestMode};

/// Path prefix of the server API.
pub const API_PREFIX: &str = "/api/";
/// Path fragment identifying snippet data.
pub const SNIPPET_MARKER: &str = "snippets";
/// Extensions served from the static cache first.
pub const STATIC_EXTENSIONS: &[&str] = &["js", "css", "png", "jpg", "svg", "ico"];

/// Caching policy applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Straight to the network, no cache involved.
    NetworkOnly,
    NetworkFirst,
    CacheFirst,
    StaleWhileRevalidate,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::NetworkOnly => "network-only",
            Strategy::NetworkFirst => "network-first",
            Strategy::CacheFirst => "cache-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
        })
    }
}

/// Pick the strategy for `request`. The first matching rule wins.
pub fn classify(request: &CacheRequest) -> Strategy {
    let url = &request.url;

    if request.bypasses_cache() || !matches!(url.scheme(), "http" | "https") {
        return Strategy::NetworkOnly;
    }

    let path = url.path();
    if path.starts_with(API_PREFIX) {
        return Strategy::NetworkFirst;
    }

    if path.contains(SNIPPET_MARKER) || request.accepts("application/json") {
        return Strategy::StaleWhileRevalidate;
    }

    if request.mode == RequestMode::Navigate {
        return Strategy::NetworkFirst;
    }

    if has_static_extension(path) {
        return Strategy::CacheFirst;
    }

    Strategy::NetworkFirst
}

fn has_static_extension(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.')
        .is_some_and(|(_, ext)| STATIC_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderValue, ACCEPT, CACHE_CONTROL};
    use url::Url;

    fn get(url: &str) -> CacheRequest {
        CacheRequest::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_rules() {
        assert_eq!(classify(&get("https://app.test/api/sync")), Strategy::NetworkFirst);
        assert_eq!(classify(&get("https://app.test/data/snippets")), Strategy::StaleWhileRevalidate);
        assert_eq!(
            classify(&CacheRequest::navigate(Url::parse("https://app.test/").unwrap())),
            Strategy::NetworkFirst
        );
        assert_eq!(classify(&get("https://app.test/scripts/app.js")), Strategy::CacheFirst);
        assert_eq!(classify(&get("https://app.test/images/icon.ico")), Strategy::CacheFirst);
        assert_eq!(classify(&get("https://app.test/manifest.webmanifest")), Strategy::NetworkFirst);
        assert_eq!(classify(&get("https://app.test/")), Strategy::NetworkFirst);
    }

    #[test]
    fn test_first_match_wins() {
        // No-cache beats everything else.
        let req = get("https://app.test/scripts/app.js")
            .with_header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        assert_eq!(classify(&req), Strategy::NetworkOnly);

        // API prefix beats the snippet marker.
        assert_eq!(classify(&get("https://app.test/api/snippets")), Strategy::NetworkFirst);

        // JSON accept beats the static extension.
        let req = get("https://app.test/data.js")
            .with_header(ACCEPT, HeaderValue::from_static("application/json"));
        assert_eq!(classify(&req), Strategy::StaleWhileRevalidate);

        // Snippet marker beats the static extension.
        assert_eq!(
            classify(&get("https://app.test/scripts/snippets.js")),
            Strategy::StaleWhileRevalidate
        );
    }

    #[test]
    fn test_foreign_scheme_bypasses() {
        assert_eq!(
            classify(&get("chrome-extension://abcdef/content.js")),
            Strategy::NetworkOnly
        );
    }

    #[test]
    fn test_extension_must_be_exact() {
        assert_eq!(classify(&get("https://app.test/file.json")), Strategy::NetworkFirst);
        assert_eq!(classify(&get("https://app.test/archive.js.map")), Strategy::NetworkFirst);
        assert_eq!(classify(&get("https://app.test/dir.css/")), Strategy::NetworkFirst);
    }
}
