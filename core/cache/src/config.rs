//! Cache naming and shell manifest.

use serde::{Deserialize, Serialize};
use url::Url;

use snipmaster_common::{Error, Result};

pub const DEFAULT_PREFIX: &str = "snipmaster";
pub const DEFAULT_VERSION: &str = "v2";
pub const DEFAULT_OFFLINE_PAGE: &str = "/offline.html";

/// Resources fetched into the static cache on install.
pub const DEFAULT_SHELL: &[&str] = &[
    "/",
    "/index.html",
    "/styles/main.css",
    "/scripts/app.js",
    "/scripts/storage.js",
    "/scripts/ui.js",
    "/scripts/syncUI.js",
    "/offline.html",
    "/images/icon-192.png",
    "/images/icon-512.png",
    "/images/maskable-icon.png",
    "/images/icon-144.png",
    "/manifest.json",
];

/// Configuration of one versioned set of caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Origin the application is served from; relative paths resolve
    /// against it and responses from it count as same-origin.
    pub origin: Url,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_shell")]
    pub shell: Vec<String>,
    #[serde(default = "default_offline_page")]
    pub offline_page: String,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_shell() -> Vec<String> {
    DEFAULT_SHELL.iter().map(|s| s.to_string()).collect()
}

fn default_offline_page() -> String {
    DEFAULT_OFFLINE_PAGE.to_string()
}

impl CacheConfig {
    /// Default names and manifest for `origin`.
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin,
            prefix: default_prefix(),
            version: default_version(),
            shell: default_shell(),
            offline_page: default_offline_page(),
        }
    }

    pub fn static_cache(&self) -> String {
        format!("{}-static-{}", self.prefix, self.version)
    }

    pub fn dynamic_cache(&self) -> String {
        format!("{}-dynamic-{}", self.prefix, self.version)
    }

    pub fn snippets_cache(&self) -> String {
        format!("{}-snippets-data-{}", self.prefix, self.version)
    }

    /// Names of the caches this version uses.
    pub fn current_caches(&self) -> [String; 3] {
        [
            self.static_cache(),
            self.dynamic_cache(),
            self.snippets_cache(),
        ]
    }

    /// Whether `name` follows this application's cache naming.
    pub fn owns(&self, name: &str) -> bool {
        name.starts_with(&format!("{}-", self.prefix))
    }

    /// Resolve a path or URL against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid resource path {:?}: {}", path, e)))
    }
}
