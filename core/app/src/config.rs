//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use snipmaster_cache::CacheConfig;
use snipmaster_common::{Error, Result};
use snipmaster_sync::{EngineConfig, RetryPolicy, SimulatedRemote};

/// Configuration file name inside the data directory.
pub const CONFIG_FILENAME: &str = "config.json";

/// Database file name inside the data directory.
pub const DATABASE_FILENAME: &str = "snippets.db";

/// Cache database file name inside the data directory.
pub const CACHE_FILENAME: &str = "cache.db";

/// Which remote authority acknowledges records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RemoteConfig {
    /// Stand-in that succeeds with a fixed probability.
    Simulated { latency_ms: u64, success_rate: f64 },
    /// Real endpoint; records are POSTed to `<base_url>/api/sync`.
    Http { base_url: Url },
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::Simulated {
            latency_ms: SimulatedRemote::DEFAULT_LATENCY.as_millis() as u64,
            success_rate: SimulatedRemote::DEFAULT_SUCCESS_RATE,
        }
    }
}

/// Sync engine knobs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Failed attempts before a record is set aside. Unlimited when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Upper bound for one remote call in milliseconds.
    #[serde(default)]
    pub remote_timeout_ms: Option<u64>,
    /// Run deferred passes on an in-process background worker.
    #[serde(default)]
    pub background: bool,
}

impl SyncSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            retry: match self.max_attempts {
                Some(n) => RetryPolicy::capped(n),
                None => RetryPolicy::unlimited(),
            },
            remote_timeout: self.remote_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Persisted application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Record backend type ("memory" or "sqlite").
    pub backend: String,
    /// Backend-specific configuration.
    #[serde(default)]
    pub backend_config: serde_json::Value,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    /// Reachability assumed at startup.
    #[serde(default = "default_online")]
    pub online: bool,
    /// Request caching; disabled when absent.
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    /// Where cached responses are kept. In memory when absent.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

fn default_online() -> bool {
    true
}

impl AppConfig {
    /// Defaults rooted in `data_dir`: SQLite records, simulated remote.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            backend: "sqlite".to_string(),
            backend_config: serde_json::json!({
                "path": data_dir.join(DATABASE_FILENAME),
            }),
            remote: RemoteConfig::default(),
            sync: SyncSettings::default(),
            online: true,
            cache: None,
            cache_path: Some(data_dir.join(CACHE_FILENAME)),
        }
    }

    /// Everything in memory. Nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            backend: "memory".to_string(),
            backend_config: serde_json::Value::Null,
            remote: RemoteConfig::default(),
            sync: SyncSettings::default(),
            online: true,
            cache: None,
            cache_path: None,
        }
    }

    /// Platform data directory for SnipMaster.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("snipmaster")
    }

    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        Self::default_dir().join(CONFIG_FILENAME)
    }

    /// Load from `path`, or defaults next to it if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            return Ok(Self::in_dir(dir));
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write to `path` as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Directory of the SQLite database, if the backend uses one.
    pub fn database_dir(&self) -> Option<PathBuf> {
        self.backend_config
            .get("path")
            .and_then(|v| v.as_str())
            .and_then(|p| Path::new(p).parent())
            .map(Path::to_path_buf)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::in_dir(&Self::default_dir())
    }
}
