//! Remote authorities that acknowledge records.

use async_trait::async_trait;
use reqwest::{header, Client};
use std::time::Duration;
use tracing::debug;
use url::Url;

use snipmaster_common::{Error, Record, Result};

/// Path, relative to the server base, that accepts one record per request.
pub const SYNC_ENDPOINT: &str = "api/sync";

/// The authority that confirms a record has been stored remotely.
///
/// One record per call. `Ok(())` is an acknowledgement; any error means the
/// record stays pending.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Push one record and wait for the verdict.
    async fn push(&self, record: &Record) -> Result<()>;
}

/// Stand-in server with fixed latency and a random failure rate.
#[derive(Debug, Clone)]
pub struct SimulatedRemote {
    latency: Duration,
    success_rate: f64,
}

impl SimulatedRemote {
    pub const DEFAULT_LATENCY: Duration = Duration::from_millis(500);
    pub const DEFAULT_SUCCESS_RATE: f64 = 0.9;

    /// `success_rate` is clamped to `0.0..=1.0`.
    pub fn new(latency: Duration, success_rate: f64) -> Self {
        Self {
            latency,
            success_rate: success_rate.clamp(0.0, 1.0),
        }
    }

    pub fn success_rate(&self) -> f64 {
        self.success_rate
    }
}

impl Default for SimulatedRemote {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LATENCY, Self::DEFAULT_SUCCESS_RATE)
    }
}

#[async_trait]
impl RemoteAuthority for SimulatedRemote {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn push(&self, record: &Record) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if rand::random::<f64>() < self.success_rate {
            debug!("Simulated server accepted {}", record.id);
            Ok(())
        } else {
            Err(Error::RemoteSync("Server error".to_string()))
        }
    }
}

/// Remote authority reached over HTTP.
///
/// Each record is POSTed as JSON to `<base>/api/sync`; any 2xx status counts
/// as an acknowledgement.
pub struct HttpRemote {
    http: Client,
    endpoint: Url,
}

impl HttpRemote {
    /// Create a client for the server at `base`.
    ///
    /// # Errors
    /// - `Config` if `base` cannot be joined with the sync path
    /// - `Network` if the HTTP client cannot be built
    pub fn new(base: &Url) -> Result<Self> {
        let endpoint = endpoint_for(base)?;
        let http = Client::builder()
            .user_agent(concat!("SnipMaster/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn endpoint_for(base: &Url) -> Result<Url> {
    // Without a trailing slash `join` would replace the last path segment.
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(SYNC_ENDPOINT)
        .map_err(|e| Error::Config(format!("Invalid server URL {}: {}", base, e)))
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    fn name(&self) -> &str {
        "http"
    }

    async fn push(&self, record: &Record) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .json(record)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to push {}: {}", record.id, e)))?;

        let status = response.status();
        if status.is_success() {
            debug!("Server acknowledged {} ({})", record.id, status);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::RemoteSync(format!("Server returned {} - {}", status, body)))
        }
    }
}
